// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

use encoding_rs::UTF_16LE;
use num_traits::FromPrimitive;
use scroll::ctx::{SizeWith, TryFromCtx};
use scroll::{self, Pread, LE};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::marker::PhantomData;
use std::ops::Deref;
use std::path::Path;
use tracing::{debug, warn};

use crate::system_info::{Cpu, Os};
use crashdump_common::format::{self as md};
use crashdump_common::format::{MemoryType, MINIDUMP_STREAM_TYPE};

/// The size of `MINIDUMP_HEADER` on disk.
pub const HEADER_SIZE: usize = 32;

/// An index into the contents of a crash dump.
///
/// The `Minidump` struct represents the parsed header and
/// indices contained at the start of a dump file. It can be instantiated
/// by calling the [`Minidump::read`][read] or
/// [`Minidump::read_path`][read_path] methods.
///
/// [read]: struct.Minidump.html#method.read
/// [read_path]: struct.Minidump.html#method.read_path
#[derive(Debug)]
pub struct Minidump<'a, T>
where
    T: Deref<Target = [u8]> + 'a,
{
    data: T,
    /// The raw header from the file.
    pub header: md::MINIDUMP_HEADER,
    streams: HashMap<u32, (u32, md::MINIDUMP_DIRECTORY)>,
    system_info: Option<MinidumpSystemInfo>,
    _phantom: PhantomData<&'a [u8]>,
}

/// Errors encountered while reading a `Minidump`.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    #[error("File not found")]
    FileNotFound,
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("File too small for a dump header ({actual} bytes)")]
    TruncatedHeader { actual: usize },
    #[error("Missing magic signature (found {found:#010x})")]
    InvalidSignature { found: u32 },
    #[error("Stream not found")]
    StreamNotFound,
    #[error("Error reading stream")]
    StreamReadFailure,
    #[error("Data error")]
    DataError,
}

impl Error {
    /// Returns just the name of the error, as a more human-friendly version of
    /// an error-code for error logging.
    pub fn name(&self) -> &'static str {
        match self {
            Error::FileNotFound => "FileNotFound",
            Error::IoError(_) => "IoError",
            Error::TruncatedHeader { .. } => "TruncatedHeader",
            Error::InvalidSignature { .. } => "InvalidSignature",
            Error::StreamNotFound => "StreamNotFound",
            Error::StreamReadFailure => "StreamReadFailure",
            Error::DataError => "DataError",
        }
    }
}

/// The fundamental unit of data in a `Minidump`.
pub trait MinidumpStream<'a>: Sized {
    /// The stream type constant used in the `md::MINIDUMP_DIRECTORY` entry.
    const STREAM_TYPE: u32;

    /// Read this `MinidumpStream` type from `bytes`.
    ///
    /// * `bytes` is the contents of this specific stream.
    /// * `all` refers to the full contents of the dump, for reading auxiliary data
    ///   referred to by offsets.
    /// * `system_info` is the preparsed SystemInfo stream, if it exists in the dump.
    fn read(
        bytes: &'a [u8],
        all: &'a [u8],
        system_info: Option<&MinidumpSystemInfo>,
    ) -> Result<Self, Error>;
}

/// An executable or shared library loaded in the process at the time the dump was written.
#[derive(Debug, Clone)]
pub struct MinidumpModule {
    /// The `MINIDUMP_MODULE` direct from the dump file.
    pub raw: md::MINIDUMP_MODULE,
    /// The module name. This is stored separately in the dump.
    pub name: String,
}

/// A list of `MinidumpModule`s contained in a `Minidump`.
#[derive(Debug, Clone, Default)]
pub struct MinidumpModuleList {
    /// The modules, in the order they were stored in the dump.
    modules: Vec<MinidumpModule>,
}

/// The state of a thread from the process when the dump was written.
#[derive(Debug)]
pub struct MinidumpThread<'a> {
    /// The `MINIDUMP_THREAD` direct from the dump file.
    pub raw: md::MINIDUMP_THREAD,
    /// The stack memory for the thread, if it lies within the dump.
    stack: Option<&'a [u8]>,
}

/// A list of `MinidumpThread`s contained in a `Minidump`.
#[derive(Debug)]
pub struct MinidumpThreadList<'a> {
    /// The threads, in the order they were present in the `Minidump`.
    pub threads: Vec<MinidumpThread<'a>>,
    /// A map of thread id to index in `threads`.
    thread_ids: HashMap<u32, usize>,
}

/// Information about the system that generated the dump.
#[derive(Debug, Clone)]
pub struct MinidumpSystemInfo {
    /// The `MINIDUMP_SYSTEM_INFO` direct from the dump
    pub raw: md::MINIDUMP_SYSTEM_INFO,
    /// The operating system that generated the dump
    pub os: Os,
    /// The CPU on which the dump was generated
    pub cpu: Cpu,
    /// The latest Service Pack installed on the system, stored separately in the dump.
    csd_version: Option<String>,
}

/// Information about the exception that caused the dump to be generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinidumpException {
    /// The thread that encountered this exception.
    pub thread_id: u32,
    /// The 32-bit fault code, usually an NTSTATUS value.
    pub exception_code: u32,
    pub exception_flags: u32,
    /// The address of the faulting instruction.
    pub exception_address: u64,
}

/// The legacy list of memory ranges captured in the dump.
#[derive(Debug, Clone, Default)]
pub struct MinidumpMemoryList {
    /// The memory descriptors, in the order they were stored in the dump.
    descriptors: Vec<md::MINIDUMP_MEMORY_DESCRIPTOR>,
}

/// Metadata about a region of memory (whether it is private, mapped, an image...).
#[derive(Debug, Clone)]
pub struct MinidumpMemoryInfo {
    /// The raw value from the dump.
    pub raw: md::MINIDUMP_MEMORY_INFO,
    /// What kind of memory mapping the pages in this region are.
    pub ty: MemoryType,
}

/// The extended list of memory region descriptions.
#[derive(Debug, Clone, Default)]
pub struct MinidumpMemoryInfoList {
    /// The memory regions, in the order they were stored in the dump.
    regions: Vec<MinidumpMemoryInfo>,
}

/// The kind of mapping backing a [`MemoryRegion`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MemoryRegionKind {
    Private,
    Mapped,
    Image,
    Unknown,
}

impl fmt::Display for MemoryRegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemoryRegionKind::Private => "private",
            MemoryRegionKind::Mapped => "mapped",
            MemoryRegionKind::Image => "image",
            MemoryRegionKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A single region of process memory, independent of which list it came from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemoryRegion {
    pub address: u64,
    pub size: u64,
    pub kind: MemoryRegionKind,
}

/// Provides a unified interface over the two kinds of memory listings a dump may carry.
///
/// The extended `MemoryInfoListStream` describes region types and is preferred; the
/// legacy `MemoryListStream` only knows addresses and sizes.
#[derive(Debug, Clone)]
pub enum UnifiedMemoryList {
    Info(MinidumpMemoryInfoList),
    Legacy(MinidumpMemoryList),
}

/// Produce a slice of `bytes` corresponding to the offset and size in `loc`, or an
/// `Error` if the data is not fully contained within `bytes`.
fn location_slice<'a>(
    bytes: &'a [u8],
    loc: &md::MINIDUMP_LOCATION_DESCRIPTOR,
) -> Result<&'a [u8], Error> {
    let start = loc.rva as usize;
    start
        .checked_add(loc.data_size as usize)
        .and_then(|end| bytes.get(start..end))
        .ok_or(Error::StreamReadFailure)
}

/// Read a u32 length-prefixed UTF-16LE string from `bytes` at `offset`.
fn read_string_utf16(offset: &mut usize, bytes: &[u8]) -> Option<String> {
    let u: u32 = bytes.gread_with(offset, LE).ok()?;
    let size = u as usize;
    if size % 2 != 0 {
        return None;
    }
    let end = offset.checked_add(size)?;
    let raw = bytes.get(*offset..end)?;
    let s = UTF_16LE.decode_without_bom_handling_and_without_replacement(raw)?;
    *offset = end;
    Some(s.into_owned())
}

/// Read a u32 count followed by as many `T` entries as fit in `bytes`.
///
/// A count that overshoots the data is common in truncated dumps, so rather than
/// failing this returns the largest prefix that lies within `bytes`.
fn read_stream_list<'a, T>(offset: &mut usize, bytes: &'a [u8]) -> Result<Vec<T>, Error>
where
    T: TryFromCtx<'a, scroll::Endian, [u8], Error = scroll::Error>,
    T: SizeWith<scroll::Endian>,
{
    let u: u32 = bytes
        .gread_with(offset, LE)
        .or(Err(Error::StreamReadFailure))?;
    let count = u as usize;
    let available = bytes.len().saturating_sub(*offset) / <T>::size_with(&LE);
    if count > available {
        warn!(
            "List stream claims {} entries but only {} fit in {} bytes",
            count,
            available,
            bytes.len()
        );
    }
    let count = count.min(available);

    let mut raw_entries = Vec::with_capacity(count);
    for _ in 0..count {
        let raw: T = bytes
            .gread_with(offset, LE)
            .or(Err(Error::StreamReadFailure))?;
        raw_entries.push(raw);
    }
    Ok(raw_entries)
}

impl MinidumpModule {
    /// Create a `MinidumpModule` with some basic info.
    ///
    /// Useful for testing.
    pub fn new(base: u64, size: u32, name: &str) -> MinidumpModule {
        MinidumpModule {
            raw: md::MINIDUMP_MODULE {
                base_of_image: base,
                size_of_image: size,
                ..md::MINIDUMP_MODULE::default()
            },
            name: String::from(name),
        }
    }

    /// Read the module name from `bytes` to construct a `MinidumpModule` from `raw`.
    ///
    /// A name that can't be read is replaced with "Unknown".
    pub fn read(raw: md::MINIDUMP_MODULE, bytes: &[u8]) -> MinidumpModule {
        let mut offset = raw.module_name_rva as usize;
        let name = match read_string_utf16(&mut offset, bytes) {
            Some(name) => name,
            None => {
                warn!(
                    "Unreadable module name at {:#x} for module at {:#x}",
                    raw.module_name_rva, raw.base_of_image
                );
                String::from("Unknown")
            }
        };
        MinidumpModule { raw, name }
    }

    pub fn base_address(&self) -> u64 {
        self.raw.base_of_image
    }

    pub fn size(&self) -> u64 {
        self.raw.size_of_image as u64
    }

    pub fn code_file(&self) -> &str {
        &self.name
    }

    /// Whether `address` falls within `[base, base + size)`.
    pub fn contains(&self, address: u64) -> bool {
        address
            .checked_sub(self.base_address())
            .is_some_and(|offset| offset < self.size())
    }
}

impl MinidumpModuleList {
    /// Return an empty `MinidumpModuleList`.
    pub fn new() -> MinidumpModuleList {
        MinidumpModuleList { modules: vec![] }
    }

    /// Create a `MinidumpModuleList` from a list of `MinidumpModule`s.
    pub fn from_modules(modules: Vec<MinidumpModule>) -> MinidumpModuleList {
        MinidumpModuleList { modules }
    }

    /// Returns the module corresponding to the main executable.
    pub fn main_module(&self) -> Option<&MinidumpModule> {
        // The main code module is the first one present in a dump file's module list.
        self.modules.first()
    }

    /// Return the first `MinidumpModule` whose address range covers `address`.
    ///
    /// Module ranges are not validated against each other, so overlapping modules
    /// resolve to whichever comes first in the dump.
    pub fn module_at_address(&self, address: u64) -> Option<&MinidumpModule> {
        self.modules.iter().find(|module| module.contains(address))
    }

    /// Iterate over the modules in dump order.
    pub fn iter(&self) -> impl Iterator<Item = &MinidumpModule> {
        self.modules.iter()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl<'a> MinidumpStream<'a> for MinidumpModuleList {
    const STREAM_TYPE: u32 = MINIDUMP_STREAM_TYPE::ModuleListStream as u32;

    fn read(
        bytes: &'a [u8],
        all: &'a [u8],
        _system_info: Option<&MinidumpSystemInfo>,
    ) -> Result<MinidumpModuleList, Error> {
        let mut offset = 0;
        let raw_modules: Vec<md::MINIDUMP_MODULE> = read_stream_list(&mut offset, bytes)?;
        let modules = raw_modules
            .into_iter()
            .map(|raw| MinidumpModule::read(raw, all))
            .collect();
        Ok(MinidumpModuleList::from_modules(modules))
    }
}

impl<'a> MinidumpThread<'a> {
    pub fn thread_id(&self) -> u32 {
        self.raw.thread_id
    }

    /// The address the stack memory was captured from.
    pub fn stack_start(&self) -> u64 {
        self.raw.stack.start_of_memory_range
    }

    /// The raw stack bytes, or `None` if the recorded location is outside of the dump.
    pub fn stack_memory(&self) -> Option<&'a [u8]> {
        self.stack
    }
}

impl<'a> MinidumpStream<'a> for MinidumpThreadList<'a> {
    const STREAM_TYPE: u32 = MINIDUMP_STREAM_TYPE::ThreadListStream as u32;

    fn read(
        bytes: &'a [u8],
        all: &'a [u8],
        _system_info: Option<&MinidumpSystemInfo>,
    ) -> Result<MinidumpThreadList<'a>, Error> {
        let mut offset = 0;
        let raw_threads: Vec<md::MINIDUMP_THREAD> = read_stream_list(&mut offset, bytes)?;
        let mut threads = Vec::with_capacity(raw_threads.len());
        let mut thread_ids = HashMap::with_capacity(raw_threads.len());
        for raw in raw_threads.into_iter() {
            // Lookups by id resolve to the first thread with that id.
            thread_ids.entry(raw.thread_id).or_insert(threads.len());
            let stack = location_slice(all, &raw.stack.memory).ok();
            if stack.is_none() {
                debug!(
                    "Stack for thread {:#x} lies outside of the dump (rva {:#x}, {} bytes)",
                    raw.thread_id, raw.stack.memory.rva, raw.stack.memory.data_size
                );
            }
            threads.push(MinidumpThread { raw, stack });
        }
        Ok(MinidumpThreadList {
            threads,
            thread_ids,
        })
    }
}

impl<'a> MinidumpThreadList<'a> {
    /// Get the thread with id `id` from this thread list if it exists.
    pub fn get_thread(&self, id: u32) -> Option<&MinidumpThread<'a>> {
        self.thread_ids.get(&id).map(|&index| &self.threads[index])
    }
}

impl<'a> MinidumpStream<'a> for MinidumpSystemInfo {
    const STREAM_TYPE: u32 = MINIDUMP_STREAM_TYPE::SystemInfoStream as u32;

    fn read(
        bytes: &[u8],
        all: &[u8],
        system_info: Option<&MinidumpSystemInfo>,
    ) -> Result<MinidumpSystemInfo, Error> {
        if let Some(system_info) = system_info {
            return Ok(system_info.clone());
        }

        let raw: md::MINIDUMP_SYSTEM_INFO = bytes
            .pread_with(0, LE)
            .or(Err(Error::StreamReadFailure))?;
        let os = Os::from_platform_id(raw.platform_id);
        let cpu = Cpu::from_processor_architecture(raw.processor_architecture);

        let csd_version = if raw.csd_version_rva == 0 {
            None
        } else {
            let mut csd_offset = raw.csd_version_rva as usize;
            read_string_utf16(&mut csd_offset, all)
        };

        Ok(MinidumpSystemInfo {
            raw,
            os,
            cpu,
            csd_version,
        })
    }
}

impl MinidumpSystemInfo {
    /// The name of the installed Service Pack, if any.
    pub fn csd_version(&self) -> Option<&str> {
        self.csd_version.as_deref().filter(|csd| !csd.is_empty())
    }

    /// The OS version as "major.minor.build", followed by the Service Pack when present.
    pub fn os_version(&self) -> String {
        let version = format!(
            "{}.{}.{}",
            self.raw.major_version, self.raw.minor_version, self.raw.build_number
        );
        match self.csd_version() {
            Some(csd) => format!("{version} {csd}"),
            None => version,
        }
    }

    pub fn cpu_count(&self) -> usize {
        self.raw.number_of_processors as usize
    }
}

impl<'a> MinidumpStream<'a> for MinidumpException {
    const STREAM_TYPE: u32 = MINIDUMP_STREAM_TYPE::ExceptionStream as u32;

    fn read(
        bytes: &'a [u8],
        _all: &'a [u8],
        _system_info: Option<&MinidumpSystemInfo>,
    ) -> Result<MinidumpException, Error> {
        let read_u32 = |offset| -> Result<u32, Error> {
            bytes
                .pread_with(offset, LE)
                .or(Err(Error::StreamReadFailure))
        };
        let thread_id = read_u32(md::EXCEPTION_THREAD_ID_OFFSET)?;
        let exception_code = read_u32(md::EXCEPTION_CODE_OFFSET)?;
        let exception_flags = read_u32(md::EXCEPTION_FLAGS_OFFSET)?;
        let exception_address: u64 = bytes
            .pread_with(md::EXCEPTION_ADDRESS_OFFSET, LE)
            .or(Err(Error::StreamReadFailure))?;
        Ok(MinidumpException {
            thread_id,
            exception_code,
            exception_flags,
            exception_address,
        })
    }
}

impl MinidumpException {
    /// The address of the instruction that faulted.
    pub fn get_crash_address(&self) -> u64 {
        self.exception_address
    }
}

impl MinidumpMemoryList {
    /// Iterate over the captured ranges in dump order.
    pub fn iter(&self) -> impl Iterator<Item = MemoryRegion> + '_ {
        self.descriptors.iter().map(|desc| MemoryRegion {
            address: desc.start_of_memory_range,
            size: desc.memory.data_size as u64,
            kind: MemoryRegionKind::Unknown,
        })
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl<'a> MinidumpStream<'a> for MinidumpMemoryList {
    const STREAM_TYPE: u32 = MINIDUMP_STREAM_TYPE::MemoryListStream as u32;

    fn read(
        bytes: &'a [u8],
        _all: &'a [u8],
        _system_info: Option<&MinidumpSystemInfo>,
    ) -> Result<MinidumpMemoryList, Error> {
        let mut offset = 0;
        let descriptors = read_stream_list(&mut offset, bytes)?;
        Ok(MinidumpMemoryList { descriptors })
    }
}

impl MinidumpMemoryInfo {
    /// Classify this region by its type bits, preferring image over mapped over private.
    pub fn kind(&self) -> MemoryRegionKind {
        if self.ty.contains(MemoryType::MEM_IMAGE) {
            MemoryRegionKind::Image
        } else if self.ty.contains(MemoryType::MEM_MAPPED) {
            MemoryRegionKind::Mapped
        } else if self.ty.contains(MemoryType::MEM_PRIVATE) {
            MemoryRegionKind::Private
        } else {
            MemoryRegionKind::Unknown
        }
    }
}

impl MinidumpMemoryInfoList {
    /// Iterate over the regions in dump order.
    pub fn iter(&self) -> impl Iterator<Item = MemoryRegion> + '_ {
        self.regions.iter().map(|info| MemoryRegion {
            address: info.raw.base_address,
            size: info.raw.region_size,
            kind: info.kind(),
        })
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

impl<'a> MinidumpStream<'a> for MinidumpMemoryInfoList {
    const STREAM_TYPE: u32 = MINIDUMP_STREAM_TYPE::MemoryInfoListStream as u32;

    fn read(
        bytes: &'a [u8],
        _all: &'a [u8],
        _system_info: Option<&MinidumpSystemInfo>,
    ) -> Result<MinidumpMemoryInfoList, Error> {
        let header: md::MINIDUMP_MEMORY_INFO_LIST = bytes
            .pread_with(0, LE)
            .or(Err(Error::StreamReadFailure))?;
        let expected_size_of_entry = md::MINIDUMP_MEMORY_INFO::size_with(&LE);
        let size_of_entry = header.size_of_entry as usize;
        // Entries may grow in future versions of the format, but never shrink.
        if size_of_entry < expected_size_of_entry {
            warn!(
                "MemoryInfoList entries are {} bytes, expected at least {}",
                size_of_entry, expected_size_of_entry
            );
            return Err(Error::DataError);
        }
        let start = header.size_of_header as usize;
        if start < md::MINIDUMP_MEMORY_INFO_LIST::size_with(&LE) {
            warn!("MemoryInfoList header claims to be only {} bytes", start);
            return Err(Error::DataError);
        }

        let available = bytes.len().saturating_sub(start) / size_of_entry;
        let count = usize::try_from(header.number_of_entries)
            .unwrap_or(usize::MAX)
            .min(available);
        let mut regions = Vec::with_capacity(count);
        for i in 0..count {
            let raw: md::MINIDUMP_MEMORY_INFO = bytes
                .pread_with(start + i * size_of_entry, LE)
                .or(Err(Error::StreamReadFailure))?;
            let ty = MemoryType::from_bits_retain(raw._type);
            regions.push(MinidumpMemoryInfo { raw, ty });
        }
        Ok(MinidumpMemoryInfoList { regions })
    }
}

impl UnifiedMemoryList {
    /// Pick the extended listing when there is one, else the legacy listing.
    pub fn new(
        info: Option<MinidumpMemoryInfoList>,
        legacy: Option<MinidumpMemoryList>,
    ) -> Option<Self> {
        match (info, legacy) {
            (Some(info), _) => Some(UnifiedMemoryList::Info(info)),
            (None, Some(legacy)) => Some(UnifiedMemoryList::Legacy(legacy)),
            (None, None) => None,
        }
    }

    /// Iterate over the regions of whichever listing this wraps.
    pub fn regions(&self) -> Box<dyn Iterator<Item = MemoryRegion> + '_> {
        match self {
            UnifiedMemoryList::Info(info) => Box::new(info.iter()),
            UnifiedMemoryList::Legacy(legacy) => Box::new(legacy.iter()),
        }
    }
}

impl<'a> Minidump<'a, Vec<u8>> {
    /// Read a `Minidump` from a `Path` to a file on disk.
    ///
    /// The whole file is read into memory up front. A missing file is reported as
    /// [`Error::FileNotFound`], any other failure to read it as [`Error::IoError`].
    pub fn read_path<P>(path: P) -> Result<Minidump<'a, Vec<u8>>, Error>
    where
        P: AsRef<Path>,
    {
        Minidump::read(read_dump_file(path)?)
    }
}

/// Read the whole file at `path` into memory.
///
/// This is the loading half of [`Minidump::read_path`], for callers that want to
/// hold on to the bytes themselves. A missing file is reported as
/// [`Error::FileNotFound`], any other failure to read it as [`Error::IoError`].
pub fn read_dump_file<P>(path: P) -> Result<Vec<u8>, Error>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let data = fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => Error::FileNotFound,
        _ => Error::IoError(e.to_string()),
    })?;
    debug!("Read {} bytes from {}", data.len(), path.display());
    Ok(data)
}

impl<'a, T> Minidump<'a, T>
where
    T: Deref<Target = [u8]> + 'a,
{
    /// Read a `Minidump` from the provided `data`.
    ///
    /// Typically this will be a `Vec<u8>` or `&[u8]` with the full contents of the dump.
    ///
    /// Only the header can make this fail. Directory entries that run off the end
    /// of the buffer end the directory, and entries whose stream data lies outside
    /// the buffer are dropped.
    pub fn read(data: T) -> Result<Minidump<'a, T>, Error> {
        if data.len() < HEADER_SIZE {
            return Err(Error::TruncatedHeader { actual: data.len() });
        }
        let mut offset = 0;
        let header: md::MINIDUMP_HEADER = data
            .gread_with(&mut offset, LE)
            .or(Err(Error::TruncatedHeader { actual: data.len() }))?;
        if header.signature != md::MINIDUMP_SIGNATURE {
            return Err(Error::InvalidSignature {
                found: header.signature,
            });
        }

        offset = header.stream_directory_rva as usize;
        let entry_size = <md::MINIDUMP_DIRECTORY>::size_with(&LE);
        let capacity = (header.stream_count as usize)
            .min(data.len().saturating_sub(offset) / entry_size);

        let mut streams = HashMap::with_capacity(capacity);
        for i in 0..header.stream_count {
            let dir: md::MINIDUMP_DIRECTORY = match data.gread_with(&mut offset, LE) {
                Ok(dir) => dir,
                Err(_) => {
                    debug!(
                        "Stream directory truncated after {} of {} entries",
                        i, header.stream_count
                    );
                    break;
                }
            };
            if location_slice(data.deref(), &dir.location).is_err() {
                debug!(
                    "Dropping stream {} of type {:#x}: {} bytes at {:#x} lie outside the dump",
                    i, dir.stream_type, dir.location.data_size, dir.location.rva
                );
                continue;
            }
            if let Some((old_idx, old_dir)) = streams.insert(dir.stream_type, (i, dir.clone())) {
                if let Some(known_stream_type) = MINIDUMP_STREAM_TYPE::from_u32(dir.stream_type) {
                    warn!("Dump contains multiple streams of type {} ({:?}) at indices {} ({} bytes) and {} ({} bytes) (using {})",
                        dir.stream_type,
                        known_stream_type,
                        old_idx,
                        old_dir.location.data_size,
                        i,
                        dir.location.data_size,
                        i,
                    );
                } else {
                    warn!("Dump contains multiple streams of unknown type {} at indices {} ({} bytes) and {} ({} bytes) (using {})",
                        dir.stream_type,
                        old_idx,
                        old_dir.location.data_size,
                        i,
                        dir.location.data_size,
                        i,
                    );
                }
            }
        }
        let system_info =
            streams
                .get(&MinidumpSystemInfo::STREAM_TYPE)
                .and_then(|&(_, ref dir)| {
                    location_slice(data.deref(), &dir.location)
                        .ok()
                        .and_then(|bytes| {
                            let all_bytes = data.deref();
                            MinidumpSystemInfo::read(bytes, all_bytes, None).ok()
                        })
                });

        Ok(Minidump {
            data,
            header,
            streams,
            system_info,
            _phantom: PhantomData,
        })
    }

    /// Read and parse the specified [`MinidumpStream`][] `S` from the dump, if it exists.
    ///
    /// A missing stream is reported as [`Error::StreamNotFound`], which callers
    /// usually treat as "no data" rather than as a failure.
    pub fn get_stream<S>(&'a self) -> Result<S, Error>
    where
        S: MinidumpStream<'a>,
    {
        let bytes = self.get_raw_stream(S::STREAM_TYPE)?;
        let all_bytes = self.data.deref();
        S::read(bytes, all_bytes, self.system_info.as_ref())
    }

    /// Get a stream of raw data from the dump.
    ///
    /// This can be used to get the contents of arbitrary streams.
    /// For streams of known types you almost certainly want to use
    /// [`Minidump::get_stream`][] instead.
    pub fn get_raw_stream(&'a self, stream_type: u32) -> Result<&'a [u8], Error> {
        match self.streams.get(&stream_type) {
            None => Err(Error::StreamNotFound),
            Some(&(_, ref dir)) => {
                let bytes = self.data.deref();
                location_slice(bytes, &dir.location)
            }
        }
    }

    /// A listing of all the streams in the dump, in directory order.
    ///
    /// If there are multiple copies of the same stream type only the last one is
    /// yielded.
    pub fn all_streams(&self) -> impl Iterator<Item = &md::MINIDUMP_DIRECTORY> + '_ {
        let mut streams = self.streams.values().collect::<Vec<_>>();
        streams.sort_by_key(|&&(i, _)| i);
        streams.into_iter().map(|(_, stream)| stream)
    }

    /// The pre-parsed system info, if the dump has a readable SystemInfo stream.
    pub fn system_info(&self) -> Option<&MinidumpSystemInfo> {
        self.system_info.as_ref()
    }

    /// The size of the whole dump in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The raw bytes of the whole dump.
    pub fn as_bytes(&self) -> &[u8] {
        self.data.deref()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crashdump_synth::{
        DumpString, Exception, ListStream, Memory, MemoryInfo, Module as SynthModule,
        SimpleStream, SynthMinidump, SystemInfo, Thread,
    };
    use test_assembler::*;

    fn read_synth_dump<'a>(dump: SynthMinidump) -> Result<Minidump<'a, Vec<u8>>, Error> {
        Minidump::read(dump.finish().unwrap())
    }

    #[test]
    fn test_empty_buffer() {
        assert_eq!(
            Minidump::read(&[][..]).unwrap_err(),
            Error::TruncatedHeader { actual: 0 }
        );
    }

    #[test]
    fn test_short_buffer_with_signature() {
        // Even with the right magic, fewer than 32 bytes is too small.
        let data = b"MDMP\x93\xa7\0\0".to_vec();
        assert_eq!(
            Minidump::read(data).unwrap_err(),
            Error::TruncatedHeader { actual: 8 }
        );
    }

    #[test]
    fn test_bad_signature() {
        let mut data = SynthMinidump::new().finish().unwrap();
        data[0..4].copy_from_slice(b"PK\x03\x04");
        let err = Minidump::read(data).unwrap_err();
        assert_eq!(err, Error::InvalidSignature { found: 0x04034b50 });
        assert_eq!(err.name(), "InvalidSignature");
    }

    #[test]
    fn test_empty_dump() {
        let dump = read_synth_dump(SynthMinidump::new()).unwrap();
        assert_eq!(dump.all_streams().count(), 0);
        assert_eq!(dump.len(), 32);
        assert_eq!(
            dump.get_stream::<MinidumpModuleList>().unwrap_err(),
            Error::StreamNotFound
        );
    }

    #[test]
    fn test_module_list() {
        let name = DumpString::new("single module");
        let module = SynthModule::new(0xa90206ca83eb2852, 0xada542bd, &name, 0xb1054d2a, 0x34571371);
        let dump = SynthMinidump::new().add_module(module).add(name);
        let dump = read_synth_dump(dump).unwrap();
        let module_list = dump.get_stream::<MinidumpModuleList>().unwrap();
        assert_eq!(module_list.len(), 1);
        let module = module_list.main_module().unwrap();
        assert_eq!(module.base_address(), 0xa90206ca83eb2852);
        assert_eq!(module.size(), 0xada542bd);
        assert_eq!(module.code_file(), "single module");
        assert_eq!(module.raw.time_date_stamp, 0xb1054d2a);
        assert_eq!(module.raw.checksum, 0x34571371);
    }

    #[test]
    fn test_module_list_overshooting_count() {
        let name = DumpString::new("app.exe");
        let list = ListStream::new(MINIDUMP_STREAM_TYPE::ModuleListStream)
            .add(SynthModule::new(0x400000, 0x1000, &name, 0, 0))
            .claim_count(5);
        let dump = SynthMinidump::new().add_stream(list).add(name);
        let dump = read_synth_dump(dump).unwrap();
        let module_list = dump.get_stream::<MinidumpModuleList>().unwrap();
        assert_eq!(module_list.len(), 1);
        assert_eq!(module_list.main_module().unwrap().code_file(), "app.exe");
    }

    #[test]
    fn test_module_bad_name() {
        // Odd byte lengths can't be UTF-16.
        let name = DumpString::with_raw_length(3, b"abc");
        let bad_rva = SynthModule::with_name_rva(0x1000, 0x1000, 0xffff_fff0, 0, 0);
        let dump = SynthMinidump::new()
            .add_module(SynthModule::new(0x400000, 0x1000, &name, 0, 0))
            .add_module(bad_rva)
            .add(name);
        let dump = read_synth_dump(dump).unwrap();
        let module_list = dump.get_stream::<MinidumpModuleList>().unwrap();
        let names: Vec<_> = module_list.iter().map(|m| m.code_file()).collect();
        assert_eq!(names, vec!["Unknown", "Unknown"]);
    }

    #[test]
    fn test_module_at_address() {
        let list = MinidumpModuleList::from_modules(vec![
            MinidumpModule::new(0x1000, 0x1000, "a.dll"),
            MinidumpModule::new(0x1800, 0x1000, "overlap.dll"),
            MinidumpModule::new(u64::MAX - 0x10, 0x1000, "wraps.dll"),
        ]);
        assert!(list.module_at_address(0xfff).is_none());
        assert_eq!(list.module_at_address(0x1000).unwrap().code_file(), "a.dll");
        assert_eq!(list.module_at_address(0x1fff).unwrap().code_file(), "a.dll");
        assert_eq!(
            list.module_at_address(0x2000).unwrap().code_file(),
            "overlap.dll"
        );
        assert_eq!(
            list.module_at_address(u64::MAX).unwrap().code_file(),
            "wraps.dll"
        );
    }

    #[test]
    fn test_exception() {
        let dump = SynthMinidump::new().add_exception(Exception::new(0x1234, 0xc0000005, 0xdeadbeef));
        let dump = read_synth_dump(dump).unwrap();
        let exception = dump.get_stream::<MinidumpException>().unwrap();
        assert_eq!(exception.thread_id, 0x1234);
        assert_eq!(exception.exception_code, 0xc0000005);
        assert_eq!(exception.get_crash_address(), 0xdeadbeef);
    }

    #[test]
    fn test_truncated_exception() {
        // Long enough for the code, too short for the address.
        let exception = Exception::new(1, 0xc0000005, 0x1000).truncate_to(20);
        let dump = read_synth_dump(SynthMinidump::new().add_exception(exception)).unwrap();
        assert_eq!(
            dump.get_stream::<MinidumpException>().unwrap_err(),
            Error::StreamReadFailure
        );
    }

    #[test]
    fn test_system_info() {
        let csd = DumpString::new("Service Pack 2");
        let info = SystemInfo::new()
            .set_processor_architecture(0)
            .set_version(5, 1, 2600)
            .set_csd_version(&csd);
        let dump = read_synth_dump(SynthMinidump::new().add_system_info(info).add(csd)).unwrap();
        let system_info = dump.get_stream::<MinidumpSystemInfo>().unwrap();
        assert_eq!(system_info.cpu, Cpu::X86);
        assert_eq!(system_info.os, Os::Windows);
        assert_eq!(system_info.os_version(), "5.1.2600 Service Pack 2");
        assert_eq!(system_info.cpu_count(), 4);
        assert!(dump.system_info().is_some());
    }

    #[test]
    fn test_system_info_unknown_arch() {
        let info = SystemInfo::new().set_processor_architecture(0x4242);
        let dump = read_synth_dump(SynthMinidump::new().add_system_info(info)).unwrap();
        let system_info = dump.get_stream::<MinidumpSystemInfo>().unwrap();
        assert_eq!(system_info.cpu, Cpu::Unknown(0x4242));
        assert_eq!(system_info.os_version(), "10.0.19041");
    }

    #[test]
    fn test_threads() {
        let stack = Memory::with_section(
            Section::with_endian(Endian::Little).D64(0x1111).D64(0x2222),
            0x7fff0000,
        );
        let dump = SynthMinidump::new()
            .add_thread(Thread::new(0x42, &stack))
            .add_thread(Thread::with_raw_stack(0x43, 0x1000, 0x100, 0xffff_0000))
            .add_memory(stack);
        let dump = read_synth_dump(dump).unwrap();
        let threads = dump.get_stream::<MinidumpThreadList>().unwrap();
        assert_eq!(threads.threads.len(), 2);

        let thread = threads.get_thread(0x42).unwrap();
        assert_eq!(thread.stack_start(), 0x7fff0000);
        let stack = thread.stack_memory().unwrap();
        assert_eq!(stack.len(), 16);
        assert_eq!(&stack[..8], &0x1111u64.to_le_bytes());

        let thread = threads.get_thread(0x43).unwrap();
        assert!(thread.stack_memory().is_none());
        assert!(threads.get_thread(0x44).is_none());
    }

    #[test]
    fn test_memory_info_preferred() {
        let memory = Memory::with_section(Section::with_endian(Endian::Little).D32(0), 0x5000);
        let dump = SynthMinidump::new()
            .add_memory(memory)
            .add_memory_info(MemoryInfo::new(0x10000, 0x1000, 0x1000, 4, 0x20000))
            .add_memory_info(MemoryInfo::new(0x20000, 0x2000, 0x1000, 2, 0x40000))
            .add_memory_info(MemoryInfo::new(0x30000, 0x3000, 0x1000, 2, 0x1000000))
            .add_memory_info(MemoryInfo::new(0x40000, 0x4000, 0x10000, 1, 0));
        let dump = read_synth_dump(dump).unwrap();
        let unified = UnifiedMemoryList::new(
            dump.get_stream::<MinidumpMemoryInfoList>().ok(),
            dump.get_stream::<MinidumpMemoryList>().ok(),
        )
        .unwrap();
        let kinds: Vec<_> = unified.regions().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                MemoryRegionKind::Private,
                MemoryRegionKind::Mapped,
                MemoryRegionKind::Image,
                MemoryRegionKind::Unknown,
            ]
        );
        let first = unified.regions().next().unwrap();
        assert_eq!((first.address, first.size), (0x10000, 0x1000));
    }

    #[test]
    fn test_legacy_memory_list() {
        let memory = Memory::with_section(
            Section::with_endian(Endian::Little).append_repeated(0, 0x20),
            0x5000,
        );
        let dump = read_synth_dump(SynthMinidump::new().add_memory(memory)).unwrap();
        let unified = UnifiedMemoryList::new(
            dump.get_stream::<MinidumpMemoryInfoList>().ok(),
            dump.get_stream::<MinidumpMemoryList>().ok(),
        )
        .unwrap();
        let regions: Vec<_> = unified.regions().collect();
        assert_eq!(
            regions,
            vec![MemoryRegion {
                address: 0x5000,
                size: 0x20,
                kind: MemoryRegionKind::Unknown,
            }]
        );
    }

    #[test]
    fn test_out_of_bounds_directory_entry_dropped() {
        let dump = SynthMinidump::new()
            .add_raw_directory_entry(MINIDUMP_STREAM_TYPE::ModuleListStream as u32, 0x100, 0x10_0000)
            .add_exception(Exception::new(1, 0x80000003, 0x1000));
        let dump = read_synth_dump(dump).unwrap();
        assert_eq!(
            dump.get_raw_stream(MINIDUMP_STREAM_TYPE::ModuleListStream as u32)
                .unwrap_err(),
            Error::StreamNotFound
        );
        assert!(dump.get_stream::<MinidumpException>().is_ok());
        assert_eq!(dump.all_streams().count(), 1);
    }

    #[test]
    fn test_truncated_directory() {
        let mut data = SynthMinidump::new()
            .add_exception(Exception::new(1, 0x80000003, 0x1000))
            .finish()
            .unwrap();
        // Claim far more streams than the directory holds.
        data[8..12].copy_from_slice(&1000u32.to_le_bytes());
        let dump = Minidump::read(data).unwrap();
        assert_eq!(dump.all_streams().count(), 1);
        assert!(dump.get_stream::<MinidumpException>().is_ok());
    }

    #[test]
    fn test_duplicate_streams_later_wins() {
        let first = SimpleStream::new(
            0x47670001u32,
            Section::with_endian(Endian::Little).D32(1),
        );
        let second = SimpleStream::new(
            0x47670001u32,
            Section::with_endian(Endian::Little).D32(2).D32(2),
        );
        let dump = read_synth_dump(SynthMinidump::new().add_stream(first).add_stream(second)).unwrap();
        assert_eq!(dump.get_raw_stream(0x47670001).unwrap(), &[2, 0, 0, 0, 2, 0, 0, 0]);
    }

    #[test]
    fn test_read_path_missing() {
        assert_eq!(
            Minidump::read_path("/definitely/not/here.dmp").unwrap_err(),
            Error::FileNotFound
        );
    }

    #[test]
    fn test_read_dump_file_directory() {
        let err = read_dump_file(std::env::temp_dir()).unwrap_err();
        assert_eq!(err.name(), "IoError");
    }
}
