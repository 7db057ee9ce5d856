// Copyright 2016 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Synthetic crash dumps for testing
//!
//! This intentionally writes every field by hand instead of going through
//! crashdump-common's layouts, so that a mistake in those layouts shows up as a
//! test failure instead of cancelling itself out.
//!
//! Build up a [SynthMinidump][] with its methods, then `finish()` it to get the
//! bytes. The container is always little-endian. Some helpers exist purely to
//! produce broken dumps: directory entries that point past the end of the file,
//! list streams whose count overshoots their contents, and so on.

// Some test_assembler types do not have Debug, so be a bit more lenient here.
#![allow(missing_debug_implementations)]

use crashdump_common::format as md;
use scroll::ctx::SizeWith;
use scroll::LE;
use test_assembler::*;

/// A writer of synthetic crash dumps.
pub struct SynthMinidump {
    /// The `Section` containing the dump contents.
    section: Section,
    /// The number of streams.
    stream_count: u32,
    /// The number of streams, as a label for the header.
    stream_count_label: Label,
    /// The directory's file offset, for the header.
    stream_directory_rva: Label,
    /// The contents of the stream directory.
    stream_directory: Section,
    /// System info (cpu arch, os, etc.)
    system_info: Option<SystemInfo>,
    /// The fault record.
    exception: Option<Exception>,
    /// List of modules in this dump.
    module_list: ListStream<Module>,
    /// List of threads in this dump.
    thread_list: ListStream<Thread>,
    /// Legacy list of memory ranges in this dump.
    memory_list: ListStream<Section>,
    /// Extended list of memory region descriptions.
    memory_info_list: MemoryInfoListStream,
}

/// A block of data contained in a dump.
pub trait DumpSection {
    /// A label representing this `DumpSection`'s offset in bytes from the start of the dump.
    fn file_offset(&self) -> Label;

    /// A label representing this `DumpSection`'s size in bytes within the dump.
    fn file_size(&self) -> Label;
}

pub trait CiteLocation {
    /// Append an `MINIDUMP_LOCATION_DESCRIPTOR` to `section` referring to this section.
    fn cite_location_in(&self, section: Section) -> Section;
}

impl<T: DumpSection> CiteLocation for T {
    fn cite_location_in(&self, section: Section) -> Section {
        // A MINIDUMP_LOCATION_DESCRIPTOR is just a 32-bit size + 32-bit offset.
        section.D32(self.file_size()).D32(self.file_offset())
    }
}

/// Additional methods to make working with `Section`s simpler
pub trait SectionExtra {
    /// A chainable version of `CiteLocation::cite_location_in`
    fn cite_location<T: CiteLocation>(self, thing: &T) -> Self;
    /// A chainable version of `Memory::cite_memory_in`
    fn cite_memory(self, memory: &Memory) -> Self;
}

impl SectionExtra for Section {
    fn cite_location<T: CiteLocation>(self, thing: &T) -> Self {
        thing.cite_location_in(self)
    }
    fn cite_memory(self, memory: &Memory) -> Self {
        memory.cite_memory_in(self)
    }
}

/// A dump stream.
pub trait Stream: DumpSection + Into<Section> {
    /// The stream type, used in the stream directory.
    fn stream_type(&self) -> u32;
    /// Append a `MINIDUMP_DIRECTORY` referring to this stream to `section`.
    fn cite_stream_in(&self, section: Section) -> Section {
        section.D32(self.stream_type()).cite_location(self)
    }
}

impl SynthMinidump {
    /// Create an empty `SynthMinidump`.
    pub fn new() -> SynthMinidump {
        let stream_count_label = Label::new();
        let stream_directory_rva = Label::new();
        let section = Section::with_endian(Endian::Little)
            .D32(md::MINIDUMP_SIGNATURE)
            .D32(md::MINIDUMP_VERSION)
            .D32(&stream_count_label)
            .D32(&stream_directory_rva)
            .D32(0) // checksum
            .D32(1262805309) // time_date_stamp, arbitrary
            .D64(0); // flags
        section.start().set_const(0);
        assert_eq!(section.size(), md::MINIDUMP_HEADER::size_with(&LE) as u64);

        SynthMinidump {
            section,
            stream_count: 0,
            stream_count_label,
            stream_directory_rva,
            stream_directory: Section::with_endian(Endian::Little),
            system_info: None,
            exception: None,
            module_list: ListStream::new(md::MINIDUMP_STREAM_TYPE::ModuleListStream),
            thread_list: ListStream::new(md::MINIDUMP_STREAM_TYPE::ThreadListStream),
            memory_list: ListStream::new(md::MINIDUMP_STREAM_TYPE::MemoryListStream),
            memory_info_list: MemoryInfoListStream::new(),
        }
    }

    /// Append `section` to `self`, setting its location appropriately.
    // Perhaps should have been called .add_section().
    #[allow(clippy::should_implement_trait)]
    pub fn add<T>(mut self, section: T) -> SynthMinidump
    where
        T: DumpSection + Into<Section>,
    {
        let offset = section.file_offset();
        self.section = self.section.mark(&offset).append_section(section);
        self
    }

    /// Add `module` to the module list stream.
    ///
    /// The module's name string must be added separately with [`SynthMinidump::add`].
    pub fn add_module(mut self, module: Module) -> SynthMinidump {
        self.module_list = self.module_list.add(module);
        self
    }

    /// Add `memory` to `self`, adding it to the legacy memory list stream as well.
    pub fn add_memory(mut self, memory: Memory) -> SynthMinidump {
        // The memory list contains `MINIDUMP_MEMORY_DESCRIPTOR`s, so create one here.
        let descriptor = memory.cite_memory_in(Section::with_endian(Endian::Little));
        self.memory_list = self.memory_list.add(descriptor);
        self.add(memory)
    }

    /// Add `info` to the memory info list stream.
    pub fn add_memory_info(mut self, info: MemoryInfo) -> SynthMinidump {
        self.memory_info_list = self.memory_info_list.add(info);
        self
    }

    /// Add `thread` to the thread list stream.
    ///
    /// The thread's stack memory must be added separately with [`SynthMinidump::add`]
    /// or [`SynthMinidump::add_memory`].
    pub fn add_thread(mut self, thread: Thread) -> SynthMinidump {
        self.thread_list = self.thread_list.add(thread);
        self
    }

    /// Set the SystemInfo stream.
    pub fn add_system_info(mut self, system_info: SystemInfo) -> Self {
        self.system_info = Some(system_info);
        self
    }

    /// Set the Exception stream.
    pub fn add_exception(mut self, exception: Exception) -> Self {
        self.exception = Some(exception);
        self
    }

    /// Append `stream` to `self`, setting its location appropriately and adding it to the stream directory.
    pub fn add_stream<T: Stream>(mut self, stream: T) -> SynthMinidump {
        self.stream_directory = stream.cite_stream_in(self.stream_directory);
        self.stream_count += 1;
        self.add(stream)
    }

    /// Add a stream directory entry with arbitrary contents and no data behind it.
    ///
    /// Useful for producing entries that point outside of the file.
    pub fn add_raw_directory_entry(mut self, stream_type: u32, data_size: u32, rva: u32) -> Self {
        self.stream_directory = self
            .stream_directory
            .D32(stream_type)
            .D32(data_size)
            .D32(rva);
        self.stream_count += 1;
        self
    }

    fn finish_list<T>(self, list: ListStream<T>) -> SynthMinidump
    where
        T: DumpSection + Into<Section>,
    {
        if list.is_empty() {
            self
        } else {
            self.add_stream(list)
        }
    }

    /// Finish generating the dump and return the contents.
    pub fn finish(mut self) -> Option<Vec<u8>> {
        let modules = std::mem::replace(
            &mut self.module_list,
            ListStream::new(md::MINIDUMP_STREAM_TYPE::ModuleListStream),
        );
        self = self.finish_list(modules);
        let memories = std::mem::replace(
            &mut self.memory_list,
            ListStream::new(md::MINIDUMP_STREAM_TYPE::MemoryListStream),
        );
        self = self.finish_list(memories);
        let infos = std::mem::take(&mut self.memory_info_list);
        if !infos.is_empty() {
            self = self.add_stream(infos);
        }
        let threads = std::mem::replace(
            &mut self.thread_list,
            ListStream::new(md::MINIDUMP_STREAM_TYPE::ThreadListStream),
        );
        self = self.finish_list(threads);
        if let Some(stream) = self.system_info.take() {
            self = self.add_stream(stream);
        }
        if let Some(stream) = self.exception.take() {
            self = self.add_stream(stream);
        }

        let SynthMinidump {
            section,
            stream_count,
            stream_count_label,
            stream_directory_rva,
            stream_directory,
            ..
        } = self;
        stream_count_label.set_const(stream_count as u64);
        section
            .mark(&stream_directory_rva)
            .append_section(stream_directory)
            .get_contents()
    }
}

impl Default for SynthMinidump {
    fn default() -> Self {
        Self::new()
    }
}

impl DumpSection for Section {
    fn file_offset(&self) -> Label {
        self.start()
    }

    fn file_size(&self) -> Label {
        self.final_size()
    }
}

macro_rules! impl_dumpsection {
    ( $x:ty ) => {
        impl DumpSection for $x {
            fn file_offset(&self) -> Label {
                self.section.file_offset()
            }
            fn file_size(&self) -> Label {
                self.section.file_size()
            }
        }
    };
}

/// A stream of arbitrary data.
pub struct SimpleStream {
    /// The stream type.
    pub stream_type: u32,
    /// The stream's contents.
    pub section: Section,
}

impl SimpleStream {
    pub fn new<S: Into<u32>>(stream_type: S, section: Section) -> Self {
        SimpleStream {
            stream_type: stream_type.into(),
            section,
        }
    }
}

impl From<SimpleStream> for Section {
    fn from(stream: SimpleStream) -> Self {
        stream.section
    }
}

impl_dumpsection!(SimpleStream);

impl Stream for SimpleStream {
    fn stream_type(&self) -> u32 {
        self.stream_type
    }
}

/// A stream containing a u32 count followed by fixed-size entries.
pub struct ListStream<T> {
    stream_type: u32,
    section: Section,
    count: u32,
    count_label: Label,
    /// If set, written as the count instead of the real number of entries.
    claimed_count: Option<u32>,
    _type: std::marker::PhantomData<T>,
}

impl<T> ListStream<T>
where
    T: DumpSection + Into<Section>,
{
    pub fn new<S: Into<u32>>(stream_type: S) -> Self {
        let count_label = Label::new();
        ListStream {
            stream_type: stream_type.into(),
            section: Section::with_endian(Endian::Little).D32(&count_label),
            count: 0,
            count_label,
            claimed_count: None,
            _type: std::marker::PhantomData,
        }
    }

    // Possibly name this .add_section().
    #[allow(clippy::should_implement_trait)]
    pub fn add(mut self, entry: T) -> Self {
        self.count += 1;
        self.section = self
            .section
            .mark(&entry.file_offset())
            .append_section(entry);
        self
    }

    /// Write `count` as the entry count regardless of how many entries follow.
    pub fn claim_count(mut self, count: u32) -> Self {
        self.claimed_count = Some(count);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl<T> From<ListStream<T>> for Section {
    fn from(list: ListStream<T>) -> Self {
        let count = list.claimed_count.unwrap_or(list.count);
        list.count_label.set_const(count as u64);
        list.section
    }
}

impl<T> DumpSection for ListStream<T> {
    fn file_offset(&self) -> Label {
        self.section.file_offset()
    }

    fn file_size(&self) -> Label {
        self.section.file_size()
    }
}

impl<T> Stream for ListStream<T>
where
    T: DumpSection + Into<Section>,
{
    fn stream_type(&self) -> u32 {
        self.stream_type
    }
}

/// The `MemoryInfoListStream`: a 16-byte header followed by `MINIDUMP_MEMORY_INFO` entries.
pub struct MemoryInfoListStream {
    section: Section,
    count: u64,
    count_label: Label,
}

impl MemoryInfoListStream {
    pub fn new() -> Self {
        let count_label = Label::new();
        let section = Section::with_endian(Endian::Little)
            .D32(md::MINIDUMP_MEMORY_INFO_LIST::size_with(&LE) as u32)
            .D32(md::MINIDUMP_MEMORY_INFO::size_with(&LE) as u32)
            .D64(&count_label);
        MemoryInfoListStream {
            section,
            count: 0,
            count_label,
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn add(mut self, info: MemoryInfo) -> Self {
        self.count += 1;
        self.section = self.section.append_section(info.section);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl Default for MemoryInfoListStream {
    fn default() -> Self {
        Self::new()
    }
}

impl From<MemoryInfoListStream> for Section {
    fn from(list: MemoryInfoListStream) -> Self {
        list.count_label.set_const(list.count);
        list.section
    }
}

impl_dumpsection!(MemoryInfoListStream);

impl Stream for MemoryInfoListStream {
    fn stream_type(&self) -> u32 {
        md::MINIDUMP_STREAM_TYPE::MemoryInfoListStream.into()
    }
}

/// A `MINIDUMP_STRING`, a UTF-16LE string preceded by a 4-byte byte length.
pub struct DumpString {
    section: Section,
}

impl DumpString {
    /// Create a new `DumpString` with `s` as its contents.
    pub fn new(s: &str) -> DumpString {
        let bytes: Vec<u8> = s.encode_utf16().flat_map(|c| c.to_le_bytes()).collect();
        let section = Section::with_endian(Endian::Little)
            .D32(bytes.len() as u32)
            .append_bytes(&bytes);
        DumpString { section }
    }

    /// Create a string whose length prefix is `len` regardless of its contents.
    pub fn with_raw_length(len: u32, contents: &[u8]) -> DumpString {
        let section = Section::with_endian(Endian::Little)
            .D32(len)
            .append_bytes(contents);
        DumpString { section }
    }
}

impl From<DumpString> for Section {
    fn from(string: DumpString) -> Self {
        string.section
    }
}

impl_dumpsection!(DumpString);

/// A fixed set of version info to use for tests.
pub const STOCK_VERSION_INFO: md::VS_FIXEDFILEINFO = md::VS_FIXEDFILEINFO {
    signature: md::VS_FFI_SIGNATURE,
    struct_version: 0x10000,
    file_version_hi: 0x11111111,
    file_version_lo: 0x22222222,
    product_version_hi: 0x33333333,
    product_version_lo: 0x44444444,
    file_flags_mask: 1,
    file_flags: 1,
    file_os: 0x40004,
    file_type: 1,
    file_subtype: 0,
    file_date_hi: 0,
    file_date_lo: 0,
};

/// A dump module.
pub struct Module {
    section: Section,
}

impl Module {
    pub fn new(
        base_of_image: u64,
        size_of_image: u32,
        name: &DumpString,
        time_date_stamp: u32,
        checksum: u32,
    ) -> Module {
        let section = Section::with_endian(Endian::Little)
            .D64(base_of_image)
            .D32(size_of_image)
            .D32(checksum)
            .D32(time_date_stamp)
            .D32(name.file_offset());
        Module::finish_record(section)
    }

    /// Create a module whose name offset is an arbitrary value.
    pub fn with_name_rva(
        base_of_image: u64,
        size_of_image: u32,
        name_rva: u32,
        time_date_stamp: u32,
        checksum: u32,
    ) -> Module {
        let section = Section::with_endian(Endian::Little)
            .D64(base_of_image)
            .D32(size_of_image)
            .D32(checksum)
            .D32(time_date_stamp)
            .D32(name_rva);
        Module::finish_record(section)
    }

    fn finish_record(section: Section) -> Module {
        let v = &STOCK_VERSION_INFO;
        let section = section
            .D32(v.signature)
            .D32(v.struct_version)
            .D32(v.file_version_hi)
            .D32(v.file_version_lo)
            .D32(v.product_version_hi)
            .D32(v.product_version_lo)
            .D32(v.file_flags_mask)
            .D32(v.file_flags)
            .D32(v.file_os)
            .D32(v.file_type)
            .D32(v.file_subtype)
            .D32(v.file_date_hi)
            .D32(v.file_date_lo)
            .D32(0) // cv_record
            .D32(0)
            .D32(0) // misc_record
            .D32(0)
            .D64(0) // reserved0
            .D64(0); // reserved1
        Module { section }
    }
}

impl_dumpsection!(Module);

impl From<Module> for Section {
    fn from(module: Module) -> Self {
        module.section
    }
}

/// A dump thread.
pub struct Thread {
    section: Section,
}

impl Thread {
    pub fn new(id: u32, stack: &Memory) -> Thread {
        let section = Section::with_endian(Endian::Little)
            .D32(id)
            .D32(0) // suspend_count
            .D32(0) // priority_class
            .D32(0) // priority
            .D64(0) // teb
            .cite_memory(stack)
            .D32(0) // thread_context
            .D32(0);
        Thread { section }
    }

    /// Create a thread whose stack descriptor holds arbitrary values.
    pub fn with_raw_stack(id: u32, start: u64, data_size: u32, rva: u32) -> Thread {
        let section = Section::with_endian(Endian::Little)
            .D32(id)
            .D32(0)
            .D32(0)
            .D32(0)
            .D64(0)
            .D64(start)
            .D32(data_size)
            .D32(rva)
            .D32(0)
            .D32(0);
        Thread { section }
    }
}

impl_dumpsection!(Thread);

impl From<Thread> for Section {
    fn from(thread: Thread) -> Self {
        thread.section
    }
}

/// A range of memory contents.
pub struct Memory {
    section: Section,
    pub address: u64,
}

impl Memory {
    /// Create a new `Memory` object representing memory starting at `address`,
    /// containing the contents of `section`.
    pub fn with_section(section: Section, address: u64) -> Memory {
        Memory { section, address }
    }

    /// Append a `MINIDUMP_MEMORY_DESCRIPTOR` referring to this memory range to `section`.
    pub fn cite_memory_in(&self, section: Section) -> Section {
        section.D64(self.address).cite_location(self)
    }
}

impl_dumpsection!(Memory);

impl From<Memory> for Section {
    fn from(memory: Memory) -> Self {
        memory.section
    }
}

/// A `MINIDUMP_MEMORY_INFO` entry.
pub struct MemoryInfo {
    section: Section,
}

impl MemoryInfo {
    pub fn new(base_address: u64, region_size: u64, state: u32, protection: u32, ty: u32) -> Self {
        let section = Section::with_endian(Endian::Little)
            .D64(base_address)
            .D64(base_address) // allocation_base
            .D32(protection) // allocation_protection
            .D32(0) // __alignment1
            .D64(region_size)
            .D32(state)
            .D32(protection)
            .D32(ty)
            .D32(0); // __alignment2
        MemoryInfo { section }
    }
}

impl_dumpsection!(MemoryInfo);

impl From<MemoryInfo> for Section {
    fn from(info: MemoryInfo) -> Self {
        info.section
    }
}

/// The SystemInfo stream.
pub struct SystemInfo {
    section: Section,
    pub processor_architecture: u16,
    pub processor_level: u16,
    pub processor_revision: u16,
    pub number_of_processors: u8,
    pub product_type: u8,
    pub major_version: u32,
    pub minor_version: u32,
    pub build_number: u32,
    pub platform_id: u32,
    /// Offset of the service pack string, zero for none.
    pub csd_version: Option<Label>,
}

impl SystemInfo {
    pub fn new() -> Self {
        Self {
            section: Section::with_endian(Endian::Little),
            processor_architecture: md::ProcessorArchitecture::PROCESSOR_ARCHITECTURE_AMD64 as u16,
            processor_level: 6,
            processor_revision: 0,
            number_of_processors: 4,
            product_type: 1,
            major_version: 10,
            minor_version: 0,
            build_number: 19041,
            platform_id: md::PlatformId::VER_PLATFORM_WIN32_NT as u32,
            csd_version: None,
        }
    }

    pub fn set_processor_architecture(mut self, arch: u16) -> Self {
        self.processor_architecture = arch;
        self
    }

    pub fn set_version(mut self, major: u32, minor: u32, build: u32) -> Self {
        self.major_version = major;
        self.minor_version = minor;
        self.build_number = build;
        self
    }

    /// Point at `csd`, which must be added to the dump separately.
    pub fn set_csd_version(mut self, csd: &DumpString) -> Self {
        self.csd_version = Some(csd.file_offset());
        self
    }
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl_dumpsection!(SystemInfo);

impl From<SystemInfo> for Section {
    fn from(info: SystemInfo) -> Self {
        let section = info
            .section
            .D16(info.processor_architecture)
            .D16(info.processor_level)
            .D16(info.processor_revision)
            .D8(info.number_of_processors)
            .D8(info.product_type)
            .D32(info.major_version)
            .D32(info.minor_version)
            .D32(info.build_number)
            .D32(info.platform_id);
        let section = match info.csd_version {
            Some(label) => section.D32(&label),
            None => section.D32(0),
        };
        section
            .D16(0) // suite_mask
            .D16(0) // reserved2
            .append_repeated(0, 24) // cpu
    }
}

impl Stream for SystemInfo {
    fn stream_type(&self) -> u32 {
        md::MINIDUMP_STREAM_TYPE::SystemInfoStream.into()
    }
}

/// The Exception stream.
pub struct Exception {
    section: Section,
    pub thread_id: u32,
    pub exception_code: u32,
    pub exception_flags: u32,
    pub exception_address: u64,
    /// Cut the stream off after this many bytes.
    pub truncate_to: Option<usize>,
}

impl Exception {
    pub fn new(thread_id: u32, exception_code: u32, exception_address: u64) -> Self {
        Self {
            section: Section::with_endian(Endian::Little),
            thread_id,
            exception_code,
            exception_flags: 0,
            exception_address,
            truncate_to: None,
        }
    }

    pub fn truncate_to(mut self, len: usize) -> Self {
        self.truncate_to = Some(len);
        self
    }
}

impl_dumpsection!(Exception);

impl From<Exception> for Section {
    fn from(info: Exception) -> Self {
        let mut record = Section::with_endian(Endian::Little)
            .D32(info.thread_id)
            .D32(0) // __align
            .D32(info.exception_code)
            .D32(info.exception_flags)
            .D64(0) // exception_record
            .D64(info.exception_address)
            .D32(0) // number_parameters
            .D32(0) // __align
            .append_repeated(0, 15 * 8) // exception_information
            .D32(0) // thread_context
            .D32(0);
        if let Some(len) = info.truncate_to {
            let mut bytes = record.get_contents().unwrap_or_default();
            bytes.truncate(len);
            record = Section::with_endian(Endian::Little).append_bytes(&bytes);
        }
        info.section.append_section(record)
    }
}

impl Stream for Exception {
    fn stream_type(&self) -> u32 {
        md::MINIDUMP_STREAM_TYPE::ExceptionStream.into()
    }
}

#[test]
fn test_dump_header() {
    let dump = SynthMinidump::new();
    assert_eq!(
        dump.finish().unwrap(),
        vec![
            0x4d, 0x44, 0x4d, 0x50, // signature
            0x93, 0xa7, 0x00, 0x00, // version
            0, 0, 0, 0, // stream count
            0x20, 0, 0, 0, // directory RVA
            0, 0, 0, 0, // checksum
            0x3d, 0xe1, 0x44, 0x4b, // time_date_stamp
            0, 0, 0, 0, // flags
            0, 0, 0, 0,
        ]
    );
}

#[test]
fn test_dump_string() {
    let dump = SynthMinidump::new();
    let s = DumpString::new("hello");
    let contents = dump.add(s).finish().unwrap();
    // Skip over the header
    assert_eq!(
        &contents[32..],
        &[
            0xa, 0x0, 0x0, 0x0, // length
            b'h', 0x0, b'e', 0x0, b'l', 0x0, b'l', 0x0, b'o', 0x0
        ]
    );
}

#[test]
fn test_list_stream_claimed_count() {
    let list = ListStream::<DumpString>::new(0x11223344u32)
        .add(DumpString::new("a"))
        .claim_count(3);
    assert_eq!(
        Into::<Section>::into(list).get_contents().unwrap(),
        vec![
            3, 0, 0, 0, // claimed entry count
            0x2, 0x0, 0x0, 0x0, // length
            b'a', 0x0
        ]
    );
}

#[test]
fn test_simple_stream() {
    let section = Section::with_endian(Endian::Little).D32(0x55667788);
    let dump = SynthMinidump::new().add_stream(SimpleStream::new(0x11223344u32, section));
    let contents = dump.finish().unwrap();
    assert_eq!(contents.len(), 32 + 4 + 12);
    // stream count
    assert_eq!(&contents[8..12], &[1, 0, 0, 0]);
    // directory RVA
    assert_eq!(&contents[12..16], &[36, 0, 0, 0]);
    // Stream contents
    assert_eq!(&contents[32..36], &[0x88, 0x77, 0x66, 0x55]);
    // Stream directory
    assert_eq!(
        &contents[36..],
        &[0x44, 0x33, 0x22, 0x11, 4, 0, 0, 0, 32, 0, 0, 0]
    );
}

#[test]
fn test_record_sizes() {
    let name = DumpString::new("x");
    let module: Section = Module::new(0, 0, &name, 0, 0).into();
    assert_eq!(module.size(), md::MINIDUMP_MODULE::size_with(&LE) as u64);

    let exception: Section = Exception::new(1, 2, 3).into();
    assert_eq!(exception.size(), 168);

    let info: Section = MemoryInfo::new(0, 0, 0, 0, 0).into();
    assert_eq!(info.size(), md::MINIDUMP_MEMORY_INFO::size_with(&LE) as u64);

    let system_info: Section = SystemInfo::new().into();
    assert_eq!(
        system_info.size(),
        md::MINIDUMP_SYSTEM_INFO::size_with(&LE) as u64
    );
}
