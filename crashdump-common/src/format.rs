// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Crash-dump container structure definitions.
//!
//! Types defined here match the layouts of the [Microsoft minidump headers][msdn]
//! that the "MDMP" container is built from. Only the structures the decoders
//! actually consume are described; everything is little-endian.
//!
//! [msdn]: https://docs.microsoft.com/en-us/windows/desktop/api/minidumpapiset/
#![allow(non_camel_case_types)]
#![allow(non_upper_case_globals)]

use bitflags::bitflags;
use enum_primitive_derive::Primitive;
use scroll::{Pread, SizeWith};

/// An offset from the start of the dump file.
pub type RVA = u32;

/// The 4-byte magic number at the start of a dump file.
///
/// In little endian this spells 'MDMP'.
pub const MINIDUMP_SIGNATURE: u32 = 0x504d444d;

/// The version of the minidump format.
///
/// The decoders never check it, it is only written by the synthetic dump builder.
pub const MINIDUMP_VERSION: u32 = 42899;

/// The header at the start of a dump file.
///
/// This struct matches the [Microsoft struct][msdn] of the same name.
///
/// [msdn]: https://docs.microsoft.com/en-us/windows/desktop/api/minidumpapiset/ns-minidumpapiset-_minidump_header
#[derive(Clone, Debug, Pread, SizeWith)]
pub struct MINIDUMP_HEADER {
    /// This should be [`MINIDUMP_SIGNATURE`].
    pub signature: u32,
    pub version: u32,
    /// The number of streams contained in the stream directory.
    pub stream_count: u32,
    /// The offset to the stream directory within the dump. The stream directory
    /// is an array containing `stream_count` [`MINIDUMP_DIRECTORY`] entries.
    pub stream_directory_rva: RVA,
    pub checksum: u32,
    pub time_date_stamp: u32,
    pub flags: u64,
}

/// A location within a dump file comprised of an offset and a size.
///
/// This struct matches the [Microsoft struct][msdn] of the same name.
///
/// [msdn]: https://docs.microsoft.com/en-us/windows/desktop/api/minidumpapiset/ns-minidumpapiset-_minidump_location_descriptor
#[derive(Copy, Default, Clone, Debug, Pread, SizeWith)]
pub struct MINIDUMP_LOCATION_DESCRIPTOR {
    /// The size of this data.
    pub data_size: u32,
    /// The offset to this data within the dump file.
    pub rva: RVA,
}

/// A range of memory contained within a dump consisting of a base address and a
/// location descriptor.
///
/// This struct matches the [Microsoft struct][msdn] of the same name.
///
/// [msdn]: https://docs.microsoft.com/en-us/windows/desktop/api/minidumpapiset/ns-minidumpapiset-_minidump_memory_descriptor
#[derive(Copy, Clone, Default, Debug, Pread, SizeWith)]
pub struct MINIDUMP_MEMORY_DESCRIPTOR {
    /// The base address of this memory range from the process.
    pub start_of_memory_range: u64,
    /// The offset and size of the actual bytes of memory contained in this dump.
    pub memory: MINIDUMP_LOCATION_DESCRIPTOR,
}

/// Information about a data stream contained in a dump file.
///
/// The header points at a list of these structs which allows locating
/// specific streams in the dump.
///
/// This struct matches the [Microsoft struct][msdn] of the same name.
///
/// [msdn]: https://docs.microsoft.com/en-us/windows/desktop/api/minidumpapiset/ns-minidumpapiset-_minidump_directory
#[derive(Clone, Debug, Pread, SizeWith)]
pub struct MINIDUMP_DIRECTORY {
    /// This is usually one of the values in [`MINIDUMP_STREAM_TYPE`] for known stream
    /// types, but user streams can have arbitrary values.
    pub stream_type: u32,
    /// The location of the stream contents within the dump.
    pub location: MINIDUMP_LOCATION_DESCRIPTOR,
}

/// The types of known dump data streams.
///
/// These values are taken from the [Microsoft enum][msdn] of the same name.
///
/// [msdn]: https://docs.microsoft.com/en-us/windows/desktop/api/minidumpapiset/ne-minidumpapiset-_minidump_stream_type
#[repr(u32)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, Primitive)]
pub enum MINIDUMP_STREAM_TYPE {
    /// An unused stream directory entry
    UnusedStream = 0,
    ReservedStream0 = 1,
    ReservedStream1 = 2,
    /// The list of threads from the process
    ///
    /// A u32 count followed by [`MINIDUMP_THREAD`] records.
    ThreadListStream = 3,
    /// The list of executable modules from the process
    ///
    /// A u32 count followed by [`MINIDUMP_MODULE`] records.
    ModuleListStream = 4,
    /// The list of memory regions from the process contained within this dump
    ///
    /// A u32 count followed by [`MINIDUMP_MEMORY_DESCRIPTOR`] records.
    MemoryListStream = 5,
    /// Information about the exception that caused the process to exit
    ExceptionStream = 6,
    /// System information, see [`MINIDUMP_SYSTEM_INFO`]
    SystemInfoStream = 7,
    ThreadExListStream = 8,
    Memory64ListStream = 9,
    CommentStreamA = 10,
    CommentStreamW = 11,
    HandleDataStream = 12,
    FunctionTable = 13,
    UnloadedModuleListStream = 14,
    MiscInfoStream = 15,
    /// Information about memory regions from the process
    ///
    /// A [`MINIDUMP_MEMORY_INFO_LIST`] header followed by [`MINIDUMP_MEMORY_INFO`] records.
    MemoryInfoListStream = 16,
    ThreadInfoListStream = 17,
    HandleOperationListStream = 18,
    TokenStream = 19,
    JavaScriptDataStream = 20,
    SystemMemoryInfoStream = 21,
    ProcessVmCountersStream = 22,
    IptTraceStream = 23,
    ThreadNamesStream = 24,
    LastReservedStream = 0x0000ffff,
}

impl From<MINIDUMP_STREAM_TYPE> for u32 {
    fn from(ty: MINIDUMP_STREAM_TYPE) -> Self {
        ty as u32
    }
}

/// Information about a single module (executable or shared library) from a dump
///
/// This struct matches the [Microsoft struct][msdn] of the same name.
///
/// [msdn]: https://docs.microsoft.com/en-us/windows/desktop/api/minidumpapiset/ns-minidumpapiset-_minidump_module
#[derive(Clone, Default, Debug, Pread, SizeWith)]
pub struct MINIDUMP_MODULE {
    /// The base address of the executable image in memory.
    pub base_of_image: u64,
    /// The size of the executable image in memory, in bytes.
    pub size_of_image: u32,
    /// The checksum value from the PE headers.
    pub checksum: u32,
    /// The timestamp value from the PE headers in `time_t` format.
    pub time_date_stamp: u32,
    /// An offset to a length-prefixed UTF-16LE string containing the name of the module.
    pub module_name_rva: RVA,
    /// Version information for this module.
    pub version_info: VS_FIXEDFILEINFO,
    /// The location of a CodeView record describing debug information for this module.
    pub cv_record: MINIDUMP_LOCATION_DESCRIPTOR,
    /// The location of an `IMAGE_DEBUG_MISC` record for this module.
    pub misc_record: MINIDUMP_LOCATION_DESCRIPTOR,
    pub reserved0: [u32; 2],
    pub reserved1: [u32; 2],
}

/// Version information for a file
///
/// This struct matches the [Microsoft struct][msdn] of the same name.
///
/// [msdn]: https://docs.microsoft.com/en-us/windows/desktop/api/verrsrc/ns-verrsrc-tagvs_fixedfileinfo
#[derive(Clone, Default, Debug, Pread, SizeWith)]
pub struct VS_FIXEDFILEINFO {
    /// Contains the value of `VS_FFI_SIGNATURE`
    pub signature: u32,
    /// Should contain the value of `VS_FFI_STRUCVERSION`
    pub struct_version: u32,
    pub file_version_hi: u32,
    pub file_version_lo: u32,
    pub product_version_hi: u32,
    pub product_version_lo: u32,
    pub file_flags_mask: u32,
    pub file_flags: u32,
    pub file_os: u32,
    pub file_type: u32,
    pub file_subtype: u32,
    pub file_date_hi: u32,
    pub file_date_lo: u32,
}

/// The expected value of `VS_FIXEDFILEINFO.signature`
pub const VS_FFI_SIGNATURE: u32 = 0xfeef04bd;

/// Information about a single thread from a dump
///
/// This struct matches the [Microsoft struct][msdn] of the same name.
///
/// [msdn]: https://docs.microsoft.com/en-us/windows/desktop/api/minidumpapiset/ns-minidumpapiset-_minidump_thread
#[derive(Clone, Debug, Pread, SizeWith)]
pub struct MINIDUMP_THREAD {
    /// The identifier of this thread
    pub thread_id: u32,
    /// The suspend count for this thread
    pub suspend_count: u32,
    pub priority_class: u32,
    pub priority: u32,
    /// The thread environment block
    pub teb: u64,
    /// The location and base address of this thread's stack memory
    pub stack: MINIDUMP_MEMORY_DESCRIPTOR,
    /// The location of a CPU-specific `CONTEXT_` struct for this thread's CPU context
    pub thread_context: MINIDUMP_LOCATION_DESCRIPTOR,
}

// The exception stream is a `MINIDUMP_EXCEPTION_STREAM`: the thread id, 4 bytes
// of alignment, then a `MINIDUMP_EXCEPTION` record. Truncated producers are common,
// so the decoder reads the handful of fields it needs at these fixed offsets
// instead of requiring the full 168-byte struct.

/// Offset of the id of the thread that encountered the exception.
pub const EXCEPTION_THREAD_ID_OFFSET: usize = 0;
/// Offset of `MINIDUMP_EXCEPTION.exception_code`.
pub const EXCEPTION_CODE_OFFSET: usize = 8;
/// Offset of `MINIDUMP_EXCEPTION.exception_flags`.
pub const EXCEPTION_FLAGS_OFFSET: usize = 12;
/// Offset of `MINIDUMP_EXCEPTION.exception_address`.
pub const EXCEPTION_ADDRESS_OFFSET: usize = 24;

/// Values for `MINIDUMP_EXCEPTION.exception_code` for crashes on Windows
///
/// These values primarily come from WinBase.h, WinNT.h and ntstatus.h, with a few
/// runtime-specific additions.
#[repr(u32)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, Primitive)]
pub enum ExceptionCodeWindows {
    DBG_CONTROL_C = 0x40010005,
    EXCEPTION_GUARD_PAGE = 0x80000001u32,
    EXCEPTION_DATATYPE_MISALIGNMENT = 0x80000002u32,
    EXCEPTION_BREAKPOINT = 0x80000003u32,
    EXCEPTION_SINGLE_STEP = 0x80000004u32,
    EXCEPTION_ACCESS_VIOLATION = 0xc0000005u32,
    EXCEPTION_IN_PAGE_ERROR = 0xc0000006u32,
    EXCEPTION_INVALID_HANDLE = 0xc0000008u32,
    EXCEPTION_ILLEGAL_INSTRUCTION = 0xc000001du32,
    EXCEPTION_NONCONTINUABLE_EXCEPTION = 0xc0000025u32,
    EXCEPTION_INVALID_DISPOSITION = 0xc0000026u32,
    EXCEPTION_BOUNDS_EXCEEDED = 0xc000008cu32,
    EXCEPTION_FLT_DENORMAL_OPERAND = 0xc000008du32,
    EXCEPTION_FLT_DIVIDE_BY_ZERO = 0xc000008eu32,
    EXCEPTION_FLT_INEXACT_RESULT = 0xc000008fu32,
    EXCEPTION_FLT_INVALID_OPERATION = 0xc0000090u32,
    EXCEPTION_FLT_OVERFLOW = 0xc0000091u32,
    EXCEPTION_FLT_STACK_CHECK = 0xc0000092u32,
    EXCEPTION_FLT_UNDERFLOW = 0xc0000093u32,
    EXCEPTION_INT_DIVIDE_BY_ZERO = 0xc0000094u32,
    EXCEPTION_INT_OVERFLOW = 0xc0000095u32,
    EXCEPTION_PRIV_INSTRUCTION = 0xc0000096u32,
    EXCEPTION_STACK_OVERFLOW = 0xc00000fdu32,
    STATUS_DLL_NOT_FOUND = 0xc0000135u32,
    STATUS_ENTRYPOINT_NOT_FOUND = 0xc0000139u32,
    STATUS_DLL_INIT_FAILED = 0xc0000142u32,
    EXCEPTION_POSSIBLE_DEADLOCK = 0xc0000194u32,
    STATUS_HEAP_CORRUPTION = 0xc0000374u32,
    STATUS_STACK_BUFFER_OVERRUN = 0xc0000409u32,
    /// Exception thrown by Chromium allocators to indicate OOM
    OUT_OF_MEMORY = 0xe0000008u32,
    /// Raised by the .NET runtime for managed exceptions ("\xE0COM")
    CLR_EXCEPTION = 0xe0434352u32,
    /// Per http://support.microsoft.com/kb/185294, generated by Visual C++ compiler
    UNHANDLED_CPP_EXCEPTION = 0xe06d7363u32,
}

/// Processor and operating system information
///
/// This struct matches the [Microsoft struct][msdn] of the same name.
///
/// [msdn]: https://docs.microsoft.com/en-us/windows/desktop/api/minidumpapiset/ns-minidumpapiset-_minidump_system_info
#[derive(Clone, Debug, Pread, SizeWith)]
pub struct MINIDUMP_SYSTEM_INFO {
    /// The system's processor architecture
    ///
    /// Known values are defined in [`ProcessorArchitecture`].
    pub processor_architecture: u16,
    /// x86 (5 = 586, 6 = 686 ...) or ARM (6 = ARMv6, 7 = ARMv7 ...) CPU level
    pub processor_level: u16,
    /// For x86, 0xMMSS where MM=model, SS=stepping
    pub processor_revision: u16,
    pub number_of_processors: u8,
    pub product_type: u8,
    pub major_version: u32,
    pub minor_version: u32,
    pub build_number: u32,
    /// The operating system platform
    ///
    /// Known values are defined in [`PlatformId`].
    pub platform_id: u32,
    /// An offset to a length-prefixed UTF-16LE service pack string.
    pub csd_version_rva: RVA,
    pub suite_mask: u16,
    pub reserved2: u16,
    /// The `CPU_INFORMATION` union, left uninterpreted.
    pub cpu: [u32; 6],
}

/// Known values of `MINIDUMP_SYSTEM_INFO.processor_architecture`
///
/// Taken from definitions in WinNT.h, plus the Breakpad-defined ARM64 value.
#[repr(u16)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, Primitive)]
pub enum ProcessorArchitecture {
    PROCESSOR_ARCHITECTURE_INTEL = 0,
    PROCESSOR_ARCHITECTURE_MIPS = 1,
    PROCESSOR_ARCHITECTURE_ALPHA = 2,
    PROCESSOR_ARCHITECTURE_PPC = 3,
    PROCESSOR_ARCHITECTURE_SHX = 4,
    PROCESSOR_ARCHITECTURE_ARM = 5,
    PROCESSOR_ARCHITECTURE_IA64 = 6,
    PROCESSOR_ARCHITECTURE_ALPHA64 = 7,
    /// Microsoft Intermediate Language
    PROCESSOR_ARCHITECTURE_MSIL = 8,
    PROCESSOR_ARCHITECTURE_AMD64 = 9,
    /// WoW64
    PROCESSOR_ARCHITECTURE_IA32_ON_WIN64 = 10,
    PROCESSOR_ARCHITECTURE_ARM64 = 12,
    /// Breakpad-defined value for ARM64
    PROCESSOR_ARCHITECTURE_ARM64_OLD = 0x8003,
    PROCESSOR_ARCHITECTURE_UNKNOWN = 0xffff,
}

/// Known values of `MINIDUMP_SYSTEM_INFO.platform_id`
#[repr(u32)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, Primitive)]
pub enum PlatformId {
    /// Windows 3.1
    VER_PLATFORM_WIN32s = 1,
    /// Windows 95-98-Me
    VER_PLATFORM_WIN32_WINDOWS = 2,
    /// Windows NT, 2000+
    VER_PLATFORM_WIN32_NT = 3,
    /// Windows CE, Windows Mobile
    VER_PLATFORM_WIN32_CE = 4,
}

/// The header of the `MemoryInfoListStream`.
///
/// This struct matches the [Microsoft struct][msdn] of the same name.
///
/// [msdn]: https://docs.microsoft.com/en-us/windows/desktop/api/minidumpapiset/ns-minidumpapiset-_minidump_memory_info_list
#[derive(Clone, Debug, Pread, SizeWith)]
pub struct MINIDUMP_MEMORY_INFO_LIST {
    /// The size of this header
    pub size_of_header: u32,
    /// The size of each entry in the list
    pub size_of_entry: u32,
    /// The number of entries in the list
    pub number_of_entries: u64,
}

/// Information about a memory region in a dump
///
/// This struct matches the [Microsoft struct][msdn] of the same name.
///
/// [msdn]: https://docs.microsoft.com/en-us/windows/desktop/api/minidumpapiset/ns-minidumpapiset-_minidump_memory_info
#[derive(Clone, Debug, Pread, SizeWith)]
pub struct MINIDUMP_MEMORY_INFO {
    /// The base address of the region of pages
    pub base_address: u64,
    /// The base address of a range of pages in this region
    pub allocation_base: u64,
    /// The memory protection when the region was initially allocated
    pub allocation_protection: u32,
    pub __alignment1: u32,
    /// The size of the region in which all pages have identical attributes, in bytes
    pub region_size: u64,
    /// The state of the pages in the region
    pub state: u32,
    /// The access protection of the pages in the region
    pub protection: u32,
    /// The type of pages in the region
    ///
    /// See [`MemoryType`] for valid values.
    pub _type: u32,
    pub __alignment2: u32,
}

bitflags! {
    /// Potential values for `MINIDUMP_MEMORY_INFO._type`
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct MemoryType: u32 {
        const MEM_PRIVATE = 0x00020000;
        const MEM_MAPPED  = 0x00040000;
        const MEM_IMAGE   = 0x01000000;
    }
}
