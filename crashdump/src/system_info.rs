// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Information about the system that produced a crash dump.

use std::fmt;

use crashdump_common::format::{PlatformId, ProcessorArchitecture};
use num_traits::FromPrimitive;

/// Known operating systems
///
/// This is a slightly nicer layer over the `PlatformId` enum defined in crashdump-common.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Os {
    Windows,
    WindowsCe,
    Unknown(u32),
}

impl Os {
    /// Get an `Os` value matching the `platform_id` value from `MINIDUMP_SYSTEM_INFO`
    pub fn from_platform_id(id: u32) -> Os {
        match PlatformId::from_u32(id) {
            Some(PlatformId::VER_PLATFORM_WIN32s)
            | Some(PlatformId::VER_PLATFORM_WIN32_WINDOWS)
            | Some(PlatformId::VER_PLATFORM_WIN32_NT) => Os::Windows,
            Some(PlatformId::VER_PLATFORM_WIN32_CE) => Os::WindowsCe,
            None => Os::Unknown(id),
        }
    }

    /// Get a human-readable friendly name for an `Os`
    pub fn long_name(&self) -> String {
        match *self {
            Os::Windows => String::from("Windows NT"),
            Os::WindowsCe => String::from("Windows CE"),
            Os::Unknown(val) => format!("{val:#08x}"),
        }
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Os::Windows => write!(f, "windows"),
            Os::WindowsCe => write!(f, "windows-ce"),
            Os::Unknown(val) => write!(f, "{val:#08x}"),
        }
    }
}

/// Known CPU types
///
/// This is a slightly nicer layer over the `ProcessorArchitecture` enum defined in
/// crashdump-common.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Cpu {
    X86,
    X86_64,
    Arm,
    Arm64,
    Ia64,
    Unknown(u16),
}

impl Cpu {
    /// Get a `Cpu` value matching the `processor_architecture` value from `MINIDUMP_SYSTEM_INFO`
    pub fn from_processor_architecture(arch: u16) -> Cpu {
        match ProcessorArchitecture::from_u16(arch) {
            Some(ProcessorArchitecture::PROCESSOR_ARCHITECTURE_INTEL)
            | Some(ProcessorArchitecture::PROCESSOR_ARCHITECTURE_IA32_ON_WIN64) => Cpu::X86,
            Some(ProcessorArchitecture::PROCESSOR_ARCHITECTURE_AMD64) => Cpu::X86_64,
            Some(ProcessorArchitecture::PROCESSOR_ARCHITECTURE_ARM) => Cpu::Arm,
            Some(ProcessorArchitecture::PROCESSOR_ARCHITECTURE_ARM64)
            | Some(ProcessorArchitecture::PROCESSOR_ARCHITECTURE_ARM64_OLD) => Cpu::Arm64,
            Some(ProcessorArchitecture::PROCESSOR_ARCHITECTURE_IA64) => Cpu::Ia64,
            _ => Cpu::Unknown(arch),
        }
    }

    /// The native pointer width of this CPU.
    ///
    /// Anything that isn't known to be 32-bit is treated as 64-bit, including
    /// architectures this crate doesn't recognize.
    pub fn pointer_width(&self) -> PointerWidth {
        match self {
            Cpu::X86 | Cpu::Arm => PointerWidth::Bits32,
            Cpu::X86_64 | Cpu::Arm64 | Cpu::Ia64 | Cpu::Unknown(_) => PointerWidth::Bits64,
        }
    }
}

impl fmt::Display for Cpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Cpu::X86 => write!(f, "x86"),
            Cpu::X86_64 => write!(f, "amd64"),
            Cpu::Arm => write!(f, "arm"),
            Cpu::Arm64 => write!(f, "arm64"),
            Cpu::Ia64 => write!(f, "ia64"),
            Cpu::Unknown(val) => write!(f, "unknown ({val:#06x})"),
        }
    }
}

/// The width of a pointer on the system that produced the dump.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum PointerWidth {
    Bits32,
    #[default]
    Bits64,
}

impl PointerWidth {
    pub fn size_in_bytes(&self) -> usize {
        match self {
            PointerWidth::Bits32 => 4,
            PointerWidth::Bits64 => 8,
        }
    }

    /// Format `address` as `0x` followed by a fixed number of hex digits for this width.
    pub fn format_address(&self, address: u64) -> String {
        match self {
            PointerWidth::Bits32 => format!("{address:#010x}"),
            PointerWidth::Bits64 => format!("{address:#018x}"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_cpu_from_architecture() {
        assert_eq!(Cpu::from_processor_architecture(0), Cpu::X86);
        assert_eq!(Cpu::from_processor_architecture(5), Cpu::Arm);
        assert_eq!(Cpu::from_processor_architecture(6), Cpu::Ia64);
        assert_eq!(Cpu::from_processor_architecture(9), Cpu::X86_64);
        assert_eq!(Cpu::from_processor_architecture(12), Cpu::Arm64);
        assert_eq!(Cpu::from_processor_architecture(0x8003), Cpu::Arm64);
        assert_eq!(Cpu::from_processor_architecture(0xffff), Cpu::Unknown(0xffff));
        assert_eq!(Cpu::from_processor_architecture(0x1234), Cpu::Unknown(0x1234));
    }

    #[test]
    fn test_pointer_width() {
        assert_eq!(Cpu::X86.pointer_width(), PointerWidth::Bits32);
        assert_eq!(Cpu::Arm.pointer_width(), PointerWidth::Bits32);
        assert_eq!(Cpu::X86_64.pointer_width(), PointerWidth::Bits64);
        assert_eq!(Cpu::Unknown(7).pointer_width(), PointerWidth::Bits64);
    }

    #[test]
    fn test_format_address() {
        assert_eq!(PointerWidth::Bits32.format_address(0x1234), "0x00001234");
        assert_eq!(
            PointerWidth::Bits64.format_address(0x7ff6_1234_5678),
            "0x00007ff612345678"
        );
    }
}
