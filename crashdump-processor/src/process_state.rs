// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

use std::io;
use std::io::prelude::*;

use crashdump::system_info::PointerWidth;
use crashdump::{MemoryRegion, MinidumpException, MinidumpModuleList, MinidumpSystemInfo};
use serde::Serialize;
use serde_json::json;

use crate::classifier::{crash_reason_for, fault_code_name, UNKNOWN_ERROR};
use crate::stackwalker::{basename, CallStack, CallStackInfo};

/// The most modules listed in a report.
pub const MAX_REPORTED_MODULES: usize = 20;
/// The most memory regions kept in a report.
pub const MAX_MEMORY_REGIONS: usize = 5;

/// The two-line verdict handed back to whoever asked for an analysis.
///
/// There is always a `Summary`, even when the dump couldn't be read at all;
/// the failure is spelled out in its fields instead.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Summary {
    /// The crashing executable, or one of the sentinel values below.
    pub exe_name: String,
    /// The fault code and its description, or an explanation of why there is none.
    pub crash_reason: String,
}

impl Summary {
    pub const UNKNOWN_APPLICATION: &'static str = "Unknown application";
    pub const INVALID_DUMP_FILE: &'static str = "Invalid dump file";
    pub const ANALYSIS_ERRORS: &'static str = "Errors in the analysis";
    pub const ANALYSIS_CANCELED: &'static str = "Analysis canceled";
    pub const DEBUGGER_UNRESPONSIVE: &'static str =
        "The debugger did not respond within the expected time.";

    pub fn new(exe_name: impl Into<String>, crash_reason: impl Into<String>) -> Summary {
        Summary {
            exe_name: exe_name.into(),
            crash_reason: crash_reason.into(),
        }
    }

    /// The analysis itself failed, `message` says how.
    pub fn analysis_error(message: impl Into<String>) -> Summary {
        Summary::new(Summary::ANALYSIS_ERRORS, message)
    }

    /// An external debugger had to be killed.
    pub fn analysis_canceled() -> Summary {
        Summary::new(Summary::ANALYSIS_CANCELED, Summary::DEBUGGER_UNRESPONSIVE)
    }
}

/// What the header check made of the input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DumpVerdict {
    /// Header and signature are fine, the streams were decoded.
    Valid,
    /// Not even enough bytes for a header.
    TooSmall,
    /// The first four bytes aren't `MDMP`.
    InvalidSignature { found: u32 },
    /// The file couldn't be read.
    Unreadable(String),
}

/// Everything learned about a single dump.
///
/// Built fresh for every analysis and rendered with [`AnalysisReport::print`] or
/// [`AnalysisReport::print_json`]. Sections whose stream was missing or broken
/// are `None`/empty; broken ones also leave a note in `diagnostics`.
#[derive(Clone, Debug)]
pub struct AnalysisReport {
    /// Size of the dump in bytes.
    pub dump_size: usize,
    pub verdict: DumpVerdict,
    pub system_info: Option<MinidumpSystemInfo>,
    /// All modules, in dump order. Only the first `MAX_REPORTED_MODULES` are printed.
    pub modules: MinidumpModuleList,
    pub exception: Option<MinidumpException>,
    /// The crashing thread's stack.
    pub call_stack: CallStack,
    /// At most `MAX_MEMORY_REGIONS` regions, in dump order.
    pub memory_regions: Vec<MemoryRegion>,
    /// One line per stream that was present but couldn't be decoded.
    pub diagnostics: Vec<String>,
}

impl AnalysisReport {
    /// A report for input that never got past the header check.
    pub fn rejected(dump_size: usize, verdict: DumpVerdict) -> AnalysisReport {
        AnalysisReport {
            dump_size,
            verdict,
            system_info: None,
            modules: MinidumpModuleList::new(),
            exception: None,
            call_stack: CallStack::with_info(
                CallStackInfo::MissingException,
                PointerWidth::default(),
            ),
            memory_regions: vec![],
            diagnostics: vec![],
        }
    }

    /// How addresses in this report are formatted.
    pub fn pointer_width(&self) -> PointerWidth {
        self.call_stack.pointer_width
    }

    /// The crashing executable, if there were any modules.
    pub fn process_name(&self) -> Option<&str> {
        self.modules.main_module().map(|module| module.code_file())
    }

    /// The crash reason, see [`crash_reason_for`].
    pub fn crash_reason(&self) -> String {
        match &self.exception {
            Some(exception) => crash_reason_for(exception.exception_code),
            None => UNKNOWN_ERROR.to_owned(),
        }
    }

    /// Boil the report down to a [`Summary`].
    pub fn summary(&self) -> Summary {
        match &self.verdict {
            DumpVerdict::Valid => Summary::new(
                self.process_name().unwrap_or(Summary::UNKNOWN_APPLICATION),
                self.crash_reason(),
            ),
            DumpVerdict::TooSmall => Summary::new(Summary::INVALID_DUMP_FILE, "file too small"),
            DumpVerdict::InvalidSignature { .. } => {
                Summary::new(Summary::INVALID_DUMP_FILE, "not a valid dump")
            }
            DumpVerdict::Unreadable(message) => Summary::analysis_error(message.as_str()),
        }
    }

    fn signature_check(&self) -> String {
        match &self.verdict {
            DumpVerdict::Valid => String::from("OK (MDMP)"),
            DumpVerdict::TooSmall => String::from("failed, file too small"),
            DumpVerdict::InvalidSignature { found } => {
                format!("failed, missing magic signature (found {found:#010x})")
            }
            DumpVerdict::Unreadable(_) => String::from("not performed"),
        }
    }

    fn status(&self) -> &'static str {
        match self.verdict {
            DumpVerdict::Valid => "OK",
            DumpVerdict::TooSmall => "ERROR_TOO_SMALL",
            DumpVerdict::InvalidSignature { .. } => "ERROR_INVALID_SIGNATURE",
            DumpVerdict::Unreadable(_) => "ERROR_UNREADABLE",
        }
    }

    fn module_range(&self, base: u64, size: u64) -> String {
        let width = self.pointer_width();
        format!(
            "{} - {}",
            width.format_address(base),
            width.format_address(last_address(base, size))
        )
    }

    /// Write a human-readable description of the analysis to `f`.
    ///
    /// The sections always appear in the same order, so two runs over the same
    /// bytes produce the same text.
    pub fn print<T: Write>(&self, f: &mut T) -> io::Result<()> {
        if let DumpVerdict::Unreadable(message) = &self.verdict {
            writeln!(f, "{}", Summary::ANALYSIS_ERRORS)?;
            writeln!(f, "{message}")?;
            return Ok(());
        }
        writeln!(f, "Dump size: {} bytes", self.dump_size)?;
        writeln!(f, "Signature check: {}", self.signature_check())?;
        if self.verdict != DumpVerdict::Valid {
            return Ok(());
        }
        writeln!(f)?;

        match &self.system_info {
            Some(system_info) => {
                writeln!(f, "Operating system: {}", system_info.os.long_name())?;
                writeln!(f, "                  {}", system_info.os_version())?;
                writeln!(f, "CPU: {}", system_info.cpu)?;
                writeln!(f, "     {} CPUs", system_info.cpu_count())?;
            }
            None => {
                writeln!(f, "Operating system: Unknown")?;
                writeln!(f, "CPU: Unknown")?;
            }
        }
        writeln!(f)?;

        writeln!(
            f,
            "Process name: {}",
            self.process_name().unwrap_or(Summary::UNKNOWN_APPLICATION)
        )?;
        match &self.exception {
            Some(exception) => {
                writeln!(f, "Crash reason:  {}", self.crash_reason())?;
                if let Some(name) = fault_code_name(exception.exception_code) {
                    writeln!(f, "               {name:?}")?;
                }
                writeln!(
                    f,
                    "Crash address: {}",
                    self.pointer_width()
                        .format_address(exception.get_crash_address())
                )?;
                writeln!(
                    f,
                    "Crash thread:  {} ({:#x})",
                    exception.thread_id, exception.thread_id
                )?;
            }
            None => {
                writeln!(f, "Crash reason:  {UNKNOWN_ERROR}")?;
                writeln!(f, "Crash address: Unknown")?;
            }
        }

        write!(
            f,
            "
Loaded modules ({}):
",
            self.modules.len()
        )?;
        if self.modules.is_empty() {
            writeln!(f, "Unknown")?;
        }
        let main_address = self.modules.main_module().map(|m| m.base_address());
        for module in self.modules.iter().take(MAX_REPORTED_MODULES) {
            write!(
                f,
                "{}  {}",
                self.module_range(module.base_address(), module.size()),
                basename(module.code_file())
            )?;
            if main_address == Some(module.base_address()) {
                write!(f, "  (main)")?;
            }
            writeln!(f)?;
        }
        if self.modules.len() > MAX_REPORTED_MODULES {
            writeln!(f, "... and {} more", self.modules.len() - MAX_REPORTED_MODULES)?;
        }

        write!(
            f,
            "
Call stack:
"
        )?;
        self.call_stack.print(f)?;

        write!(
            f,
            "
Memory regions:
"
        )?;
        if self.memory_regions.is_empty() {
            writeln!(f, "Unknown")?;
        }
        for region in &self.memory_regions {
            writeln!(
                f,
                "{}  {}",
                self.module_range(region.address, region.size),
                region.kind
            )?;
        }

        if !self.diagnostics.is_empty() {
            write!(
                f,
                "
Diagnostics:
"
            )?;
            for note in &self.diagnostics {
                writeln!(f, "  {note}")?;
            }
        }
        Ok(())
    }

    /// Outputs the report as json.
    pub fn print_json<T: Write>(&self, f: &mut T, pretty: bool) -> Result<(), serde_json::Error> {
        let width = self.pointer_width();
        let summary = self.summary();

        let output = json!({
            // OK | ERROR_TOO_SMALL | ERROR_INVALID_SIGNATURE | ERROR_UNREADABLE
            "status": self.status(),
            "dump_size": self.dump_size,
            "signature_check": self.signature_check(),
            "summary": summary,
            // optional
            "system_info": self.system_info.as_ref().map(|sys| json!({
                // Windows NT | Windows CE | Unknown (0x...)
                "os": sys.os.long_name(),
                "os_ver": sys.os_version(),
                // x86 | amd64 | arm | arm64 | ia64
                "cpu_arch": sys.cpu.to_string(),
                "cpu_count": sys.cpu_count(),
            })),
            // optional
            "process_name": self.process_name(),
            // optional
            "crash_info": self.exception.as_ref().map(|exception| json!({
                "type": format!("0x{:08X}", exception.exception_code),
                "name": fault_code_name(exception.exception_code).map(|name| format!("{name:?}")),
                "reason": self.crash_reason(),
                "address": width.format_address(exception.get_crash_address()),
                "flags": exception.exception_flags,
                "crashing_thread": exception.thread_id,
            })),
            "module_count": self.modules.len(),
            "modules": self.modules.iter().take(MAX_REPORTED_MODULES).map(|module| json!({
                "base_addr": width.format_address(module.base_address()),
                "end_addr": width.format_address(last_address(module.base_address(), module.size())),
                "filename": basename(module.code_file()),
                "code_file": module.code_file(),
            })).collect::<Vec<_>>(),
            "call_stack": self.call_stack.to_json(),
            "memory_regions": self.memory_regions.iter().map(|region| json!({
                "address": width.format_address(region.address),
                "size": region.size,
                // private | mapped | image | unknown
                "kind": region.kind.to_string(),
            })).collect::<Vec<_>>(),
            "diagnostics": self.diagnostics,
        });

        if pretty {
            serde_json::to_writer_pretty(f, &output)
        } else {
            serde_json::to_writer(f, &output)
        }
    }
}

/// The last byte of a range; ranges are printed inclusive of both ends.
fn last_address(base: u64, size: u64) -> u64 {
    base.saturating_add(size.saturating_sub(1))
}

#[cfg(test)]
mod test {
    use super::*;

    fn printed(report: &AnalysisReport) -> String {
        let mut out = Vec::new();
        report.print(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_rejected_summaries() {
        let report = AnalysisReport::rejected(10, DumpVerdict::TooSmall);
        assert_eq!(
            report.summary(),
            Summary::new("Invalid dump file", "file too small")
        );
        assert!(printed(&report).contains("file too small"));

        let report =
            AnalysisReport::rejected(64, DumpVerdict::InvalidSignature { found: 0x04034b50 });
        assert_eq!(
            report.summary(),
            Summary::new("Invalid dump file", "not a valid dump")
        );
        let text = printed(&report);
        assert!(text.contains("missing magic signature"));
        assert!(text.contains("Dump size: 64 bytes"));
        assert!(!text.contains("Loaded modules"));
    }

    #[test]
    fn test_unreadable() {
        let report =
            AnalysisReport::rejected(0, DumpVerdict::Unreadable(String::from("File not found")));
        assert_eq!(
            report.summary(),
            Summary::new("Errors in the analysis", "File not found")
        );
        assert_eq!(printed(&report), "Errors in the analysis\nFile not found\n");
    }

    #[test]
    fn test_valid_but_empty() {
        let mut report = AnalysisReport::rejected(32, DumpVerdict::Valid);
        report.diagnostics.push(String::from("SystemInfoStream: Error reading stream"));
        assert_eq!(
            report.summary(),
            Summary::new("Unknown application", "Unknown error")
        );
        let text = printed(&report);
        assert!(text.contains("Operating system: Unknown"));
        assert!(text.contains("Process name: Unknown application"));
        assert!(text.contains("Crash reason:  Unknown error"));
        assert!(text.contains("Diagnostics:\n  SystemInfoStream: Error reading stream\n"));
    }

    #[test]
    fn test_summary_serializes() {
        let summary = Summary::analysis_canceled();
        assert_eq!(
            serde_json::to_value(&summary).unwrap(),
            json!({
                "exe_name": "Analysis canceled",
                "crash_reason": "The debugger did not respond within the expected time.",
            })
        );
    }

    #[test]
    fn test_json_status() {
        let report = AnalysisReport::rejected(3, DumpVerdict::TooSmall);
        let mut out = Vec::new();
        report.print_json(&mut out, false).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["status"], "ERROR_TOO_SMALL");
        assert_eq!(value["summary"]["crash_reason"], "file too small");
        assert!(value["crash_info"].is_null());
    }
}
