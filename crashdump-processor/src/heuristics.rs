// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Last-resort analysis: look for module names and fault codes in the raw bytes.
//!
//! This works on anything, including dumps too damaged for the structured
//! decoder, but it can only guess. Names are found in both UTF-8 and UTF-16LE
//! text since dumps store module paths as UTF-16.

use std::collections::HashSet;
use std::io::{self, Write};

use crashdump::read_dump_file;
use encoding_rs::UTF_16LE;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, error};

use crate::backend::{AnalysisBackend, AnalysisRequest};
use crate::classifier::{describe_fault_code, normalize_fault_code, UNKNOWN_ERROR};
use crate::process_state::Summary;
use crate::processor::write_artifact;

pub static RE_MODULE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b([a-z0-9_][a-z0-9_.\-]*\.(?:exe|dll))\b").expect("valid module name regex")
});
pub static RE_FAULT_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b0[xX][0-9A-Fa-f]{8}\b").expect("valid fault code regex"));

/// Libraries loaded into nearly every Windows process. Never the culprit's name.
const SYSTEM_LIBRARIES: &[&str] = &[
    "advapi32.dll",
    "bcrypt.dll",
    "bcryptprimitives.dll",
    "combase.dll",
    "gdi32.dll",
    "gdi32full.dll",
    "imm32.dll",
    "kernel32.dll",
    "kernelbase.dll",
    "msvcp140.dll",
    "msvcp_win.dll",
    "msvcrt.dll",
    "ntdll.dll",
    "ole32.dll",
    "oleaut32.dll",
    "rpcrt4.dll",
    "sechost.dll",
    "shell32.dll",
    "shlwapi.dll",
    "ucrtbase.dll",
    "user32.dll",
    "vcruntime140.dll",
    "vcruntime140_1.dll",
    "win32u.dll",
    "ws2_32.dll",
];

/// What a text scan turned up, in the order things were first seen.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanResult {
    /// Names ending in `.exe`.
    pub executables: Vec<String>,
    /// Names ending in `.dll`, minus well-known system libraries.
    pub libraries: Vec<String>,
    /// Normalized fault codes that the classifier knows.
    pub fault_codes: Vec<String>,
}

impl ScanResult {
    /// The best guess at the crashing program: the first executable, else the first library.
    pub fn exe_name(&self) -> Option<&str> {
        self.executables
            .first()
            .or_else(|| self.libraries.first())
            .map(String::as_str)
    }

    pub fn crash_reason(&self) -> String {
        match self.fault_codes.first() {
            Some(code) => match describe_fault_code(code) {
                Some(description) => format!("{code} - {description}"),
                None => code.clone(),
            },
            None => UNKNOWN_ERROR.to_owned(),
        }
    }

    pub fn summary(&self) -> Summary {
        Summary::new(
            self.exe_name().unwrap_or(Summary::UNKNOWN_APPLICATION),
            self.crash_reason(),
        )
    }

    /// Write the candidates to `f`, one section per kind.
    pub fn print<T: Write>(&self, f: &mut T) -> io::Result<()> {
        let sections = [
            ("Executables", &self.executables),
            ("Libraries", &self.libraries),
            ("Fault codes", &self.fault_codes),
        ];
        for (title, values) in sections {
            writeln!(f, "{title}:")?;
            if values.is_empty() {
                writeln!(f, "  <none>")?;
            }
            for value in values {
                writeln!(f, "  {value}")?;
            }
        }
        Ok(())
    }

    fn collect(&mut self, text: &str, seen: &mut HashSet<String>) {
        for name in RE_MODULE_NAME.find_iter(text) {
            let name = name.as_str();
            let key = name.to_ascii_lowercase();
            if SYSTEM_LIBRARIES.contains(&key.as_str()) || !seen.insert(key.clone()) {
                continue;
            }
            if key.ends_with(".exe") {
                self.executables.push(name.to_owned());
            } else {
                self.libraries.push(name.to_owned());
            }
        }
        for code in RE_FAULT_CODE.find_iter(text) {
            let code = normalize_fault_code(code.as_str());
            if describe_fault_code(&code).is_some() && !self.fault_codes.contains(&code) {
                self.fault_codes.push(code);
            }
        }
    }
}

/// Scan `bytes` for module names and known fault codes.
pub fn scan(bytes: &[u8]) -> ScanResult {
    let mut result = ScanResult::default();
    let mut seen = HashSet::new();

    result.collect(&String::from_utf8_lossy(bytes), &mut seen);
    // UTF-16 strings may start on either byte parity.
    for start in 0..2 {
        if let Some(bytes) = bytes.get(start..) {
            let (text, _) = UTF_16LE.decode_without_bom_handling(bytes);
            result.collect(&text, &mut seen);
        }
    }
    debug!(
        "Text scan found {} executables, {} libraries, {} fault codes",
        result.executables.len(),
        result.libraries.len(),
        result.fault_codes.len()
    );
    result
}

/// An [`AnalysisBackend`] built on [`scan`].
#[derive(Clone, Copy, Debug, Default)]
pub struct TextScan;

impl AnalysisBackend for TextScan {
    fn name(&self) -> &'static str {
        "text-scan"
    }

    fn analyze(&self, request: &AnalysisRequest) -> Summary {
        let data = match read_dump_file(&request.dump_path) {
            Ok(data) => data,
            Err(e) => {
                error!("Couldn't read dump: {}", e);
                let summary = Summary::analysis_error(e.to_string());
                write_artifact(request, self.name(), |f| {
                    writeln!(f, "{}", summary.exe_name)?;
                    writeln!(f, "{}", summary.crash_reason)
                });
                return summary;
            }
        };
        let result = scan(&data);
        write_artifact(request, self.name(), |f| {
            writeln!(f, "Dump size: {} bytes", data.len())?;
            writeln!(f)?;
            result.print(f)
        });
        result.summary()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn utf16(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(|unit| unit.to_le_bytes()).collect()
    }

    #[test]
    fn test_scan_nothing() {
        let result = scan(&[0xff, 0x00, 0x13, 0x37]);
        assert_eq!(result, ScanResult::default());
        assert_eq!(
            result.summary(),
            Summary::new("Unknown application", "Unknown error")
        );
    }

    #[test]
    fn test_scan_empty() {
        assert_eq!(scan(&[]), ScanResult::default());
    }

    #[test]
    fn test_scan_utf8() {
        let result = scan(b"\x00\x01loaded C:\\Windows\\ntdll.dll and helper.dll\x00\x02game.exe crashed 0xc0000005\x00");
        assert_eq!(result.executables, vec!["game.exe"]);
        assert_eq!(result.libraries, vec!["helper.dll"]);
        assert_eq!(result.fault_codes, vec!["0xC0000005"]);
        assert_eq!(
            result.summary(),
            Summary::new("game.exe", "0xC0000005 - Access Violation")
        );
    }

    #[test]
    fn test_scan_utf16() {
        let mut data = vec![0x4d, 0x44, 0x4d, 0x50, 0x93, 0xa7];
        data.extend(utf16("C:\\Program Files\\App\\app.exe"));
        data.extend([0, 0, 0]);
        data.extend(utf16("KERNEL32.DLL"));
        let result = scan(&data);
        assert_eq!(result.exe_name(), Some("app.exe"));
        assert!(result.libraries.is_empty());
    }

    #[test]
    fn test_unknown_codes_ignored() {
        let result = scan(b"0xDEADBEEF 0x80000003 0x80000003");
        assert_eq!(result.fault_codes, vec!["0x80000003"]);
        assert_eq!(result.crash_reason(), "0x80000003 - Breakpoint");
    }

    #[test]
    fn test_library_only() {
        let result = scan(b"plugin.dll");
        assert_eq!(result.exe_name(), Some("plugin.dll"));
    }

    #[test]
    fn test_print() {
        let result = scan(b"app.exe");
        let mut out = Vec::new();
        result.print(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Executables:\n  app.exe\nLibraries:\n  <none>\nFault codes:\n  <none>\n"
        );
    }
}
