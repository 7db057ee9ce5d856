// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Human-readable names for Windows fault codes.
//!
//! Codes arrive in two shapes: as the raw `u32` out of an exception stream, and
//! as text scraped from a debugger log or the raw bytes of a dump. Both end up
//! keyed by the same normalized `0xXXXXXXXX` string.

use std::collections::HashMap;

use crashdump_common::format::ExceptionCodeWindows;
use num_traits::FromPrimitive;
use once_cell::sync::Lazy;

/// Description used when a code isn't in the table.
pub const UNKNOWN_ERROR: &str = "Unknown error";

const DESCRIPTIONS: &[(ExceptionCodeWindows, &str)] = &[
    (ExceptionCodeWindows::EXCEPTION_ACCESS_VIOLATION, "Access Violation"),
    (ExceptionCodeWindows::EXCEPTION_BREAKPOINT, "Breakpoint"),
    (ExceptionCodeWindows::EXCEPTION_SINGLE_STEP, "Single Step"),
    (
        ExceptionCodeWindows::EXCEPTION_INT_DIVIDE_BY_ZERO,
        "Integer division by zero",
    ),
    (ExceptionCodeWindows::EXCEPTION_INT_OVERFLOW, "Integer overflow"),
    (ExceptionCodeWindows::EXCEPTION_STACK_OVERFLOW, "Stack Overflow"),
    (ExceptionCodeWindows::STATUS_DLL_NOT_FOUND, "DLL not found"),
    (
        ExceptionCodeWindows::STATUS_ENTRYPOINT_NOT_FOUND,
        "Entry point not found",
    ),
    (
        ExceptionCodeWindows::STATUS_DLL_INIT_FAILED,
        "DLL initialization failed",
    ),
    (ExceptionCodeWindows::CLR_EXCEPTION, ".NET exception"),
    (
        ExceptionCodeWindows::STATUS_STACK_BUFFER_OVERRUN,
        "Stack buffer overflow",
    ),
    (ExceptionCodeWindows::DBG_CONTROL_C, "Control-C"),
    (ExceptionCodeWindows::EXCEPTION_GUARD_PAGE, "Guard page violation"),
    (
        ExceptionCodeWindows::EXCEPTION_DATATYPE_MISALIGNMENT,
        "Datatype misalignment",
    ),
    (ExceptionCodeWindows::EXCEPTION_IN_PAGE_ERROR, "In-page error"),
    (ExceptionCodeWindows::EXCEPTION_INVALID_HANDLE, "Invalid handle"),
    (
        ExceptionCodeWindows::EXCEPTION_ILLEGAL_INSTRUCTION,
        "Illegal instruction",
    ),
    (
        ExceptionCodeWindows::EXCEPTION_NONCONTINUABLE_EXCEPTION,
        "Noncontinuable exception",
    ),
    (
        ExceptionCodeWindows::EXCEPTION_INVALID_DISPOSITION,
        "Invalid disposition",
    ),
    (
        ExceptionCodeWindows::EXCEPTION_BOUNDS_EXCEEDED,
        "Array bounds exceeded",
    ),
    (
        ExceptionCodeWindows::EXCEPTION_FLT_DENORMAL_OPERAND,
        "Floating-point denormal operand",
    ),
    (
        ExceptionCodeWindows::EXCEPTION_FLT_DIVIDE_BY_ZERO,
        "Floating-point division by zero",
    ),
    (
        ExceptionCodeWindows::EXCEPTION_FLT_INEXACT_RESULT,
        "Floating-point inexact result",
    ),
    (
        ExceptionCodeWindows::EXCEPTION_FLT_INVALID_OPERATION,
        "Floating-point invalid operation",
    ),
    (ExceptionCodeWindows::EXCEPTION_FLT_OVERFLOW, "Floating-point overflow"),
    (
        ExceptionCodeWindows::EXCEPTION_FLT_STACK_CHECK,
        "Floating-point stack check",
    ),
    (
        ExceptionCodeWindows::EXCEPTION_FLT_UNDERFLOW,
        "Floating-point underflow",
    ),
    (
        ExceptionCodeWindows::EXCEPTION_PRIV_INSTRUCTION,
        "Privileged instruction",
    ),
    (
        ExceptionCodeWindows::EXCEPTION_POSSIBLE_DEADLOCK,
        "Possible deadlock",
    ),
    (ExceptionCodeWindows::STATUS_HEAP_CORRUPTION, "Heap corruption"),
    (ExceptionCodeWindows::OUT_OF_MEMORY, "Out of memory"),
    (
        ExceptionCodeWindows::UNHANDLED_CPP_EXCEPTION,
        "Unhandled C++ exception",
    ),
];

/// Normalized code text -> description. Built once, never mutated.
static FAULT_CODES: Lazy<HashMap<String, &'static str>> = Lazy::new(|| {
    DESCRIPTIONS
        .iter()
        .map(|&(code, description)| (format_fault_code(code as u32), description))
        .collect()
});

/// Format a fault code the way the table keys are written, e.g. `0xC0000005`.
pub fn format_fault_code(code: u32) -> String {
    format!("0x{code:08X}")
}

/// Canonicalize fault code text.
///
/// Surrounding whitespace and an optional `0x`/`0X` prefix are stripped, the
/// digits are uppercased and `0x` is put back. No zero padding is applied, so
/// `"0x5"` stays `"0x5"`.
pub fn normalize_fault_code(code: &str) -> String {
    let code = code.trim();
    let digits = match code.get(..2) {
        Some("0x") | Some("0X") => &code[2..],
        _ => code,
    };
    format!("0x{}", digits.to_uppercase())
}

/// Look up the description of a fault code given as text, if it is known.
pub fn describe_fault_code(code: &str) -> Option<&'static str> {
    FAULT_CODES.get(&normalize_fault_code(code)).copied()
}

/// Like [`describe_fault_code`], but falls back to [`UNKNOWN_ERROR`].
pub fn classify_fault_code(code: &str) -> &'static str {
    describe_fault_code(code).unwrap_or(UNKNOWN_ERROR)
}

/// The symbolic name of a fault code, e.g. `EXCEPTION_ACCESS_VIOLATION`.
pub fn fault_code_name(code: u32) -> Option<ExceptionCodeWindows> {
    ExceptionCodeWindows::from_u32(code)
}

/// The crash reason line for an exception code.
///
/// Known codes read `"0xC0000005 - Access Violation"`, anything else is just the
/// formatted code.
pub fn crash_reason_for(code: u32) -> String {
    let formatted = format_fault_code(code);
    match describe_fault_code(&formatted) {
        Some(description) => format!("{formatted} - {description}"),
        None => formatted,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_fault_code("c0000005"), "0xC0000005");
        assert_eq!(normalize_fault_code("0xc0000005"), "0xC0000005");
        assert_eq!(normalize_fault_code("0XC0000005"), "0xC0000005");
        assert_eq!(normalize_fault_code(" \tC0000005 \n"), "0xC0000005");
        assert_eq!(normalize_fault_code("0x5"), "0x5");
        assert_eq!(normalize_fault_code(""), "0x");
    }

    #[test]
    fn test_equivalent_spellings() {
        for code in ["c0000005", "0xC0000005", " C0000005 "] {
            assert_eq!(classify_fault_code(code), "Access Violation");
        }
    }

    #[test]
    fn test_known_codes() {
        assert_eq!(classify_fault_code("0x80000003"), "Breakpoint");
        assert_eq!(classify_fault_code("0x80000004"), "Single Step");
        assert_eq!(classify_fault_code("0xC0000094"), "Integer division by zero");
        assert_eq!(classify_fault_code("0xC0000095"), "Integer overflow");
        assert_eq!(classify_fault_code("0xC00000FD"), "Stack Overflow");
        assert_eq!(classify_fault_code("0xC0000135"), "DLL not found");
        assert_eq!(classify_fault_code("0xC0000139"), "Entry point not found");
        assert_eq!(classify_fault_code("0xC0000142"), "DLL initialization failed");
        assert_eq!(classify_fault_code("0xE0434352"), ".NET exception");
        assert_eq!(classify_fault_code("0xC0000409"), "Stack buffer overflow");
        assert_eq!(classify_fault_code("e06d7363"), "Unhandled C++ exception");
    }

    #[test]
    fn test_unknown_codes() {
        assert_eq!(describe_fault_code("0xDEADBEEF"), None);
        assert_eq!(classify_fault_code("0xDEADBEEF"), UNKNOWN_ERROR);
        assert_eq!(classify_fault_code("not a code"), UNKNOWN_ERROR);
        // No zero padding, so a short spelling doesn't match.
        assert_eq!(classify_fault_code("0xC000005"), UNKNOWN_ERROR);
    }

    #[test]
    fn test_every_entry_is_reachable() {
        assert_eq!(FAULT_CODES.len(), DESCRIPTIONS.len());
        for &(code, description) in DESCRIPTIONS {
            assert_eq!(describe_fault_code(&format_fault_code(code as u32)), Some(description));
        }
    }

    #[test]
    fn test_crash_reason() {
        assert_eq!(crash_reason_for(0xc0000005), "0xC0000005 - Access Violation");
        assert_eq!(crash_reason_for(0xdeadbeef), "0xDEADBEEF");
        assert_eq!(crash_reason_for(0x5), "0x00000005");
    }

    #[test]
    fn test_fault_code_name() {
        assert_eq!(
            fault_code_name(0xc00000fd),
            Some(ExceptionCodeWindows::EXCEPTION_STACK_OVERFLOW)
        );
        assert_eq!(fault_code_name(0x1234), None);
    }
}
