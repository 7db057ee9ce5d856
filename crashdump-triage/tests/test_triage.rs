// These tests run the built binary; `cargo test` puts its path in the env as
// `CARGO_BIN_EXE_<name>`.

use std::fs;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use crashdump_synth::*;
use tempfile::TempDir;
use test_assembler::*;

fn crashing_dump() -> Vec<u8> {
    let exe = DumpString::new("C:\\Games\\game.exe");
    let stack = Memory::with_section(
        Section::with_endian(Endian::Little).D64(0x1_4000_1000),
        0x7ff0_0000,
    );
    SynthMinidump::new()
        .add_system_info(SystemInfo::new())
        .add_module(Module::new(0x1_4000_0000, 0x10000, &exe, 0, 0))
        .add_thread(Thread::new(1, &stack))
        .add_exception(Exception::new(1, 0xc0000094, 0x1_4000_0100))
        .add_memory(stack)
        .add(exe)
        .finish()
        .unwrap()
}

fn triage(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_crashdump-triage"))
        .args(args)
        .env_remove("RUST_LOG")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .unwrap()
}

fn write_dump(dir: &Path, data: &[u8]) -> String {
    let path = dir.join("1042.dmp");
    fs::write(&path, data).unwrap();
    path.display().to_string()
}

#[test]
fn test_builtin() {
    let dir = TempDir::new().unwrap();
    let dump = write_dump(dir.path(), &crashing_dump());
    let out_dir = dir.path().display().to_string();
    let output = triage(&[&dump, "--backend", "builtin", "--output-dir", &out_dir]);

    assert!(output.status.success());
    assert_eq!(
        String::from_utf8(output.stdout).unwrap(),
        "Application:  C:\\Games\\game.exe\nCrash reason: 0xC0000094 - Integer division by zero\n"
    );
    assert_eq!(String::from_utf8(output.stderr).unwrap(), "");
    let report = fs::read_to_string(dir.path().join("analysis_1042.txt")).unwrap();
    assert!(report.contains("Analysis ID: 1042"));
    assert!(report.contains(" 1  0x0000000140001000  game.exe"));
}

#[test]
fn test_json() {
    let dir = TempDir::new().unwrap();
    let dump = write_dump(dir.path(), &crashing_dump());
    let out_dir = dir.path().display().to_string();
    let output = triage(&[
        &dump,
        "--backend",
        "builtin",
        "--output-dir",
        &out_dir,
        "--id",
        "T-7",
        "--json",
    ]);

    assert!(output.status.success());
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["exe_name"], "C:\\Games\\game.exe");
    assert_eq!(
        summary["crash_reason"],
        "0xC0000094 - Integer division by zero"
    );
    assert!(dir.path().join("analysis_T-7.txt").is_file());
}

#[test]
fn test_print_report() {
    let dir = TempDir::new().unwrap();
    let dump = write_dump(dir.path(), &crashing_dump());
    let out_dir = dir.path().display().to_string();
    let output = triage(&[
        &dump,
        "--backend",
        "builtin",
        "--output-dir",
        &out_dir,
        "--print-report",
    ]);

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.starts_with("Application:  C:\\Games\\game.exe\n"));
    assert!(stdout.contains("\nCrash dump analysis\nAnalysis ID: 1042\n"));
    assert!(stdout.contains("CPU: amd64"));
}

#[test]
fn test_invalid_dump_still_succeeds() {
    let dir = TempDir::new().unwrap();
    let dump = write_dump(dir.path(), b"this is not a crash dump at all, just text");
    let out_dir = dir.path().display().to_string();
    let output = triage(&[&dump, "--backend", "builtin", "--output-dir", &out_dir]);

    assert!(output.status.success());
    assert_eq!(
        String::from_utf8(output.stdout).unwrap(),
        "Application:  Invalid dump file\nCrash reason: not a valid dump\n"
    );
}

#[test]
fn test_text_scan() {
    let dir = TempDir::new().unwrap();
    let dump = write_dump(dir.path(), &crashing_dump());
    let out_dir = dir.path().display().to_string();
    let output = triage(&[&dump, "--backend", "text-scan", "--output-dir", &out_dir]);

    assert!(output.status.success());
    assert_eq!(
        String::from_utf8(output.stdout).unwrap(),
        "Application:  game.exe\nCrash reason: Unknown error\n"
    );
}

#[test]
fn test_native_without_debugger() {
    let dir = TempDir::new().unwrap();
    let dump = write_dump(dir.path(), &crashing_dump());
    let output = triage(&[
        &dump,
        "--backend",
        "native",
        "--debugger",
        "/definitely/not/cdb.exe",
    ]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("--backend native needs a debugger"));
}

#[test]
fn test_misuse() {
    let output = triage(&[]);
    assert_eq!(output.status.code(), Some(1));

    let output = triage(&["x.dmp", "--backend", "windbg"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_help() {
    let output = triage(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("--output-dir"));
    assert!(stdout.contains("text-scan"));
}
