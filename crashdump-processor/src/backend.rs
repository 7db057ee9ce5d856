// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! The different ways a dump can be turned into a [`Summary`].

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::thread;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, error, warn};

use crate::classifier::{describe_fault_code, normalize_fault_code, UNKNOWN_ERROR};
use crate::process_state::Summary;
use crate::processor::{artifact_file_name, process_path, sanitize_analysis_id, write_artifact};

/// How long a debugger may run before it is killed.
pub const DEFAULT_DEBUGGER_TIMEOUT: Duration = Duration::from_secs(60);

/// Where the Windows SDK installs the console debugger.
pub const WELL_KNOWN_DEBUGGER_PATHS: &[&str] = &[
    r"C:\Program Files (x86)\Windows Kits\10\Debuggers\x64\cdb.exe",
    r"C:\Program Files\Windows Kits\10\Debuggers\x64\cdb.exe",
];

/// Debugger arguments; `{dump}` is replaced by the dump path.
pub const DEFAULT_DEBUGGER_ARGS: &[&str] = &["-z", "{dump}", "-c", "!analyze -v; q"];

pub static RE_PROCESS_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"PROCESS_NAME:\s+(\S+)").expect("valid process name regex"));
pub static RE_IMAGE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"IMAGE_NAME:\s+(\S+)").expect("valid image name regex"));
pub static RE_EXCEPTION_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"ExceptionCode:\s+(\S+)").expect("valid exception code regex"));

/// Errors from running an external debugger.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Debugger not found: {0}")]
    ExternalToolUnavailable(String),
    #[error("Debugger did not finish within {}s", .0.as_secs())]
    ExternalToolTimeout(Duration),
    #[error("Debugger failed: {0}")]
    ExternalToolFailed(String),
}

impl BackendError {
    /// Returns just the name of the error, as a more human-friendly version of
    /// an error-code for error logging.
    pub fn name(&self) -> &'static str {
        match self {
            BackendError::ExternalToolUnavailable(_) => "ExternalToolUnavailable",
            BackendError::ExternalToolTimeout(_) => "ExternalToolTimeout",
            BackendError::ExternalToolFailed(_) => "ExternalToolFailed",
        }
    }

    /// The `Summary` reported when a debugger run ends in this error.
    pub fn summary(&self) -> Summary {
        match self {
            BackendError::ExternalToolUnavailable(_) => {
                Summary::new(Summary::UNKNOWN_APPLICATION, "Debugger not found")
            }
            BackendError::ExternalToolTimeout(_) => Summary::analysis_canceled(),
            BackendError::ExternalToolFailed(message) => Summary::analysis_error(message.as_str()),
        }
    }
}

/// One dump to analyze and where its artifact goes.
#[derive(Clone, Debug)]
pub struct AnalysisRequest {
    pub dump_path: PathBuf,
    /// The caller's identifier, e.g. a ticket number. Sanitized before use in file names.
    pub analysis_id: String,
    pub output_dir: PathBuf,
}

impl AnalysisRequest {
    pub fn new(
        dump_path: impl Into<PathBuf>,
        analysis_id: impl Into<String>,
        output_dir: impl Into<PathBuf>,
    ) -> AnalysisRequest {
        AnalysisRequest {
            dump_path: dump_path.into(),
            analysis_id: analysis_id.into(),
            output_dir: output_dir.into(),
        }
    }

    pub fn sanitized_id(&self) -> String {
        sanitize_analysis_id(&self.analysis_id)
    }

    /// Where this request's artifact is written.
    pub fn artifact_path(&self) -> PathBuf {
        self.output_dir.join(artifact_file_name(&self.analysis_id))
    }
}

/// Something that can analyze a dump.
///
/// Implementations always write exactly one artifact to
/// [`AnalysisRequest::artifact_path`] and always return a `Summary`, using the
/// sentinel values on [`Summary`] to describe failures.
pub trait AnalysisBackend: Send + Sync {
    fn name(&self) -> &'static str;
    fn analyze(&self, request: &AnalysisRequest) -> Summary;
}

/// Decodes the dump's streams directly, see [`process_dump`](crate::process_dump).
#[derive(Clone, Copy, Debug, Default)]
pub struct BuiltinDecoder;

impl AnalysisBackend for BuiltinDecoder {
    fn name(&self) -> &'static str {
        "builtin"
    }

    fn analyze(&self, request: &AnalysisRequest) -> Summary {
        let report = process_path(&request.dump_path);
        write_artifact(request, self.name(), |f| report.print(f));
        report.summary()
    }
}

/// Runs an external console debugger on the dump and scrapes its output.
#[derive(Clone, Debug)]
pub struct NativeTool {
    path: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl NativeTool {
    pub fn new(path: impl Into<PathBuf>) -> NativeTool {
        NativeTool {
            path: path.into(),
            args: DEFAULT_DEBUGGER_ARGS.iter().map(|arg| arg.to_string()).collect(),
            timeout: DEFAULT_DEBUGGER_TIMEOUT,
        }
    }

    /// Replace the debugger arguments. `{dump}` in any argument is replaced by the dump path.
    pub fn with_args<I, S>(mut self, args: I) -> NativeTool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> NativeTool {
        self.timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run the debugger on `dump` and return what it printed.
    ///
    /// The debugger is killed and reaped if it is still running after the
    /// timeout. This blocks, and can be called from inside an async runtime.
    pub fn run(&self, dump: &Path) -> Result<String, BackendError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return self.run_blocking(dump);
        }
        // A runtime can't be started from within one, so give the debugger its own thread.
        debug!("Already inside a runtime, running the debugger on a separate thread");
        thread::scope(|scope| {
            scope
                .spawn(|| self.run_blocking(dump))
                .join()
                .unwrap_or_else(|_| {
                    Err(BackendError::ExternalToolFailed(String::from(
                        "debugger thread panicked",
                    )))
                })
        })
    }

    fn run_blocking(&self, dump: &Path) -> Result<String, BackendError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| BackendError::ExternalToolFailed(e.to_string()))?;
        runtime.block_on(self.run_async(dump))
    }

    async fn run_async(&self, dump: &Path) -> Result<String, BackendError> {
        let dump = dump.display().to_string();
        let mut command = Command::new(&self.path);
        command
            .args(self.args.iter().map(|arg| arg.replace("{dump}", &dump)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let mut child = command
            .spawn()
            .map_err(|e| BackendError::ExternalToolFailed(e.to_string()))?;
        let mut stdout = child.stdout.take().ok_or_else(|| {
            BackendError::ExternalToolFailed(String::from("debugger stdout was not captured"))
        })?;

        let finished = tokio::time::timeout(self.timeout, async {
            let mut output = Vec::new();
            stdout.read_to_end(&mut output).await?;
            let status = child.wait().await?;
            Ok::<_, io::Error>((status, output))
        })
        .await;

        match finished {
            Ok(Ok((status, output))) => {
                debug!("{} exited with {}", self.path.display(), status);
                Ok(String::from_utf8_lossy(&output).into_owned())
            }
            Ok(Err(e)) => Err(BackendError::ExternalToolFailed(e.to_string())),
            Err(_) => {
                error!(
                    "{} timed out after {}s",
                    self.path.display(),
                    self.timeout.as_secs()
                );
                if let Err(e) = child.start_kill() {
                    warn!("Failed to kill {}: {}", self.path.display(), e);
                }
                // Reap it so no zombie outlives this call.
                if let Err(e) = child.wait().await {
                    warn!("Failed to wait for {}: {}", self.path.display(), e);
                }
                Err(BackendError::ExternalToolTimeout(self.timeout))
            }
        }
    }
}

impl AnalysisBackend for NativeTool {
    fn name(&self) -> &'static str {
        "native"
    }

    fn analyze(&self, request: &AnalysisRequest) -> Summary {
        match self.run(&request.dump_path) {
            Ok(output) => {
                write_artifact(request, self.name(), |f| f.write_all(output.as_bytes()));
                scrape_output(&output)
            }
            Err(e) => {
                warn!("Debugger run failed: {}", e.name());
                let summary = e.summary();
                write_artifact(request, self.name(), |f| write_summary(f, &summary));
                summary
            }
        }
    }
}

fn write_summary<W: Write>(f: &mut W, summary: &Summary) -> io::Result<()> {
    writeln!(f, "{}", summary.exe_name)?;
    writeln!(f, "{}", summary.crash_reason)
}

/// Pull the process name and fault code out of a debugger's `!analyze -v` output.
pub fn scrape_output(output: &str) -> Summary {
    let exe_name = RE_PROCESS_NAME
        .captures(output)
        .or_else(|| RE_IMAGE_NAME.captures(output))
        .and_then(|captures| captures.get(1))
        .map(|name| name.as_str())
        .unwrap_or(Summary::UNKNOWN_APPLICATION);

    let crash_reason = match RE_EXCEPTION_CODE
        .captures(output)
        .and_then(|captures| captures.get(1))
    {
        Some(code) => {
            let code = normalize_fault_code(code.as_str());
            match describe_fault_code(&code) {
                Some(description) => format!("{code} - {description}"),
                None => code,
            }
        }
        None => UNKNOWN_ERROR.to_owned(),
    };
    Summary::new(exe_name, crash_reason)
}

#[cfg(test)]
mod test {
    use super::*;

    const CDB_OUTPUT: &str = "\
Microsoft (R) Windows Debugger Version 10.0.22621.1 AMD64

ExceptionAddress: 00007ff6a1b21234 (app!main+0x34)
   ExceptionCode: c0000005 (Access violation)
  ExceptionFlags: 00000000

IMAGE_NAME:  app.exe

PROCESS_NAME:  app.exe
";

    #[test]
    fn test_scrape_output() {
        assert_eq!(
            scrape_output(CDB_OUTPUT),
            Summary::new("app.exe", "0xC0000005 - Access Violation")
        );
    }

    #[test]
    fn test_scrape_image_name_fallback() {
        let output = "IMAGE_NAME:  helper.dll\nExceptionCode: deadbeef\n";
        assert_eq!(
            scrape_output(output),
            Summary::new("helper.dll", "0xDEADBEEF")
        );
    }

    #[test]
    fn test_scrape_nothing() {
        assert_eq!(
            scrape_output("*** ERROR: Symbol file could not be found."),
            Summary::new("Unknown application", "Unknown error")
        );
    }

    #[test]
    fn test_error_summaries() {
        assert_eq!(
            BackendError::ExternalToolTimeout(DEFAULT_DEBUGGER_TIMEOUT).summary(),
            Summary::new(
                "Analysis canceled",
                "The debugger did not respond within the expected time."
            )
        );
        assert_eq!(
            BackendError::ExternalToolUnavailable(String::from("cdb.exe")).summary(),
            Summary::new("Unknown application", "Debugger not found")
        );
        assert_eq!(
            BackendError::ExternalToolFailed(String::from("boom")).summary(),
            Summary::new("Errors in the analysis", "boom")
        );
    }

    #[test]
    fn test_request_paths() {
        let request = AnalysisRequest::new("in.dmp", "T/1", "/tmp/reports");
        assert_eq!(request.sanitized_id(), "T_2F1");
        assert_eq!(
            request.artifact_path(),
            PathBuf::from("/tmp/reports/analysis_T_2F1.txt")
        );
    }

    #[test]
    fn test_native_tool_defaults() {
        let tool = NativeTool::new(WELL_KNOWN_DEBUGGER_PATHS[0]);
        assert_eq!(tool.timeout(), Duration::from_secs(60));
        assert_eq!(tool.args, vec!["-z", "{dump}", "-c", "!analyze -v; q"]);
        assert_eq!(tool.name(), "native");
    }

    #[test]
    fn test_spawn_failure() {
        let tool = NativeTool::new("/definitely/not/cdb.exe");
        let err = tool.run(Path::new("x.dmp")).unwrap_err();
        assert_eq!(err.name(), "ExternalToolFailed");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_replaces_dump_placeholder() {
        let tool = NativeTool::new("/bin/sh").with_args(["-c", "printf 'IMAGE_NAME: %s\\n' \"$0\"", "{dump}"]);
        let output = tool.run(Path::new("/tmp/crash.dmp")).unwrap();
        assert_eq!(output, "IMAGE_NAME: /tmp/crash.dmp\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_timeout() {
        let tool = NativeTool::new("/bin/sh")
            .with_args(["-c", "sleep 5"])
            .with_timeout(Duration::from_millis(200));
        let start = std::time::Instant::now();
        let err = tool.run(Path::new("x.dmp")).unwrap_err();
        assert_eq!(err, BackendError::ExternalToolTimeout(Duration::from_millis(200)));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_timed_out_debugger_is_reaped() {
        let dir = tempfile::TempDir::new().unwrap();
        let pid_file = dir.path().join("pid");
        let tool = NativeTool::new("/bin/sh")
            .with_args(["-c", "echo $$ > \"$0\"; exec sleep 5", "{dump}"])
            .with_timeout(Duration::from_millis(500));
        let err = tool.run(&pid_file).unwrap_err();
        assert_eq!(err.name(), "ExternalToolTimeout");

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        // A zombie keeps its /proc entry until it is waited on.
        assert!(!Path::new("/proc").join(pid.trim()).exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_run_inside_runtime() {
        let tool = NativeTool::new("/bin/sh").with_args(["-c", "echo ExceptionCode: c0000094"]);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let output = runtime.block_on(async { tool.run(Path::new("x.dmp")) }).unwrap();
        assert_eq!(output, "ExceptionCode: c0000094\n");
    }
}
