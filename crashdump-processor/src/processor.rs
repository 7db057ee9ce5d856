// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crashdump::format::MINIDUMP_STREAM_TYPE;
use crashdump::{
    read_dump_file, Error, Minidump, MinidumpException, MinidumpMemoryInfoList,
    MinidumpMemoryList, MinidumpModuleList, MinidumpStream, MinidumpSystemInfo,
    MinidumpThreadList, UnifiedMemoryList,
};
use num_traits::FromPrimitive;
use tracing::{debug, error, info, warn};

use crate::backend::{
    AnalysisBackend, AnalysisRequest, BackendError, BuiltinDecoder, NativeTool,
    DEFAULT_DEBUGGER_TIMEOUT, WELL_KNOWN_DEBUGGER_PATHS,
};
use crate::heuristics::TextScan;
use crate::process_state::{AnalysisReport, DumpVerdict, Summary, MAX_MEMORY_REGIONS};
use crate::stackwalker::walk_stack;

/// Configuration for an [`Analyzer`].
#[derive(Clone, Debug)]
pub struct AnalyzerOptions {
    /// Look for an external debugger and prefer it when found.
    pub use_native_tool: bool,
    /// A debugger location to try before the well-known install paths.
    pub native_tool_path: Option<PathBuf>,
    /// How long the debugger may run before it is killed.
    pub native_tool_timeout: Duration,
    /// Decode the dump structurally when there is no debugger. When this is off,
    /// the dump is only scanned for strings.
    pub builtin_decoder: bool,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        AnalyzerOptions {
            use_native_tool: true,
            native_tool_path: None,
            native_tool_timeout: DEFAULT_DEBUGGER_TIMEOUT,
            builtin_decoder: true,
        }
    }
}

impl AnalyzerOptions {
    /// Never run a debugger, always decode the dump ourselves.
    pub fn builtin_only() -> Self {
        AnalyzerOptions {
            use_native_tool: false,
            ..AnalyzerOptions::default()
        }
    }

    /// Only scan the raw bytes for names and fault codes.
    pub fn heuristic_only() -> Self {
        AnalyzerOptions {
            use_native_tool: false,
            builtin_decoder: false,
            ..AnalyzerOptions::default()
        }
    }
}

/// Picks an [`AnalysisBackend`] and runs it.
#[derive(Clone, Debug, Default)]
pub struct Analyzer {
    options: AnalyzerOptions,
}

impl Analyzer {
    pub fn new(options: AnalyzerOptions) -> Analyzer {
        Analyzer { options }
    }

    pub fn options(&self) -> &AnalyzerOptions {
        &self.options
    }

    /// Find a debugger, checking the configured path and then the usual install locations.
    pub fn native_tool(&self) -> Result<NativeTool, BackendError> {
        let candidates = self
            .options
            .native_tool_path
            .iter()
            .cloned()
            .chain(WELL_KNOWN_DEBUGGER_PATHS.iter().map(PathBuf::from));
        for candidate in candidates {
            if candidate.is_file() {
                return Ok(NativeTool::new(candidate).with_timeout(self.options.native_tool_timeout));
            }
            debug!("No debugger at {}", candidate.display());
        }
        Err(BackendError::ExternalToolUnavailable(
            self.options
                .native_tool_path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| String::from("no debugger installed")),
        ))
    }

    /// Choose the best backend that is available right now.
    ///
    /// A debugger wins when enabled and present, then the builtin decoder, then
    /// the string scan.
    pub fn select_backend(&self) -> Box<dyn AnalysisBackend> {
        if self.options.use_native_tool {
            match self.native_tool() {
                Ok(tool) => {
                    info!("Using debugger at {}", tool.path().display());
                    return Box::new(tool);
                }
                Err(e) => debug!("{e}"),
            }
        }
        if self.options.builtin_decoder {
            info!("Using builtin decoder");
            Box::new(BuiltinDecoder)
        } else {
            info!("Using text scan");
            Box::new(TextScan)
        }
    }

    /// Analyze the dump at `dump_path`, writing `analysis_<id>.txt` into `output_dir`.
    ///
    /// This never fails. Problems with the dump, the debugger or the output
    /// directory are reported through the returned [`Summary`] and the logs.
    pub fn analyze(
        &self,
        dump_path: impl AsRef<Path>,
        analysis_id: &str,
        output_dir: impl AsRef<Path>,
    ) -> Summary {
        let request = AnalysisRequest::new(dump_path.as_ref(), analysis_id, output_dir.as_ref());
        let backend = self.select_backend();
        debug!(
            "Analyzing {} as {} with {}",
            request.dump_path.display(),
            request.sanitized_id(),
            backend.name()
        );
        backend.analyze(&request)
    }
}

/// Analyze a dump with the default [`AnalyzerOptions`].
///
/// # Examples
///
/// ```no_run
/// let summary = crashdump_processor::analyze("upload.dmp", "1042", "reports");
/// println!("{}: {}", summary.exe_name, summary.crash_reason);
/// ```
pub fn analyze(
    dump_path: impl AsRef<Path>,
    analysis_id: &str,
    output_dir: impl AsRef<Path>,
) -> Summary {
    Analyzer::default().analyze(dump_path, analysis_id, output_dir)
}

/// Encode an analysis id so it is safe in a file name.
///
/// `[A-Za-z0-9-]` is kept as is. Every other byte of the UTF-8 encoding,
/// including `_`, becomes `_XX` in uppercase hex, so distinct ids never share a
/// file. An empty id becomes a lone `_`, which no other id encodes to.
pub fn sanitize_analysis_id(analysis_id: &str) -> String {
    if analysis_id.is_empty() {
        return String::from("_");
    }
    let mut sanitized = String::with_capacity(analysis_id.len());
    for &byte in analysis_id.as_bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            sanitized.push(char::from(byte));
        } else {
            sanitized.push_str(&format!("_{byte:02X}"));
        }
    }
    sanitized
}

/// The file name of the artifact for `analysis_id`.
pub fn artifact_file_name(analysis_id: &str) -> String {
    format!("analysis_{}.txt", sanitize_analysis_id(analysis_id))
}

/// Write the artifact for `request`: a fixed header followed by whatever `body` writes.
///
/// Failures are logged, not returned; the caller's `Summary` doesn't depend on them.
pub(crate) fn write_artifact<F>(request: &AnalysisRequest, backend: &str, body: F)
where
    F: FnOnce(&mut BufWriter<fs::File>) -> io::Result<()>,
{
    let path = request.artifact_path();
    let result = fs::create_dir_all(&request.output_dir).and_then(|_| {
        let mut f = BufWriter::new(fs::File::create(&path)?);
        writeln!(f, "Crash dump analysis")?;
        writeln!(f, "Analysis ID: {}", request.sanitized_id())?;
        writeln!(f, "Backend: {backend}")?;
        writeln!(f)?;
        body(&mut f)?;
        f.flush()
    });
    match result {
        Ok(()) => debug!("Wrote {}", path.display()),
        Err(e) => error!("Failed to write {}: {}", path.display(), e),
    }
}

fn stream_name<'a, S: MinidumpStream<'a>>() -> String {
    match MINIDUMP_STREAM_TYPE::from_u32(S::STREAM_TYPE) {
        Some(stream_type) => format!("{stream_type:?}"),
        None => format!("Stream {:#x}", S::STREAM_TYPE),
    }
}

/// Decode one stream, turning a malformed stream into a diagnostic note.
fn decode<'a, S, T>(dump: &'a Minidump<'a, T>, diagnostics: &mut Vec<String>) -> Option<S>
where
    S: MinidumpStream<'a>,
    T: Deref<Target = [u8]> + 'a,
{
    match dump.get_stream::<S>() {
        Ok(stream) => Some(stream),
        Err(Error::StreamNotFound) => None,
        Err(e) => {
            let name = stream_name::<S>();
            warn!("Skipping {}: {}", name, e.name());
            diagnostics.push(format!("{name}: {e} ({})", e.name()));
            None
        }
    }
}

/// Decode everything of interest in `dump`.
///
/// Each stream is decoded on its own; one that is missing or malformed leaves
/// its section of the report empty without affecting the others.
pub fn process_dump<'a, T>(dump: &'a Minidump<'a, T>) -> AnalysisReport
where
    T: Deref<Target = [u8]> + 'a,
{
    let mut diagnostics = vec![];

    let system_info = decode::<MinidumpSystemInfo, T>(dump, &mut diagnostics);
    let modules = decode::<MinidumpModuleList, T>(dump, &mut diagnostics).unwrap_or_default();
    let exception = decode::<MinidumpException, T>(dump, &mut diagnostics);
    let threads = decode::<MinidumpThreadList, T>(dump, &mut diagnostics);
    let memory_info = decode::<MinidumpMemoryInfoList, T>(dump, &mut diagnostics);
    let memory_list = decode::<MinidumpMemoryList, T>(dump, &mut diagnostics);

    let pointer_width = system_info
        .as_ref()
        .map(|info| info.cpu.pointer_width())
        .unwrap_or_default();
    let call_stack = walk_stack(exception.as_ref(), threads.as_ref(), &modules, pointer_width);
    let memory_regions = UnifiedMemoryList::new(memory_info, memory_list)
        .map(|memory| memory.regions().take(MAX_MEMORY_REGIONS).collect())
        .unwrap_or_default();

    AnalysisReport {
        dump_size: dump.len(),
        verdict: DumpVerdict::Valid,
        system_info,
        modules,
        exception,
        call_stack,
        memory_regions,
        diagnostics,
    }
}

/// Check the header of `data` and, if it holds up, decode the rest.
pub fn process_bytes(data: &[u8]) -> AnalysisReport {
    match Minidump::read(data) {
        Ok(dump) => process_dump(&dump),
        Err(Error::TruncatedHeader { actual }) => {
            info!("Rejecting dump: {} bytes is too small", actual);
            AnalysisReport::rejected(actual, DumpVerdict::TooSmall)
        }
        Err(Error::InvalidSignature { found }) => {
            info!("Rejecting dump: bad signature {:#010x}", found);
            AnalysisReport::rejected(data.len(), DumpVerdict::InvalidSignature { found })
        }
        Err(e) => AnalysisReport::rejected(data.len(), DumpVerdict::Unreadable(e.to_string())),
    }
}

/// Load the dump at `path` and build its report.
pub fn process_path(path: impl AsRef<Path>) -> AnalysisReport {
    match read_dump_file(path) {
        Ok(data) => process_bytes(&data),
        Err(e) => {
            error!("Couldn't read dump: {}", e);
            AnalysisReport::rejected(0, DumpVerdict::Unreadable(e.to_string()))
        }
    }
}
