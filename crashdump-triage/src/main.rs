// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use crashdump_processor::{AnalysisBackend, AnalysisRequest, Analyzer, AnalyzerOptions, Summary};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Use a debugger if one is installed, else the builtin decoder.
    Auto,
    /// Decode the dump's streams directly.
    Builtin,
    /// Run the console debugger; fails if none is installed.
    Native,
    /// Only look for module names and fault codes in the raw bytes.
    TextScan,
}

/// Triage a crash dump: report which program crashed, and why.
///
/// A text report is written to `<OUTPUT_DIR>/analysis_<ID>.txt` and a two-line
/// summary is printed. Dumps that can't be analyzed still exit successfully; the
/// summary says what was wrong with them.
#[derive(Debug, Parser)]
#[command(name = "crashdump-triage", version)]
struct Args {
    /// The crash dump to analyze.
    dump: PathBuf,

    /// Identifier for this analysis, e.g. a ticket number. Defaults to the dump's file stem.
    #[arg(long)]
    id: Option<String>,

    /// Where to write the report.
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// How to analyze the dump.
    #[arg(long, value_enum, default_value_t = Backend::Auto)]
    backend: Backend,

    /// Path to the console debugger, tried before the usual install locations.
    #[arg(long)]
    debugger: Option<PathBuf>,

    /// Kill the debugger after this many seconds.
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,

    /// Print the summary as JSON.
    #[arg(long)]
    json: bool,

    /// Also print the full report after the summary.
    #[arg(long)]
    print_report: bool,

    /// Set the logging level. RUST_LOG takes precedence.
    #[arg(
        long,
        default_value = "error",
        value_parser = ["off", "error", "warn", "info", "debug", "trace"]
    )]
    verbose: String,
}

impl Args {
    fn analysis_id(&self) -> String {
        self.id.clone().unwrap_or_else(|| {
            self.dump
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
    }

    fn options(&self) -> AnalyzerOptions {
        let options = match self.backend {
            Backend::Auto => AnalyzerOptions::default(),
            Backend::Builtin => AnalyzerOptions::builtin_only(),
            Backend::Native => AnalyzerOptions {
                builtin_decoder: false,
                ..AnalyzerOptions::default()
            },
            Backend::TextScan => AnalyzerOptions::heuristic_only(),
        };
        AnalyzerOptions {
            native_tool_path: self.debugger.clone(),
            native_tool_timeout: Duration::from_secs(self.timeout_secs),
            ..options
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn print_summary<W: Write>(f: &mut W, summary: &Summary, json: bool) -> anyhow::Result<()> {
    if json {
        serde_json::to_writer_pretty(&mut *f, summary)?;
        writeln!(f)?;
    } else {
        writeln!(f, "Application:  {}", summary.exe_name)?;
        writeln!(f, "Crash reason: {}", summary.crash_reason)?;
    }
    Ok(())
}

pub fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };
    init_logging(&args.verbose);

    if let Err(e) = try_main(args) {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}

fn try_main(args: Args) -> anyhow::Result<()> {
    let analyzer = Analyzer::new(args.options());
    let backend: Box<dyn AnalysisBackend> = match args.backend {
        Backend::Native => Box::new(
            analyzer
                .native_tool()
                .context("--backend native needs a debugger, see --debugger")?,
        ),
        _ => analyzer.select_backend(),
    };

    let request = AnalysisRequest::new(&args.dump, args.analysis_id(), &args.output_dir);
    info!("dump file path: {}", request.dump_path.display());
    info!("report path: {}", request.artifact_path().display());
    let summary = backend.analyze(&request);

    let stdout = io::stdout();
    let mut stdout = stdout.lock();
    print_summary(&mut stdout, &summary, args.json)?;
    if args.print_report {
        let report = fs::read_to_string(request.artifact_path())
            .with_context(|| format!("while reading {}", request.artifact_path().display()))?;
        writeln!(stdout)?;
        write!(stdout, "{report}")?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["crashdump-triage", "uploads/1042.dmp"]).unwrap();
        assert_eq!(args.analysis_id(), "1042");
        assert_eq!(args.backend, Backend::Auto);
        assert_eq!(args.verbose, "error");
        let options = args.options();
        assert!(options.use_native_tool);
        assert!(options.builtin_decoder);
        assert_eq!(options.native_tool_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_backend_flags() {
        let args = Args::try_parse_from([
            "crashdump-triage",
            "x.dmp",
            "--backend",
            "text-scan",
            "--timeout-secs",
            "5",
            "--debugger",
            "/opt/cdb",
            "--id",
            "T-1",
        ])
        .unwrap();
        assert_eq!(args.analysis_id(), "T-1");
        let options = args.options();
        assert!(!options.use_native_tool);
        assert!(!options.builtin_decoder);
        assert_eq!(options.native_tool_timeout, Duration::from_secs(5));
        assert_eq!(options.native_tool_path, Some(PathBuf::from("/opt/cdb")));

        let args =
            Args::try_parse_from(["crashdump-triage", "x.dmp", "--backend", "native"]).unwrap();
        let options = args.options();
        assert!(options.use_native_tool);
        assert!(!options.builtin_decoder);
    }

    #[test]
    fn test_bad_flags() {
        assert!(Args::try_parse_from(["crashdump-triage"]).is_err());
        assert!(Args::try_parse_from(["crashdump-triage", "x.dmp", "--backend", "gdb"]).is_err());
        assert!(Args::try_parse_from(["crashdump-triage", "x.dmp", "--verbose", "loud"]).is_err());
    }

    #[test]
    fn test_print_summary() {
        let summary = Summary::new("app.exe", "0xC0000005 - Access Violation");
        let mut out = Vec::new();
        print_summary(&mut out, &summary, false).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Application:  app.exe\nCrash reason: 0xC0000005 - Access Violation\n"
        );

        let mut out = Vec::new();
        print_summary(&mut out, &summary, true).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["exe_name"], "app.exe");
    }
}
