// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! A library for triaging crash dumps.
//!
//! Given the path of an uploaded dump, [`analyze`] works out which program
//! crashed and why, writes a text report named after the caller's analysis id,
//! and hands back a two-field [`Summary`]. It never fails: unreadable files,
//! files that aren't dumps and broken streams all end up described in the
//! summary and the report instead.
//!
//! The work is done by one of three [`AnalysisBackend`]s, picked by
//! [`Analyzer::select_backend`]:
//!
//! * [`NativeTool`] runs an installed console debugger under a timeout.
//! * [`BuiltinDecoder`] decodes the dump with the [crashdump] crate.
//! * [`heuristics::TextScan`] looks for names and fault codes in the raw bytes.
//!
//! Callers that already have a [`crashdump::Minidump`] can use
//! [`process_dump`] directly to get an [`AnalysisReport`].
//!
//! ```no_run
//! use crashdump_processor::{Analyzer, AnalyzerOptions};
//!
//! let analyzer = Analyzer::new(AnalyzerOptions::builtin_only());
//! let summary = analyzer.analyze("upload.dmp", "1042", "reports");
//! assert!(std::path::Path::new("reports/analysis_1042.txt").exists());
//! println!("{}: {}", summary.exe_name, summary.crash_reason);
//! ```

mod backend;
pub mod classifier;
pub mod heuristics;
mod process_state;
mod processor;
mod stackwalker;

pub use crate::backend::*;
pub use crate::process_state::*;
pub use crate::processor::*;
pub use crate::stackwalker::*;
