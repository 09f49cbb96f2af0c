//! vellum-tools: shared plumbing for the command-line binaries.
//!
//! The binaries (`binarize-sauvola`, `isolate-bg`, `mask-op`,
//! `binarize`) are thin: parse arguments, load the input file, call into
//! `vellum-pipeline`, save the result. Everything they share lives here.

pub mod args;
pub mod files;
pub mod logging;

use std::process::ExitCode;

pub use files::{ToolError, read_gray, read_raster, save_output};
pub use logging::init_logging;

/// Report `err` for the tool named `target` and return the failure exit
/// code.
#[allow(clippy::print_stderr)]
pub fn fail(target: &str, err: &dyn std::error::Error) -> ExitCode {
    tracing::error!(target_tool = target, error = %err, "aborting");
    eprintln!("{target}: {err}");
    ExitCode::FAILURE
}
