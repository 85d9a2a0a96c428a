//! Tracing subscriber setup for the framework binaries.

use std::path::Path;
use tracing_subscriber::EnvFilter;

fn env_filter(debug: bool) -> EnvFilter {
    let default = if debug { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Initialize stderr logging. Safe to call more than once; later calls are
/// ignored.
pub fn init(debug: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(debug))
        .with_writer(std::io::stderr)
        .try_init();
}

/// Initialize logging into a file (local lone runs log under /tmp rather
/// than polluting the command output).
pub fn init_file(logfile: &Path, debug: bool) {
    let dir = logfile.parent().unwrap_or_else(|| Path::new("."));
    let name = logfile
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "laf.log".to_string());
    let appender = tracing_appender::rolling::never(dir, name);
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(debug))
        .with_writer(appender)
        .with_ansi(false)
        .try_init();
}
