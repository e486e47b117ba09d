use crate::error::Result;
use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming};

/// Logs to rotating files under `logs/`, echoing everything to stdout and
/// warnings to stderr. Keep the returned handle alive for the whole run,
/// the file writer stops when it is dropped.
///
/// `spec` is a log specification such as `"info"` or `"qstab=debug"`.
pub fn setup_logging(spec: &str) -> Result<LoggerHandle> {
    let handle = Logger::try_with_str(spec)?
        .log_to_file(FileSpec::default().directory("logs"))
        .duplicate_to_stderr(Duplicate::Warn)
        .duplicate_to_stdout(Duplicate::All)
        .rotate(
            Criterion::Size(1024 * 1024), //1MB
            Naming::Timestamps,
            Cleanup::KeepLogFiles(5),
        )
        .start()?;

    Ok(handle)
}
