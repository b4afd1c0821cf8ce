//! Process-wide logging setup for the catalog relay.

/// Environment variable selecting the log output format (`json` or `pretty`).
pub const ENV_LOG_FORMAT: &str = "CATALOG_LOG_FORMAT";

/// Initialize process-wide tracing, with the format taken from `CATALOG_LOG_FORMAT`.
///
/// An unset variable means JSON. Safe to call multiple times; subsequent calls become
/// no-ops.
pub fn init() -> Result<LogFormat, String> {
    let format = log_format_from(std::env::var(ENV_LOG_FORMAT).ok().as_deref())?;
    tracing::init(format);
    Ok(format)
}

/// Resolve the log format from an optional raw setting.
pub fn log_format_from(raw: Option<&str>) -> Result<LogFormat, String> {
    match raw {
        Some(raw) => raw.parse(),
        None => Ok(LogFormat::default()),
    }
}

/// Tracing configuration (filters, layers).
pub mod tracing;

pub use self::tracing::LogFormat;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_format_defaults_to_json() {
        assert_eq!(log_format_from(None), Ok(LogFormat::Json));
    }

    #[test]
    fn explicit_format_is_parsed() {
        assert_eq!(log_format_from(Some("text")), Ok(LogFormat::Pretty));
        assert!(log_format_from(Some("yaml")).is_err());
    }

    #[test]
    fn init_is_repeatable() {
        let first = init();
        assert_eq!(init(), first);
    }
}
