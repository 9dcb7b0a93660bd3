//! Runtime configuration
//!
//! The collaborator surface is four command-line options; this module turns
//! them into a validated [`Config`] and maps the log level onto a tracing
//! env-filter directive.

use std::path::PathBuf;

use crate::error::{ProxyError, Result};

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Upstream MySQL server, `host:port`
    pub remote_db: String,
    /// Normalized listen address, `host:port`
    pub listen_addr: String,
    /// Base directory for per-run capture directories
    pub base_path: PathBuf,
    /// Diagnostic log level (DEBUG/INFO/WARN/ERROR/FATAL)
    pub log_level: String,
}

impl Config {
    /// Build a config from raw option values, applying defaults and
    /// normalization.
    ///
    /// A missing `remote_db` is a configuration error; the caller is expected
    /// to treat it as fatal.
    pub fn new(
        remote_db: Option<String>,
        listen_port: String,
        file_path: Option<PathBuf>,
        log_level: String,
    ) -> Result<Self> {
        let remote_db = match remote_db {
            Some(addr) if !addr.is_empty() => addr,
            _ => return Err(ProxyError::Config("remote db addr not set".into())),
        };

        let base_path = match file_path {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => std::env::current_dir()?,
        };

        Ok(Self {
            remote_db,
            listen_addr: normalize_listen_addr(&listen_port),
            base_path,
            log_level,
        })
    }

    /// Env-filter directive for the configured level.
    ///
    /// FATAL maps to `error`: tracing has no fatal level, and fatal
    /// conditions terminate the process on their own.
    pub fn tracing_filter(&self) -> &'static str {
        match self.log_level.to_uppercase().as_str() {
            "DEBUG" => "debug",
            "WARN" => "warn",
            "ERROR" | "FATAL" => "error",
            _ => "info",
        }
    }
}

/// Accept both `:5306` and `host:5306` forms; a bare `:port` binds all
/// interfaces.
fn normalize_listen_addr(listen_port: &str) -> String {
    if let Some(port) = listen_port.strip_prefix(':') {
        format!("0.0.0.0:{}", port)
    } else if listen_port.contains(':') {
        listen_port.to_string()
    } else {
        format!("0.0.0.0:{}", listen_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_remote_db_is_config_error() {
        let err = Config::new(None, ":5306".into(), None, "INFO".into()).unwrap_err();
        assert!(matches!(err, ProxyError::Config(_)));

        let err =
            Config::new(Some(String::new()), ":5306".into(), None, "INFO".into()).unwrap_err();
        assert!(matches!(err, ProxyError::Config(_)));
    }

    #[test]
    fn test_listen_addr_normalization() {
        assert_eq!(normalize_listen_addr(":5306"), "0.0.0.0:5306");
        assert_eq!(normalize_listen_addr("5306"), "0.0.0.0:5306");
        assert_eq!(normalize_listen_addr("127.0.0.1:5306"), "127.0.0.1:5306");
    }

    #[test]
    fn test_tracing_filter_mapping() {
        let mut config = Config::new(
            Some("127.0.0.1:3306".into()),
            ":5306".into(),
            Some(PathBuf::from("/tmp")),
            "DEBUG".into(),
        )
        .unwrap();
        assert_eq!(config.tracing_filter(), "debug");

        config.log_level = "fatal".into();
        assert_eq!(config.tracing_filter(), "error");

        config.log_level = "nonsense".into();
        assert_eq!(config.tracing_filter(), "info");
    }

    #[test]
    fn test_default_base_path_is_cwd() {
        let config = Config::new(
            Some("127.0.0.1:3306".into()),
            ":5306".into(),
            None,
            "INFO".into(),
        )
        .unwrap();
        assert_eq!(config.base_path, std::env::current_dir().unwrap());
    }
}
