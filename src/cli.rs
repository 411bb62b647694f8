//! Argument parsing and validation shared by the transfer binaries. All
//! checks run before any socket is opened.

use std::path::{Path, PathBuf};

use tracing_subscriber::EnvFilter;

use crate::RecoveryMode;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 6000;

const FORBIDDEN_NAME_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*', '\\', '/'];

pub fn parse_mode(value: &str) -> Result<RecoveryMode, String> {
    match value {
        "GO_BACK_N" => Ok(RecoveryMode::GoBackN),
        "STOP_AND_WAIT" => Ok(RecoveryMode::StopAndWait),
        _ => Err(format!(
            "unknown protocol '{value}', expected GO_BACK_N or STOP_AND_WAIT"
        )),
    }
}

/// A file name that is safe to join under the server's storage directory.
pub fn parse_file_name(value: &str) -> Result<String, String> {
    let name = value.trim();

    if name.is_empty() {
        return Err("file name cannot be empty".to_owned());
    }
    if name == "." || name == ".." {
        return Err("file name cannot be '.' or '..'".to_owned());
    }
    if name.chars().any(|c| FORBIDDEN_NAME_CHARS.contains(&c)) {
        return Err(format!("file name '{value}' contains forbidden characters"));
    }

    Ok(name.to_owned())
}

/// An existing, readable source file.
pub fn parse_source_file(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);

    if !path.exists() {
        return Err(format!("source file not found: '{value}'"));
    }
    if !path.is_file() {
        return Err(format!("'{value}' is not a file"));
    }

    Ok(path)
}

/// An existing storage directory.
pub fn parse_storage_dir(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);

    if !path.exists() {
        return Err(format!("storage directory not found: '{value}'"));
    }
    if !path.is_dir() {
        return Err(format!("'{value}' is not a directory"));
    }

    Ok(path)
}

/// A download destination: either an existing directory or a file path
/// whose parent directory exists.
pub fn parse_destination(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);

    let dir = if path.is_dir() {
        path.clone()
    } else {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => Path::new(".").to_path_buf(),
        }
    };

    if !dir.is_dir() {
        return Err(format!("destination directory not found: '{}'", dir.display()));
    }

    Ok(path)
}

/// Installs the fmt subscriber. `RUST_LOG` wins when set; otherwise the
/// verbosity flags pick the level.
pub fn init_logging(verbose: bool, quiet: bool) {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_parse_by_protocol_name() {
        assert_eq!(parse_mode("GO_BACK_N").unwrap(), RecoveryMode::GoBackN);
        assert_eq!(
            parse_mode("STOP_AND_WAIT").unwrap(),
            RecoveryMode::StopAndWait
        );
        assert!(parse_mode("SELECTIVE_REPEAT").is_err());
    }

    #[test]
    fn file_names_reject_separators_and_dots() {
        assert_eq!(parse_file_name("data.bin").unwrap(), "data.bin");
        assert!(parse_file_name("").is_err());
        assert!(parse_file_name("..").is_err());
        assert!(parse_file_name("a/b").is_err());
        assert!(parse_file_name("a\\b").is_err());
        assert!(parse_file_name("a*b").is_err());
    }

    #[test]
    fn source_files_must_exist() {
        assert!(parse_source_file("/definitely/not/here").is_err());
    }
}
