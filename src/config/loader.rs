//! Patch definition loading.
//!
//! A patch definition is one TOML document with a `[meta]` table and a single
//! `[patch]` table. Parsing and validation failures keep the path of the
//! definition file once it is known, so the CLI can name it.

use crate::config::schema::{PatchConfig, ValidationError};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Why a patch definition could not be loaded.
#[derive(Debug)]
pub enum ConfigError {
    /// The definition file could not be read
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The definition is not valid TOML or does not fit the schema
    Toml {
        path: Option<PathBuf>,
        source: toml_edit::de::Error,
    },
    /// The definition parsed but is missing fields or mixes sources
    Validation {
        path: Option<PathBuf>,
        source: ValidationError,
    },
}

impl ConfigError {
    /// Attach the definition file to errors raised while parsing its text.
    fn with_path(self, definition: &Path) -> Self {
        match self {
            ConfigError::Toml { path: None, source } => ConfigError::Toml {
                path: Some(definition.to_path_buf()),
                source,
            },
            ConfigError::Validation { path: None, source } => ConfigError::Validation {
                path: Some(definition.to_path_buf()),
                source,
            },
            other => other,
        }
    }

    fn definition_path(&self) -> Option<&Path> {
        match self {
            ConfigError::Io { path, .. } => Some(path),
            ConfigError::Toml { path, .. } | ConfigError::Validation { path, .. } => {
                path.as_deref()
            }
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self {
            ConfigError::Io { .. } => "failed to read patch definition",
            ConfigError::Toml { .. } => "failed to parse patch definition TOML",
            ConfigError::Validation { .. } => "invalid patch definition",
        };
        match self.definition_path() {
            Some(path) => write!(f, "{what} ({})", path.display())?,
            None => f.write_str(what)?,
        }
        match self {
            ConfigError::Io { source, .. } => write!(f, ": {source}"),
            ConfigError::Toml { source, .. } => write!(f, ": {source}"),
            ConfigError::Validation { source, .. } => write!(f, ": {source}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Toml { source, .. } => Some(source),
            ConfigError::Validation { source, .. } => Some(source),
        }
    }
}

/// Parse and validate a patch definition held in memory.
///
/// The result has no `origin`, so a relative replacement file resolves
/// against the current directory.
pub fn load_from_str(input: &str) -> Result<PatchConfig, ConfigError> {
    let config: PatchConfig = toml_edit::de::from_str(input)
        .map_err(|source| ConfigError::Toml { path: None, source })?;
    config
        .validate()
        .map_err(|source| ConfigError::Validation { path: None, source })?;
    Ok(config)
}

/// Load a patch definition file; relative replacement files resolve against
/// its directory.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<PatchConfig, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config = load_from_str(&contents).map_err(|error| error.with_path(path))?;
    config.origin = path.parent().map(Path::to_path_buf);
    Ok(config)
}
