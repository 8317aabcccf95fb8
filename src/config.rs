use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{ImportError, ImportResult};

pub const DEFAULT_BATCH_SIZE: usize = 500;
pub const DEFAULT_SETTINGS_FILE: &str = "appsettings.json";

/// Relational store flavours the importer knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Provider {
    #[default]
    SqlServer,
    Postgres,
    MySql,
}

impl FromStr for Provider {
    type Err = ImportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sqlserver" => Ok(Provider::SqlServer),
            "postgres" | "postgresql" => Ok(Provider::Postgres),
            "mysql" | "mariadb" => Ok(Provider::MySql),
            _ => Err(ImportError::UnsupportedProvider(value.trim().to_string())),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provider::SqlServer => "SqlServer",
            Provider::Postgres => "Postgres",
            Provider::MySql => "MySql",
        };
        f.write_str(name)
    }
}

/// Header matching mode for CSV column names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeaderMatch {
    #[default]
    Exact,
    IgnoreCase,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FileSection {
    provider: Option<String>,
    connection_string: Option<String>,
    batch_size: Option<i64>,
    case_insensitive_headers: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    #[serde(rename = "Import", default)]
    import: FileSection,
}

/// Settings for one import run, read from the `Import` section of the JSON
/// settings file and overridden by `IMPORT_*` environment variables.
#[derive(Debug, Clone)]
pub struct ImportSettings {
    pub provider: Provider,
    pub connection_string: String,
    pub batch_size: usize,
    pub header_match: HeaderMatch,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            connection_string: String::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            header_match: HeaderMatch::default(),
        }
    }
}

fn lookup_bool(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    lookup(key).map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

fn lookup_i64(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<i64> {
    lookup(key).and_then(|value| value.trim().parse::<i64>().ok())
}

fn lookup_string(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|value| !value.trim().is_empty())
}

fn clamp_batch_size(value: i64) -> usize {
    usize::try_from(value.max(1)).unwrap_or(DEFAULT_BATCH_SIZE)
}

impl ImportSettings {
    /// Load settings from the process environment and the settings file named
    /// by `IMPORT_SETTINGS_PATH` (default `appsettings.json`). A missing file
    /// is not an error; the environment alone may configure the run.
    pub fn load() -> ImportResult<Self> {
        let path = env::var("IMPORT_SETTINGS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_SETTINGS_FILE));
        let json = read_settings_file(&path)?;
        let settings = Self::from_sources(json.as_deref(), &|key| env::var(key).ok())?;
        log::debug!(
            "loaded import settings: provider={}, batch_size={}, headers={:?}",
            settings.provider,
            settings.batch_size,
            settings.header_match
        );
        Ok(settings)
    }

    /// Build settings from an optional JSON document and an environment lookup.
    pub fn from_sources(
        json: Option<&str>,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> ImportResult<Self> {
        let section = match json {
            Some(text) => {
                serde_json::from_str::<SettingsFile>(text)
                    .map_err(|err| ImportError::Config(format!("invalid settings file: {err}")))?
                    .import
            }
            None => FileSection::default(),
        };

        let provider = match lookup_string(lookup, "IMPORT_PROVIDER").or(section.provider) {
            Some(name) => name.parse()?,
            None => Provider::default(),
        };

        let connection_string = lookup_string(lookup, "IMPORT_CONNECTION_STRING")
            .or(section.connection_string)
            .or_else(|| lookup_string(lookup, "DATABASE_URL"))
            .unwrap_or_default();

        let batch_size = lookup_i64(lookup, "IMPORT_BATCH_SIZE")
            .or(section.batch_size)
            .map(clamp_batch_size)
            .unwrap_or(DEFAULT_BATCH_SIZE);

        let case_insensitive = lookup_bool(lookup, "IMPORT_CASE_INSENSITIVE_HEADERS")
            .or(section.case_insensitive_headers)
            .unwrap_or(false);

        Ok(Self {
            provider,
            connection_string,
            batch_size,
            header_match: if case_insensitive {
                HeaderMatch::IgnoreCase
            } else {
                HeaderMatch::Exact
            },
        })
    }

    /// Reject settings that cannot reach a store.
    pub fn validate(&self) -> ImportResult<()> {
        if self.connection_string.trim().is_empty() {
            return Err(ImportError::EmptyConnectionString);
        }
        Ok(())
    }
}

fn read_settings_file(path: &Path) -> ImportResult<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            log::debug!("settings file {} not found, using environment", path.display());
            Ok(None)
        }
        Err(err) => Err(ImportError::Io(err)),
    }
}
