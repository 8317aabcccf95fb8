//! Command-line handling.
//!
//! Only `--entity` and `--file` are meaningful. Flag names match
//! case-insensitively and every other argument is ignored, so the importer
//! can be launched by wrappers that pass extra switches of their own.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::Parser;
use clap::error::ErrorKind;
use thiserror::Error;

pub const USAGE: &str = "Usage: --entity <name> --file <path>";

#[derive(Parser, Debug)]
#[command(
    name = "identity-import",
    about = "Batch-import identity entities from a CSV file"
)]
struct Args {
    /// Entity to import (customer, user, role, roleclaim, ...).
    #[arg(long)]
    entity: Option<String>,

    /// CSV file with a header row.
    #[arg(long)]
    file: Option<PathBuf>,
}

/// A validated request to import one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub entity: String,
    pub file: PathBuf,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Usage: --entity <name> --file <path>")]
    Usage,
    /// `--help` was requested; carries the rendered help text.
    #[error("{0}")]
    Help(String),
}

/// Parse the process arguments, program name included.
pub fn parse_args<I, T>(args: I) -> Result<Invocation, CliError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let filtered = retain_known(args.into_iter().map(Into::into).collect());
    let parsed = match Args::try_parse_from(filtered) {
        Ok(parsed) => parsed,
        Err(err) if err.kind() == ErrorKind::DisplayHelp => {
            return Err(CliError::Help(err.render().to_string()));
        }
        Err(err) => {
            log::debug!("argument parsing failed: {}", err);
            return Err(CliError::Usage);
        }
    };

    let entity = parsed
        .entity
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty());
    let file = parsed.file.filter(|f| !f.as_os_str().is_empty());
    match (entity, file) {
        (Some(entity), Some(file)) => Ok(Invocation { entity, file }),
        _ => Err(CliError::Usage),
    }
}

/// Keep the program name, `--help`, and `--entity`/`--file` with their
/// values. Flag names are normalised to lower case.
fn retain_known(args: Vec<OsString>) -> Vec<OsString> {
    let mut iter = args.into_iter().peekable();
    let mut kept: Vec<OsString> = iter.next().into_iter().collect();

    while let Some(arg) = iter.next() {
        let text = arg.to_string_lossy().into_owned();
        let (name, inline) = match text.split_once('=') {
            Some((name, value)) => (name.to_ascii_lowercase(), Some(value.to_string())),
            None => (text.to_ascii_lowercase(), None),
        };

        match name.as_str() {
            "--help" | "-h" => kept.push(OsString::from("--help")),
            "--entity" | "--file" => {
                let value = match inline {
                    Some(value) => Some(OsString::from(value)),
                    None => iter.next_if(|next| !next.to_string_lossy().starts_with("--")),
                };
                if let Some(value) = value {
                    kept.push(OsString::from(name));
                    kept.push(value);
                }
            }
            _ => log::trace!("ignoring argument {text}"),
        }
    }
    kept
}
