//! Streaming CSV row source.
//!
//! Rows are read lazily from the file in order. The source is finite and
//! cannot be restarted; the cancellation token is checked before each row is
//! handed out and a cancelled source ends after yielding a single
//! [`ImportError::Cancelled`].

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use tokio_util::sync::CancellationToken;

use crate::config::HeaderMatch;
use crate::error::{ImportError, ImportResult};

/// One mapped CSV column of an entity.
#[derive(Debug, Clone, Copy)]
pub struct Column {
    /// Canonical field name, also the preferred header.
    pub field: &'static str,
    /// Additional header spellings accepted for this field.
    pub aliases: &'static [&'static str],
    /// Rows with this field blank are rejected.
    pub required: bool,
    /// Rows with a longer value are rejected.
    pub max_len: Option<usize>,
}

impl Column {
    pub const fn optional(field: &'static str) -> Self {
        Self {
            field,
            aliases: &[],
            required: false,
            max_len: None,
        }
    }

    pub const fn required(field: &'static str) -> Self {
        Self {
            field,
            aliases: &[],
            required: true,
            max_len: None,
        }
    }

    pub const fn max(mut self, max_len: usize) -> Self {
        self.max_len = Some(max_len);
        self
    }

    pub const fn aliases(mut self, aliases: &'static [&'static str]) -> Self {
        self.aliases = aliases;
        self
    }

    fn accepts(&self, header: &str, mode: HeaderMatch) -> bool {
        let header = header.trim();
        std::iter::once(self.field)
            .chain(self.aliases.iter().copied())
            .any(|name| match mode {
                HeaderMatch::Exact => name == header,
                HeaderMatch::IgnoreCase => name.eq_ignore_ascii_case(header),
            })
    }
}

/// Raw field values of one CSV line, before any normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportRow {
    pub line: u64,
    values: HashMap<&'static str, String>,
}

impl ImportRow {
    pub fn new(line: u64) -> Self {
        Self {
            line,
            values: HashMap::new(),
        }
    }

    pub fn with(mut self, field: &'static str, value: impl Into<String>) -> Self {
        self.values.insert(field, value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.values.get(field).map(String::as_str)
    }
}

pub struct RowSource {
    reader: csv::Reader<File>,
    positions: Vec<(&'static str, Option<usize>)>,
    record: csv::StringRecord,
    cancel: CancellationToken,
    finished: bool,
}

impl RowSource {
    /// Open `path` and map its header onto `columns`.
    ///
    /// # Errors
    /// * [`ImportError::FileNotFound`] when the path does not name a file
    /// * [`ImportError::MissingColumn`] when a required column has no header
    pub fn open(
        path: &Path,
        entity: &'static str,
        columns: &'static [Column],
        header_match: HeaderMatch,
        cancel: CancellationToken,
    ) -> ImportResult<Self> {
        if !path.is_file() {
            return Err(ImportError::FileNotFound(path.to_path_buf()));
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)?;
        let headers = reader.headers()?.clone();

        let mut positions = Vec::with_capacity(columns.len());
        for column in columns {
            let index = headers
                .iter()
                .position(|header| column.accepts(header, header_match));
            if index.is_none() {
                if column.required {
                    return Err(ImportError::MissingColumn {
                        entity,
                        column: column.field,
                    });
                }
                log::debug!("{entity}: optional column '{}' not present", column.field);
            }
            positions.push((column.field, index));
        }

        log::debug!(
            "{entity}: opened {} with {} mapped columns",
            path.display(),
            positions.iter().filter(|(_, idx)| idx.is_some()).count()
        );

        Ok(Self {
            reader,
            positions,
            record: csv::StringRecord::new(),
            cancel,
            finished: false,
        })
    }
}

impl Iterator for RowSource {
    type Item = ImportResult<ImportRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if self.cancel.is_cancelled() {
            self.finished = true;
            return Some(Err(ImportError::Cancelled));
        }

        match self.reader.read_record(&mut self.record) {
            Ok(true) => {
                let line = self
                    .record
                    .position()
                    .map(|pos| pos.line())
                    .unwrap_or_default();
                let mut row = ImportRow::new(line);
                for (field, index) in &self.positions {
                    if let Some(value) = index.and_then(|idx| self.record.get(idx)) {
                        row.values.insert(*field, value.to_string());
                    }
                }
                Some(Ok(row))
            }
            Ok(false) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(ImportError::Csv(err)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const COLUMNS: &[Column] = &[
        Column::required("Code").aliases(&["Customer Code"]),
        Column::optional("Email"),
    ];

    fn csv_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write csv");
        file
    }

    #[test]
    fn missing_file_is_reported_before_streaming() {
        let err = RowSource::open(
            Path::new("/definitely/not/here.csv"),
            "customer",
            COLUMNS,
            HeaderMatch::Exact,
            CancellationToken::new(),
        )
        .err()
        .expect("open fails");
        assert!(matches!(err, ImportError::FileNotFound(_)));
    }

    #[test]
    fn maps_headers_and_aliases_in_order() {
        let file = csv_file("Customer Code,Email,Extra\nA, a@x.io ,1\nB,,2\n");
        let source = RowSource::open(
            file.path(),
            "customer",
            COLUMNS,
            HeaderMatch::Exact,
            CancellationToken::new(),
        )
        .expect("open");

        let rows: Vec<ImportRow> = source.map(|row| row.expect("row")).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("Code"), Some("A"));
        assert_eq!(rows[0].get("Email"), Some(" a@x.io "));
        assert_eq!(rows[1].get("Code"), Some("B"));
        assert_eq!(rows[1].get("Email"), Some(""));
        assert_eq!(rows[0].get("Extra"), None);
    }

    #[test]
    fn header_case_is_significant_unless_relaxed() {
        let file = csv_file("code,email\nA,a@x.io\n");
        let err = RowSource::open(
            file.path(),
            "customer",
            COLUMNS,
            HeaderMatch::Exact,
            CancellationToken::new(),
        )
        .err()
        .expect("exact match fails");
        assert!(matches!(
            err,
            ImportError::MissingColumn { column: "Code", .. }
        ));

        let mut source = RowSource::open(
            file.path(),
            "customer",
            COLUMNS,
            HeaderMatch::IgnoreCase,
            CancellationToken::new(),
        )
        .expect("relaxed match");
        let row = source.next().expect("row").expect("ok");
        assert_eq!(row.get("Code"), Some("A"));
    }

    #[test]
    fn cancellation_stops_the_stream() {
        let file = csv_file("Code\nA\nB\nC\n");
        let cancel = CancellationToken::new();
        let mut source = RowSource::open(
            file.path(),
            "customer",
            COLUMNS,
            HeaderMatch::Exact,
            cancel.clone(),
        )
        .expect("open");

        assert!(source.next().expect("first").is_ok());
        cancel.cancel();
        assert!(matches!(source.next(), Some(Err(ImportError::Cancelled))));
        assert!(source.next().is_none());
    }
}
