//! Row validation and value normalization.
//!
//! Validation is a pure function of the row: strings are trimmed, blank
//! values become absent, and the entity's required fields and maximum
//! lengths are enforced. Typed parsers for booleans, dates and bytes never
//! fail a row; an unparseable value is treated as absent.

use std::collections::HashMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::import::source::{Column, ImportRow};

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%m/%d/%Y %H:%M:%S", "%d/%m/%Y %H:%M:%S"];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y"];

/// Why a row was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    MissingField(&'static str),
    TooLong {
        field: &'static str,
        max: usize,
        len: usize,
    },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::MissingField(field) => write!(f, "missing required field {field}"),
            Rejection::TooLong { field, max, len } => {
                write!(f, "{field} is {len} characters long (max {max})")
            }
        }
    }
}

/// A row whose values are trimmed and checked against the column rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidRow {
    pub line: u64,
    values: HashMap<&'static str, String>,
}

impl ValidRow {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.values.get(field).map(String::as_str)
    }

    pub fn text(&self, field: &str) -> Option<String> {
        self.get(field).map(str::to_string)
    }

    /// Value of a field the validator already guaranteed to be present.
    pub fn require(&self, field: &'static str) -> Result<String, Rejection> {
        self.text(field).ok_or(Rejection::MissingField(field))
    }

    pub fn flag(&self, field: &str) -> Option<bool> {
        self.get(field).and_then(parse_bool)
    }

    pub fn datetime(&self, field: &str) -> Option<NaiveDateTime> {
        self.get(field).and_then(parse_datetime)
    }

    pub fn byte(&self, field: &str) -> Option<u8> {
        self.get(field).and_then(parse_u8)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RowValidator {
    columns: &'static [Column],
}

impl RowValidator {
    pub fn new(columns: &'static [Column]) -> Self {
        Self { columns }
    }

    pub fn validate(&self, row: &ImportRow) -> Result<ValidRow, Rejection> {
        let mut values = HashMap::with_capacity(self.columns.len());
        for column in self.columns {
            match clean(row.get(column.field)) {
                Some(value) => {
                    if let Some(max) = column.max_len {
                        let len = value.chars().count();
                        if len > max {
                            return Err(Rejection::TooLong {
                                field: column.field,
                                max,
                                len,
                            });
                        }
                    }
                    values.insert(column.field, value);
                }
                None if column.required => return Err(Rejection::MissingField(column.field)),
                None => {}
            }
        }
        Ok(ValidRow {
            line: row.line,
            values,
        })
    }
}

/// Trim a raw value; all-whitespace counts as absent.
pub fn clean(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|trimmed| !trimmed.is_empty())
        .map(str::to_string)
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Some(true),
        "false" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

/// Explicit formats first, then general parsing.
pub fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    for format in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Some(date.and_time(NaiveTime::MIN));
        }
    }
    dateparser::parse_with_timezone(value, &Utc)
        .ok()
        .map(|parsed| parsed.naive_utc())
}

pub fn parse_u8(value: &str) -> Option<u8> {
    value.trim().parse::<u8>().ok()
}

/// Split a `,`/`;`/`|` delimited list, dropping blank entries.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split([',', ';', '|'])
        .filter_map(|item| clean(Some(item)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    const COLUMNS: &[Column] = &[
        Column::required("Code").max(5),
        Column::required("Name"),
        Column::optional("Email"),
    ];

    #[test]
    fn trims_and_drops_blank_optionals() {
        let row = ImportRow::new(2)
            .with("Code", "  A1 ")
            .with("Name", "Acme")
            .with("Email", "   ");
        let valid = RowValidator::new(COLUMNS).validate(&row).expect("valid");
        assert_eq!(valid.get("Code"), Some("A1"));
        assert_eq!(valid.get("Email"), None);
        assert_eq!(valid.line, 2);
    }

    #[test]
    fn rejects_blank_required_field() {
        let row = ImportRow::new(3).with("Code", "A1").with("Name", " \t ");
        let err = RowValidator::new(COLUMNS).validate(&row).unwrap_err();
        assert_eq!(err, Rejection::MissingField("Name"));
    }

    #[test]
    fn rejects_values_over_max_length() {
        let row = ImportRow::new(4).with("Code", "ABCDEF").with("Name", "Acme");
        let err = RowValidator::new(COLUMNS).validate(&row).unwrap_err();
        assert_eq!(
            err,
            Rejection::TooLong {
                field: "Code",
                max: 5,
                len: 6
            }
        );
    }

    #[test]
    fn parses_boolean_literals() {
        for raw in ["true", "TRUE", "1", "yes", "Y"] {
            assert_eq!(parse_bool(raw), Some(true), "{raw}");
        }
        for raw in ["false", "0", "No", "n"] {
            assert_eq!(parse_bool(raw), Some(false), "{raw}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parses_explicit_date_formats() {
        let parsed = parse_datetime("2024-03-05 14:30:00").expect("iso datetime");
        assert_eq!((parsed.month(), parsed.day(), parsed.hour()), (3, 5, 14));

        let parsed = parse_datetime("2024-03-05").expect("iso date");
        assert_eq!(parsed.hour(), 0);

        let us = parse_datetime("03/05/2024").expect("month first");
        assert_eq!((us.month(), us.day()), (3, 5));

        let day_first = parse_datetime("25/12/2024").expect("day first fallback");
        assert_eq!((day_first.month(), day_first.day()), (12, 25));
    }

    #[test]
    fn falls_back_to_general_parsing() {
        let parsed = parse_datetime("2024-03-05T08:15:00Z").expect("rfc3339");
        assert_eq!((parsed.day(), parsed.hour(), parsed.minute()), (5, 8, 15));
        assert_eq!(parse_datetime("not a date"), None);
    }

    #[test]
    fn parses_bytes_and_lists() {
        assert_eq!(parse_u8(" 7 "), Some(7));
        assert_eq!(parse_u8("300"), None);
        assert_eq!(split_list("Admin; Users|,Ops ,"), vec!["Admin", "Users", "Ops"]);
    }
}
