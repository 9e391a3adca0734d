//! Column type inference for loosely typed uploads.
//!
//! Every column is assigned the strictest type for which all of its non-missing
//! cells parse: integer, float, boolean, timestamp, and finally text.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::collections::HashSet;

use crate::catalog::ColumnType;
use crate::query_parser::FORBIDDEN_KEYWORDS;

const MISSING_MARKERS: &[&str] = &["", "na", "n/a", "null", "none", "nan"];

const TRUE_TOKENS: &[&str] = &["true", "yes", "1"];
const FALSE_TOKENS: &[&str] = &["false", "no", "0"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Clause words that would need quoting if used bare as a column name.
const RESERVED_WORDS: &[&str] = &[
    "select", "from", "where", "group", "order", "by", "having", "limit", "offset", "and", "or",
    "not", "null", "true", "false", "as", "on", "join", "union", "with", "case", "when", "then",
    "else", "end", "distinct", "exists", "interval", "in", "is", "like", "between", "cast", "all",
    "asc", "desc",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

const INFERENCE_ORDER: &[ColumnType] = &[
    ColumnType::Integer,
    ColumnType::Float,
    ColumnType::Boolean,
    ColumnType::Timestamp,
];

/// A typed cell produced by [`parse_cell`].
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(NaiveDateTime),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnInference {
    pub data_type: ColumnType,
    pub missing: usize,
    pub parsed: usize,
}

pub fn is_missing(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty()
        || MISSING_MARKERS
            .iter()
            .any(|marker| trimmed.eq_ignore_ascii_case(marker))
}

fn parse_integer(raw: &str) -> Option<i64> {
    raw.parse::<i64>().ok()
}

fn parse_float(raw: &str) -> Option<f64> {
    // Rust accepts "inf" and "NaN" spellings; uploads should not.
    if !raw.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse::<f64>().ok().filter(|value| value.is_finite())
}

fn parse_boolean(raw: &str) -> Option<bool> {
    let lowered = raw.to_ascii_lowercase();
    if TRUE_TOKENS.contains(&lowered.as_str()) {
        Some(true)
    } else if FALSE_TOKENS.contains(&lowered.as_str()) {
        Some(false)
    } else {
        None
    }
}

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}

fn parses_as(raw: &str, data_type: ColumnType) -> bool {
    match data_type {
        ColumnType::Integer => parse_integer(raw).is_some(),
        ColumnType::Float => parse_float(raw).is_some(),
        ColumnType::Boolean => parse_boolean(raw).is_some(),
        ColumnType::Timestamp => parse_timestamp(raw).is_some(),
        ColumnType::Text => true,
    }
}

/// Infers the type of one column from its raw cells. `None` cells are missing.
pub fn infer_column(values: &[Option<String>]) -> ColumnInference {
    let present: Vec<&str> = values
        .iter()
        .filter_map(|value| value.as_deref())
        .map(str::trim)
        .filter(|value| !is_missing(value))
        .collect();
    let missing = values.len() - present.len();

    if present.is_empty() {
        return ColumnInference {
            data_type: ColumnType::Text,
            missing,
            parsed: 0,
        };
    }

    let data_type = INFERENCE_ORDER
        .iter()
        .copied()
        .find(|candidate| present.iter().all(|value| parses_as(value, *candidate)))
        .unwrap_or(ColumnType::Text);

    ColumnInference {
        data_type,
        missing,
        parsed: present.len(),
    }
}

/// Converts one raw cell into a value of the column's inferred type.
///
/// Missing markers become [`CellValue::Null`]; a cell that does not parse as
/// `data_type` is also stored as null, which cannot happen for types chosen by
/// [`infer_column`] over the same cells.
pub fn parse_cell(raw: Option<&str>, data_type: ColumnType) -> CellValue {
    let raw = match raw.map(str::trim) {
        Some(raw) if !is_missing(raw) => raw,
        _ => return CellValue::Null,
    };
    let parsed = match data_type {
        ColumnType::Integer => parse_integer(raw).map(CellValue::Integer),
        ColumnType::Float => parse_float(raw).map(CellValue::Float),
        ColumnType::Boolean => parse_boolean(raw).map(CellValue::Boolean),
        ColumnType::Timestamp => parse_timestamp(raw).map(CellValue::Timestamp),
        ColumnType::Text => Some(CellValue::Text(raw.to_string())),
    };
    parsed.unwrap_or(CellValue::Null)
}

fn normalize_header(header: &str, position: usize) -> String {
    let mut name = String::with_capacity(header.len());
    let mut pending_separator = false;
    for ch in header.trim().chars().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() {
            if pending_separator && !name.is_empty() {
                name.push('_');
            }
            pending_separator = false;
            name.push(ch);
        } else {
            pending_separator = true;
        }
    }

    if name.is_empty() {
        return format!("column_{}", position + 1);
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert_str(0, "c_");
    }
    if is_reserved(&name) {
        name.push_str("_col");
    }
    name
}

fn is_reserved(name: &str) -> bool {
    RESERVED_WORDS.contains(&name)
        || FORBIDDEN_KEYWORDS
            .iter()
            .any(|keyword| keyword.eq_ignore_ascii_case(name))
}

/// Normalizes raw header names into unique storage identifiers.
///
/// Names are lower-cased, runs of whitespace and punctuation collapse into a
/// single `_`, SQL keywords gain a `_col` suffix, and duplicates receive `_2`, `_3`, ... in order of appearance.
pub fn normalize_headers(headers: &[String]) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::with_capacity(headers.len());
    let mut names = Vec::with_capacity(headers.len());

    for (position, header) in headers.iter().enumerate() {
        let base = normalize_header(header, position);
        let mut candidate = base.clone();
        let mut suffix = 2;
        while taken.contains(&candidate) {
            candidate = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        taken.insert(candidate.clone());
        names.push(candidate);
    }

    names
}
