use calamine::{open_workbook_auto_from_rs, Data, DataType, Reader};
use serde_json::Value;
use std::io::Cursor;
use tracing::debug;

use crate::catalog::DataFormat;
use crate::error::AnalysisError;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// A rectangular table of raw, trimmed cells. `None` marks an absent cell.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

fn looks_like_excel(bytes: &[u8]) -> bool {
    bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(OLE_MAGIC)
}

/// Resolves the upload format from the declared name, then the file extension,
/// then the content itself.
pub fn detect_format(
    bytes: &[u8],
    declared: Option<&str>,
    file_name: Option<&str>,
) -> Result<DataFormat, AnalysisError> {
    if let Some(declared) = declared.filter(|d| !d.trim().is_empty()) {
        return DataFormat::from_name(declared).ok_or_else(|| {
            AnalysisError::format(format!(
                "Unsupported file format '{}'; expected csv, xlsx, xls or json",
                declared
            ))
        });
    }

    if let Some(format) = file_name
        .and_then(|name| name.rsplit_once('.'))
        .and_then(|(_, ext)| DataFormat::from_name(ext))
    {
        return Ok(format);
    }

    if looks_like_excel(bytes) {
        return Ok(DataFormat::Excel);
    }
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    match body.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'[') => Ok(DataFormat::Json),
        _ => Ok(DataFormat::Csv),
    }
}

pub fn read_table(bytes: &[u8], format: DataFormat) -> Result<RawTable, AnalysisError> {
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(AnalysisError::format("The uploaded file is empty"));
    }
    let table = match format {
        DataFormat::Csv => read_csv(bytes)?,
        DataFormat::Excel => read_excel(bytes)?,
        DataFormat::Json => read_json(bytes)?,
    };
    debug!(
        "Parsed {} file: {} columns, {} rows",
        format,
        table.headers.len(),
        table.rows.len()
    );
    Ok(table)
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn read_csv(bytes: &[u8]) -> Result<RawTable, AnalysisError> {
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(b',')
        .flexible(false)
        .trim(csv::Trim::All)
        .from_reader(body);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| AnalysisError::format(format!("Failed to read CSV header: {}", e)))?
        .iter()
        .map(|h| h.to_string())
        .collect();

    if headers.iter().all(|h| h.is_empty()) {
        return Err(AnalysisError::schema("CSV header row has no column names"));
    }

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|e| match e.kind() {
            csv::ErrorKind::UnequalLengths {
                expected_len, len, ..
            } => AnalysisError::format(format!(
                "CSV record {} has {} fields, expected {}",
                index + 1,
                len,
                expected_len
            )),
            _ => AnalysisError::format(format!("Failed to read CSV record {}: {}", index + 1, e)),
        })?;
        rows.push(record.iter().map(non_empty).collect());
    }

    Ok(RawTable { headers, rows })
}

fn excel_cell(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => non_empty(s),
        Data::Int(i) => Some(i.to_string()),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                Some(format!("{}", *f as i64))
            } else {
                Some(f.to_string())
            }
        }
        Data::Bool(b) => Some(b.to_string()),
        Data::DateTime(_) => cell
            .as_datetime()
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string()),
    }
}

fn read_excel(bytes: &[u8]) -> Result<RawTable, AnalysisError> {
    if !looks_like_excel(bytes) {
        return Err(AnalysisError::format(
            "File is not an Excel workbook (missing xlsx/xls signature)",
        ));
    }

    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| AnalysisError::format(format!("Excel: {}", e)))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| AnalysisError::format("Excel workbook has no worksheets"))?
        .map_err(|e| AnalysisError::format(format!("Excel: {}", e)))?;

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(header_row) => header_row
            .iter()
            .map(|cell| excel_cell(cell).unwrap_or_default())
            .collect(),
        None => return Err(AnalysisError::schema("First worksheet is empty")),
    };

    let rows = rows
        .map(|row| row.iter().map(excel_cell).collect::<Vec<_>>())
        .filter(|row| row.iter().any(Option::is_some))
        .collect();

    Ok(RawTable { headers, rows })
}

fn json_cell(value: &Value, row: usize) -> Result<Option<String>, AnalysisError> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(b.to_string())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::String(s) => Ok(non_empty(s)),
        Value::Array(_) | Value::Object(_) => Err(AnalysisError::format(format!(
            "JSON row {} contains a nested value; only flat records are supported",
            row + 1
        ))),
    }
}

fn read_json(bytes: &[u8]) -> Result<RawTable, AnalysisError> {
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let document: Value = serde_json::from_slice(body)
        .map_err(|e| AnalysisError::format(format!("Invalid JSON: {}", e)))?;

    let items = match document {
        Value::Array(items) => items,
        _ => {
            return Err(AnalysisError::format(
                "JSON upload must be an array of records",
            ))
        }
    };

    match items.first() {
        None => Err(AnalysisError::EmptyDataset {
            message: "JSON array has no records".to_string(),
        }),
        Some(Value::Object(_)) => read_json_objects(items),
        Some(Value::Array(_)) => read_json_arrays(items),
        Some(_) => Err(AnalysisError::format(
            "JSON array elements must be objects or arrays",
        )),
    }
}

fn read_json_objects(items: Vec<Value>) -> Result<RawTable, AnalysisError> {
    let mut headers: Vec<String> = Vec::new();
    for (index, item) in items.iter().enumerate() {
        let object = item.as_object().ok_or_else(|| {
            AnalysisError::format(format!("JSON element {} is not an object", index + 1))
        })?;
        for key in object.keys() {
            if !headers.contains(key) {
                headers.push(key.clone());
            }
        }
    }

    let mut rows = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let mut row = Vec::with_capacity(headers.len());
        for header in &headers {
            row.push(match item.get(header) {
                Some(value) => json_cell(value, index)?,
                None => None,
            });
        }
        rows.push(row);
    }

    Ok(RawTable { headers, rows })
}

fn read_json_arrays(items: Vec<Value>) -> Result<RawTable, AnalysisError> {
    let mut arrays = items.iter().enumerate().map(|(index, item)| {
        item.as_array().ok_or_else(|| {
            AnalysisError::format(format!("JSON element {} is not an array", index + 1))
        })
    });

    let headers: Vec<String> = match arrays.next() {
        Some(header) => header?
            .iter()
            .enumerate()
            .map(|(index, value)| {
                json_cell(value, 0).map(|cell| cell.unwrap_or_else(|| format!("column_{}", index + 1)))
            })
            .collect::<Result<_, _>>()?,
        None => Vec::new(),
    };

    let mut rows = Vec::new();
    for (index, array) in arrays.enumerate() {
        let array = array?;
        if array.len() != headers.len() {
            return Err(AnalysisError::format(format!(
                "Ragged JSON array: row {} has {} values, expected {}",
                index + 1,
                array.len(),
                headers.len()
            )));
        }
        rows.push(
            array
                .iter()
                .map(|value| json_cell(value, index + 1))
                .collect::<Result<Vec<_>, _>>()?,
        );
    }

    Ok(RawTable { headers, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_formats_by_declaration_extension_and_content() {
        assert_eq!(
            detect_format(b"a,b", Some("csv"), None).unwrap(),
            DataFormat::Csv
        );
        assert_eq!(
            detect_format(b"[]", None, Some("data.JSON")).unwrap(),
            DataFormat::Json
        );
        assert_eq!(
            detect_format(b"PK\x03\x04rest", None, None).unwrap(),
            DataFormat::Excel
        );
        assert_eq!(
            detect_format(b"  [{\"a\":1}]", None, None).unwrap(),
            DataFormat::Json
        );
        assert!(matches!(
            detect_format(b"a,b", Some("parquet"), None),
            Err(AnalysisError::Format { .. })
        ));
    }

    #[test]
    fn reads_csv_with_trimming_and_missing_cells() {
        let table = read_table(b"\xEF\xBB\xBFid, price ,category\n1, 10.5 ,A\n2,,B\n", DataFormat::Csv)
            .unwrap();
        assert_eq!(table.headers, vec!["id", "price", "category"]);
        assert_eq!(
            table.rows[1],
            vec![Some("2".to_string()), None, Some("B".to_string())]
        );
        assert_eq!(table.rows[0][1], Some("10.5".to_string()));
    }

    #[test]
    fn ragged_csv_is_a_format_error() {
        let result = read_table(b"a,b\n1,2\n3\n", DataFormat::Csv);
        match result {
            Err(AnalysisError::Format { message }) => assert!(message.contains("record 2")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn empty_upload_is_a_format_error() {
        assert!(matches!(
            read_table(b"  \n", DataFormat::Csv),
            Err(AnalysisError::Format { .. })
        ));
    }

    #[test]
    fn json_objects_union_keys_in_first_seen_order() {
        let table = read_table(
            br#"[{"b": 1, "a": "x"}, {"a": null, "c": true}]"#,
            DataFormat::Json,
        )
        .unwrap();
        assert_eq!(table.headers, vec!["b", "a", "c"]);
        assert_eq!(
            table.rows[1],
            vec![None, None, Some("true".to_string())]
        );
    }

    #[test]
    fn ragged_json_arrays_are_rejected() {
        let result = read_table(br#"[["a","b"],[1,2],[3]]"#, DataFormat::Json);
        assert!(matches!(result, Err(AnalysisError::Format { .. })));
    }

    #[test]
    fn nested_json_values_are_rejected() {
        let result = read_table(br#"[{"a": {"b": 1}}]"#, DataFormat::Json);
        assert!(matches!(result, Err(AnalysisError::Format { .. })));
    }

    #[test]
    fn non_workbook_bytes_declared_as_excel_are_rejected() {
        let result = read_table(b"id,price\n1,2\n", DataFormat::Excel);
        assert!(matches!(result, Err(AnalysisError::Format { .. })));
    }

    const SALES_WORKBOOK: &[u8] = include_bytes!("../tests/fixtures/sales.xlsx");

    #[test]
    fn reads_the_first_worksheet_of_a_workbook() {
        assert_eq!(
            detect_format(SALES_WORKBOOK, None, None).unwrap(),
            DataFormat::Excel
        );
        let table = read_table(SALES_WORKBOOK, DataFormat::Excel).unwrap();

        assert_eq!(
            table.headers,
            vec!["Region", "Units", "Price", "Sold On", "Ratio"]
        );
        let cell = |value: &str| Some(value.to_string());
        assert_eq!(
            table.rows,
            vec![
                // Whole floats read as integers; error cells are missing.
                vec![
                    cell("North"),
                    cell("3"),
                    cell("2.5"),
                    cell("2024-01-01 00:00:00"),
                    None
                ],
                // An absent cell is missing too.
                vec![
                    cell("South"),
                    cell("4"),
                    None,
                    cell("2024-01-15 18:00:00"),
                    cell("0.5")
                ],
                vec![
                    cell("East"),
                    cell("5"),
                    cell("7"),
                    cell("2024-01-02 00:00:00"),
                    None
                ],
            ]
        );
    }
}
