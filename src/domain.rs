use serde::Serialize;
use serde_json::Value;

use crate::catalog::DataFormat;

/// A new upload: catalog metadata plus the raw file.
#[derive(Debug, Clone)]
pub struct NewDataset {
    pub title: String,
    pub description: Option<String>,
    pub file_name: Option<String>,
    pub format: Option<String>,
    pub bytes: Vec<u8>,
}

impl NewDataset {
    pub fn new(title: impl Into<String>, file: FileUpload) -> Self {
        Self {
            title: title.into(),
            description: None,
            file_name: file.file_name,
            format: file.format,
            bytes: file.bytes,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Splits into `(title, description, file)`.
    pub fn into_parts(self) -> (String, Option<String>, FileUpload) {
        let file = FileUpload {
            file_name: self.file_name,
            format: self.format,
            bytes: self.bytes,
        };
        (self.title, self.description, file)
    }
}

#[derive(Debug, Clone)]
pub struct FileUpload {
    pub file_name: Option<String>,
    /// Declared format; sniffed from the file name and content when absent.
    pub format: Option<String>,
    pub bytes: Vec<u8>,
}

impl FileUpload {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: Some(file_name.into()),
            format: None,
            bytes: bytes.into(),
        }
    }

    pub fn with_format(mut self, format: DataFormat) -> Self {
        self.format = Some(format.as_str().to_string());
        self
    }
}

/// One page of a restricted query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub column_types: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Rows the whole query yields, independent of the page window.
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
}

/// One page of the stored table in row order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPage {
    pub table_name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
}
