use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::AnalysisError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DataFormat {
    #[serde(rename = "csv")]
    Csv,
    #[serde(rename = "excel")]
    Excel,
    #[serde(rename = "json")]
    Json,
}

impl DataFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataFormat::Csv => "csv",
            DataFormat::Excel => "excel",
            DataFormat::Json => "json",
        }
    }

    /// Maps a declared format or file extension onto a supported format.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().trim_start_matches('.').to_lowercase().as_str() {
            "csv" => Some(DataFormat::Csv),
            "xlsx" | "xls" | "xlsm" | "xlsb" | "excel" => Some(DataFormat::Excel),
            "json" => Some(DataFormat::Json),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DataFormat::Csv => "csv",
            DataFormat::Excel => "xlsx",
            DataFormat::Json => "json",
        }
    }
}

impl std::fmt::Display for DataFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Float,
    Boolean,
    Timestamp,
    Text,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Text => "text",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "integer" => Some(ColumnType::Integer),
            "float" => Some(ColumnType::Float),
            "boolean" => Some(ColumnType::Boolean),
            "timestamp" => Some(ColumnType::Timestamp),
            "text" => Some(ColumnType::Text),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub original_name: String,
    pub data_type: ColumnType,
    pub nullable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dataset {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub table_name: String,
    pub format: DataFormat,
    pub source_path: String,
    pub row_count: i64,
    pub column_count: i32,
    pub columns: Vec<ColumnDescriptor>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Metadata edits. `description: Some(None)` clears the description.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatasetUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<Option<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisRecord {
    pub id: Uuid,
    pub dataset_id: String,
    pub query: String,
    pub result: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn insert_dataset(&self, dataset: &Dataset) -> Result<(), AnalysisError>;

    async fn get_dataset(&self, dataset_id: &str) -> Result<Option<Dataset>, AnalysisError>;

    /// Newest first.
    async fn list_datasets(&self) -> Result<Vec<Dataset>, AnalysisError>;

    async fn update_dataset(&self, dataset: &Dataset) -> Result<(), AnalysisError>;

    /// Removes the dataset and its saved analyses. Returns false if it did not exist.
    async fn delete_dataset(&self, dataset_id: &str) -> Result<bool, AnalysisError>;

    async fn insert_analysis(&self, record: &AnalysisRecord) -> Result<(), AnalysisError>;

    async fn list_analyses(&self, dataset_id: &str) -> Result<Vec<AnalysisRecord>, AnalysisError>;
}

#[derive(Default)]
pub struct MemoryCatalog {
    datasets: RwLock<HashMap<String, Dataset>>,
    analyses: RwLock<HashMap<String, Vec<AnalysisRecord>>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn insert_dataset(&self, dataset: &Dataset) -> Result<(), AnalysisError> {
        let mut datasets = self.datasets.write();
        if datasets.contains_key(&dataset.id) {
            return Err(AnalysisError::Internal {
                message: format!("Dataset {} already exists", dataset.id),
            });
        }
        datasets.insert(dataset.id.clone(), dataset.clone());
        Ok(())
    }

    async fn get_dataset(&self, dataset_id: &str) -> Result<Option<Dataset>, AnalysisError> {
        Ok(self.datasets.read().get(dataset_id).cloned())
    }

    async fn list_datasets(&self) -> Result<Vec<Dataset>, AnalysisError> {
        let mut datasets: Vec<Dataset> = self.datasets.read().values().cloned().collect();
        datasets.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(datasets)
    }

    async fn update_dataset(&self, dataset: &Dataset) -> Result<(), AnalysisError> {
        match self.datasets.write().get_mut(&dataset.id) {
            Some(existing) => {
                *existing = dataset.clone();
                Ok(())
            }
            None => Err(AnalysisError::not_found(&dataset.id)),
        }
    }

    async fn delete_dataset(&self, dataset_id: &str) -> Result<bool, AnalysisError> {
        self.analyses.write().remove(dataset_id);
        Ok(self.datasets.write().remove(dataset_id).is_some())
    }

    async fn insert_analysis(&self, record: &AnalysisRecord) -> Result<(), AnalysisError> {
        self.analyses
            .write()
            .entry(record.dataset_id.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn list_analyses(&self, dataset_id: &str) -> Result<Vec<AnalysisRecord>, AnalysisError> {
        let mut records = self
            .analyses
            .read()
            .get(dataset_id)
            .cloned()
            .unwrap_or_default();
        records.reverse();
        Ok(records)
    }
}
