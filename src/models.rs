use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::catalog::{AnalysisRecord, ColumnDescriptor, ColumnType, DataFormat, Dataset};
use crate::error::AnalysisError;
use crate::schema::{analyses, dataset_columns, datasets};

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = datasets)]
#[diesel(primary_key(id))]
pub struct DatasetRow {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub table_name: String,
    pub format: String,
    pub source_path: String,
    pub row_count: i64,
    pub column_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = datasets)]
pub struct NewDatasetRow<'a> {
    pub id: &'a str,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub table_name: &'a str,
    pub format: &'a str,
    pub source_path: &'a str,
    pub row_count: i64,
    pub column_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(AsChangeset)]
#[diesel(table_name = datasets)]
#[diesel(treat_none_as_null = true)]
pub struct DatasetChanges<'a> {
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub table_name: &'a str,
    pub format: &'a str,
    pub source_path: &'a str,
    pub row_count: i64,
    pub column_count: i32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Identifiable, Associations, Debug, Clone)]
#[diesel(table_name = dataset_columns)]
#[diesel(belongs_to(DatasetRow, foreign_key = dataset_id))]
#[diesel(primary_key(dataset_id, position))]
pub struct ColumnRow {
    pub dataset_id: String,
    pub position: i32,
    pub name: String,
    pub original_name: String,
    pub data_type: String,
    pub nullable: bool,
}

#[derive(Insertable)]
#[diesel(table_name = dataset_columns)]
pub struct NewColumnRow<'a> {
    pub dataset_id: &'a str,
    pub position: i32,
    pub name: &'a str,
    pub original_name: &'a str,
    pub data_type: &'a str,
    pub nullable: bool,
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = analyses)]
pub struct AnalysisRow {
    pub id: Uuid,
    pub dataset_id: String,
    pub query: String,
    pub result: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = analyses)]
pub struct NewAnalysisRow<'a> {
    pub id: Uuid,
    pub dataset_id: &'a str,
    pub query: &'a str,
    pub result: &'a serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl<'a> NewDatasetRow<'a> {
    pub fn from_dataset(dataset: &'a Dataset) -> Self {
        Self {
            id: &dataset.id,
            title: &dataset.title,
            description: dataset.description.as_deref(),
            table_name: &dataset.table_name,
            format: dataset.format.as_str(),
            source_path: &dataset.source_path,
            row_count: dataset.row_count,
            column_count: dataset.column_count,
            created_at: dataset.created_at,
            updated_at: dataset.updated_at,
        }
    }
}

impl<'a> DatasetChanges<'a> {
    pub fn from_dataset(dataset: &'a Dataset) -> Self {
        Self {
            title: &dataset.title,
            description: dataset.description.as_deref(),
            table_name: &dataset.table_name,
            format: dataset.format.as_str(),
            source_path: &dataset.source_path,
            row_count: dataset.row_count,
            column_count: dataset.column_count,
            updated_at: dataset.updated_at,
        }
    }
}

pub fn new_column_rows(dataset: &Dataset) -> Vec<NewColumnRow<'_>> {
    dataset
        .columns
        .iter()
        .enumerate()
        .map(|(position, column)| NewColumnRow {
            dataset_id: &dataset.id,
            position: position as i32,
            name: &column.name,
            original_name: &column.original_name,
            data_type: column.data_type.as_str(),
            nullable: column.nullable,
        })
        .collect()
}

impl TryFrom<ColumnRow> for ColumnDescriptor {
    type Error = AnalysisError;

    fn try_from(row: ColumnRow) -> Result<Self, Self::Error> {
        let data_type =
            ColumnType::from_name(&row.data_type).ok_or_else(|| AnalysisError::Internal {
                message: format!(
                    "Unknown column type {} stored for {}.{}",
                    row.data_type, row.dataset_id, row.name
                ),
            })?;
        Ok(ColumnDescriptor {
            name: row.name,
            original_name: row.original_name,
            data_type,
            nullable: row.nullable,
        })
    }
}

impl DatasetRow {
    /// Joins a dataset row with its columns, which must be in position order.
    pub fn into_dataset(self, columns: Vec<ColumnRow>) -> Result<Dataset, AnalysisError> {
        let format = DataFormat::from_name(&self.format).ok_or_else(|| AnalysisError::Internal {
            message: format!("Unknown format {} stored for {}", self.format, self.id),
        })?;
        let columns = columns
            .into_iter()
            .map(ColumnDescriptor::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Dataset {
            id: self.id,
            title: self.title,
            description: self.description,
            table_name: self.table_name,
            format,
            source_path: self.source_path,
            row_count: self.row_count,
            column_count: self.column_count,
            columns,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl From<AnalysisRow> for AnalysisRecord {
    fn from(row: AnalysisRow) -> Self {
        AnalysisRecord {
            id: row.id,
            dataset_id: row.dataset_id,
            query: row.query,
            result: row.result,
            created_at: row.created_at,
        }
    }
}
