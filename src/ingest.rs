use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::catalog::{ColumnDescriptor, DataFormat};
use crate::error::AnalysisError;
use crate::inference::{self, CellValue};
use crate::readers::{self, RawTable};
use crate::table_manager::{Row, TableManager, TableSnapshot};

/// A successfully loaded upload.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub format: DataFormat,
    pub snapshot: Arc<TableSnapshot>,
}

impl IngestOutcome {
    pub fn table_name(&self) -> &str {
        &self.snapshot.table_name
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.snapshot.columns
    }

    pub fn row_count(&self) -> usize {
        self.snapshot.row_count
    }
}

/// A parsed, typed table ready to be loaded.
#[derive(Debug)]
pub struct PreparedTable {
    pub format: DataFormat,
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<Row>,
}

/// Reads, infers and types an upload without touching any stored table.
pub fn prepare(
    bytes: &[u8],
    declared_format: Option<&str>,
    file_name: Option<&str>,
) -> Result<PreparedTable, AnalysisError> {
    let format = readers::detect_format(bytes, declared_format, file_name)?;
    let RawTable { headers, rows } = readers::read_table(bytes, format)?;

    if headers.is_empty() {
        return Err(AnalysisError::schema("File has no columns"));
    }
    if rows.is_empty() {
        return Err(AnalysisError::EmptyDataset {
            message: format!("{} file has a header but no data rows", format),
        });
    }

    let names = inference::normalize_headers(&headers);
    let mut columns = Vec::with_capacity(headers.len());
    let mut types = Vec::with_capacity(headers.len());
    for (index, (original_name, name)) in headers.iter().zip(names).enumerate() {
        let values: Vec<Option<String>> = rows
            .iter()
            .map(|row| row.get(index).cloned().flatten())
            .collect();
        let inferred = inference::infer_column(&values);
        debug!(
            "Column {} inferred as {} ({} missing)",
            name, inferred.data_type, inferred.missing
        );
        types.push(inferred.data_type);
        columns.push(ColumnDescriptor {
            name,
            original_name: original_name.clone(),
            data_type: inferred.data_type,
            nullable: inferred.missing > 0,
        });
    }

    let typed_rows = rows
        .iter()
        .map(|row| {
            types
                .iter()
                .enumerate()
                .map(|(index, data_type)| {
                    let cell = row.get(index).and_then(|c| c.as_deref());
                    inference::parse_cell(cell, *data_type)
                })
                .collect::<Vec<CellValue>>()
        })
        .collect();

    Ok(PreparedTable {
        format,
        columns,
        rows: typed_rows,
    })
}

/// Turns uploaded bytes into a loaded table.
///
/// [`IngestionPipeline::load`] builds the table without publishing it, so the
/// caller can finish its own bookkeeping first and then call
/// [`IngestionPipeline::publish`]. A load that is never published leaves
/// whatever table the dataset had before untouched. Callers serialize work on
/// one dataset through [`TableManager::lock_dataset`].
pub struct IngestionPipeline {
    tables: Arc<TableManager>,
}

impl IngestionPipeline {
    pub fn new(tables: Arc<TableManager>) -> Self {
        Self { tables }
    }

    pub async fn load(
        &self,
        dataset_id: &str,
        bytes: Arc<Vec<u8>>,
        declared_format: Option<String>,
        file_name: Option<String>,
    ) -> Result<IngestOutcome, AnalysisError> {
        let start_time = Instant::now();
        let tables = self.tables.clone();
        let id = dataset_id.to_string();
        let outcome = tokio::task::spawn_blocking(move || {
            let prepared = prepare(&bytes, declared_format.as_deref(), file_name.as_deref())?;
            tables.create_table(&id, prepared.columns)?;
            let snapshot = tables.bulk_load(&id, prepared.rows)?;
            Ok::<_, AnalysisError>(IngestOutcome {
                format: prepared.format,
                snapshot,
            })
        })
        .await??;

        info!(
            "Ingested {} file for dataset {}: {} rows, {} columns in {}ms",
            outcome.format,
            dataset_id,
            outcome.row_count(),
            outcome.columns().len(),
            start_time.elapsed().as_millis()
        );
        Ok(outcome)
    }

    /// Makes a loaded table the dataset's live table.
    pub fn publish(&self, outcome: &IngestOutcome) {
        self.tables.commit(outcome.snapshot.clone());
    }
}
