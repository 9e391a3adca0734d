use datafusion::arrow::array::{
    ArrayRef, BooleanBuilder, Float64Builder, Int64Array, Int64Builder, StringBuilder,
    TimestampMicrosecondBuilder,
};
use datafusion::arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::catalog::TableProvider;
use datafusion::datasource::MemTable;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::{ColumnDescriptor, ColumnType};
use crate::error::AnalysisError;
use crate::inference::CellValue;

/// Surrogate identity assigned to every stored row at load time.
pub const ROW_ID_COLUMN: &str = "_row_id";

pub type Row = Vec<CellValue>;

pub fn arrow_type(data_type: ColumnType) -> DataType {
    match data_type {
        ColumnType::Integer => DataType::Int64,
        ColumnType::Float => DataType::Float64,
        ColumnType::Boolean => DataType::Boolean,
        ColumnType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
        ColumnType::Text => DataType::Utf8,
    }
}

/// One immutable, fully loaded version of a dataset's table.
#[derive(Debug)]
pub struct TableSnapshot {
    pub dataset_id: String,
    pub table_name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
    pub row_count: usize,
}

impl TableSnapshot {
    pub fn table_provider(&self) -> Result<Arc<dyn TableProvider>, AnalysisError> {
        let table = MemTable::try_new(self.schema.clone(), vec![self.batches.clone()])
            .map_err(|e| AnalysisError::Internal {
                message: format!("Failed to build table {}: {}", self.table_name, e),
            })?;
        Ok(Arc::new(table))
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.schema.index_of(name).ok()
    }
}

#[derive(Debug)]
struct StagedTable {
    table_name: String,
    columns: Vec<ColumnDescriptor>,
}

type LockMap = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Exclusive hold on one dataset's loads, replacements and drops.
///
/// The map entry is removed when the last holder or waiter lets go.
pub struct DatasetLock<'a> {
    locks: &'a LockMap,
    dataset_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for DatasetLock<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock();
        let Some(guard) = self.guard.take() else {
            return;
        };
        let mutex = OwnedMutexGuard::mutex(&guard).clone();
        drop(guard);
        // One reference in the map and one here means nobody is queued.
        let idle = locks
            .get(&self.dataset_id)
            .is_some_and(|entry| Arc::ptr_eq(entry, &mutex) && Arc::strong_count(&mutex) == 2);
        if idle {
            locks.remove(&self.dataset_id);
        }
    }
}

/// Owns every dataset's physical table.
///
/// Loads are staged and built off to the side, then swapped in whole by
/// [`TableManager::commit`]: readers hold an `Arc` of the snapshot they started
/// with and never observe a partially loaded table.
pub struct TableManager {
    batch_size: usize,
    live: RwLock<HashMap<String, Arc<TableSnapshot>>>,
    staging: Mutex<HashMap<String, StagedTable>>,
    ingest_locks: LockMap,
}

impl TableManager {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            live: RwLock::new(HashMap::new()),
            staging: Mutex::new(HashMap::new()),
            ingest_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Waits for exclusive access to `dataset_id`.
    pub async fn lock_dataset(&self, dataset_id: &str) -> DatasetLock<'_> {
        let mutex = {
            let mut locks = self.ingest_locks.lock();
            // Entries left behind by waiters that gave up before acquiring.
            locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
            locks.entry(dataset_id.to_string()).or_default().clone()
        };
        let guard = mutex.lock_owned().await;
        DatasetLock {
            locks: &self.ingest_locks,
            dataset_id: dataset_id.to_string(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    pub(crate) fn lock_entries(&self) -> usize {
        self.ingest_locks.lock().len()
    }

    pub fn create_table(
        &self,
        dataset_id: &str,
        columns: Vec<ColumnDescriptor>,
    ) -> Result<String, AnalysisError> {
        if columns.is_empty() {
            return Err(AnalysisError::schema("Table needs at least one column"));
        }
        if columns.iter().all(|c| c.name == ROW_ID_COLUMN) {
            return Err(AnalysisError::schema(
                "Table has no columns besides the row identity",
            ));
        }
        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            if column.name == ROW_ID_COLUMN {
                return Err(AnalysisError::schema(format!(
                    "Column name {} is reserved",
                    ROW_ID_COLUMN
                )));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(AnalysisError::schema(format!(
                    "Duplicate column name {}",
                    column.name
                )));
            }
        }

        let table_name = format!("tbl_{}", Uuid::new_v4().simple());
        let previous = self.staging.lock().insert(
            dataset_id.to_string(),
            StagedTable {
                table_name: table_name.clone(),
                columns,
            },
        );
        if let Some(previous) = previous {
            warn!(
                "Discarding abandoned staging table {} for dataset {}",
                previous.table_name, dataset_id
            );
        }

        debug!("Staged table {} for dataset {}", table_name, dataset_id);
        Ok(table_name)
    }

    /// Loads `rows` into the staged table and returns it unpublished.
    ///
    /// On any error the staging table is discarded. The live table is never
    /// touched here; see [`TableManager::commit`].
    pub fn bulk_load(
        &self,
        dataset_id: &str,
        rows: Vec<Row>,
    ) -> Result<Arc<TableSnapshot>, AnalysisError> {
        let staged = self.staging.lock().remove(dataset_id).ok_or_else(|| {
            AnalysisError::Internal {
                message: format!("No staged table for dataset {}", dataset_id),
            }
        })?;

        let schema = Self::schema_for(&staged.columns);
        let mut batches = Vec::with_capacity(rows.len() / self.batch_size + 1);
        let mut next_id: i64 = 1;

        for chunk in rows.chunks(self.batch_size) {
            let mut arrays: Vec<ArrayRef> = Vec::with_capacity(staged.columns.len() + 1);
            let ids = Int64Array::from_iter_values(next_id..next_id + chunk.len() as i64);
            arrays.push(Arc::new(ids));
            next_id += chunk.len() as i64;

            for (offset, row) in chunk.iter().enumerate() {
                if row.len() != staged.columns.len() {
                    return Err(AnalysisError::schema(format!(
                        "Row {} has {} values, expected {}",
                        next_id - chunk.len() as i64 + offset as i64,
                        row.len(),
                        staged.columns.len()
                    )));
                }
            }

            for (index, column) in staged.columns.iter().enumerate() {
                arrays.push(Self::build_array(column, chunk, index)?);
            }

            batches.push(RecordBatch::try_new(schema.clone(), arrays)?);
        }

        let snapshot = Arc::new(TableSnapshot {
            dataset_id: dataset_id.to_string(),
            table_name: staged.table_name,
            columns: staged.columns,
            schema,
            batches,
            row_count: rows.len(),
        });

        debug!(
            "Built {} with {} rows for dataset {}",
            snapshot.table_name, snapshot.row_count, dataset_id
        );
        Ok(snapshot)
    }

    /// Makes `snapshot` its dataset's live table and returns the one it replaced.
    pub fn commit(&self, snapshot: Arc<TableSnapshot>) -> Option<Arc<TableSnapshot>> {
        let previous = self
            .live
            .write()
            .insert(snapshot.dataset_id.clone(), snapshot.clone());

        info!(
            "Loaded {} rows into {} for dataset {}{}",
            snapshot.row_count,
            snapshot.table_name,
            snapshot.dataset_id,
            previous
                .as_ref()
                .map(|p| format!(" (replacing {})", p.table_name))
                .unwrap_or_default()
        );
        previous
    }

    pub fn drop_table(&self, dataset_id: &str) {
        self.staging.lock().remove(dataset_id);
        if let Some(snapshot) = self.live.write().remove(dataset_id) {
            info!(
                "Dropped table {} for dataset {}",
                snapshot.table_name, dataset_id
            );
        }
    }

    pub fn get_columns(&self, dataset_id: &str) -> Result<Vec<ColumnDescriptor>, AnalysisError> {
        self.snapshot(dataset_id)
            .map(|snapshot| snapshot.columns.clone())
            .ok_or_else(|| AnalysisError::not_found(dataset_id))
    }

    pub fn snapshot(&self, dataset_id: &str) -> Option<Arc<TableSnapshot>> {
        self.live.read().get(dataset_id).cloned()
    }

    fn schema_for(columns: &[ColumnDescriptor]) -> SchemaRef {
        let mut fields = Vec::with_capacity(columns.len() + 1);
        fields.push(Field::new(ROW_ID_COLUMN, DataType::Int64, false));
        fields.extend(
            columns
                .iter()
                .map(|c| Field::new(c.name.as_str(), arrow_type(c.data_type), true)),
        );
        Arc::new(Schema::new(fields))
    }

    fn build_array(
        column: &ColumnDescriptor,
        rows: &[Row],
        index: usize,
    ) -> Result<ArrayRef, AnalysisError> {
        let mismatch = |value: &CellValue| {
            AnalysisError::schema(format!(
                "Value {:?} does not fit {} column {}",
                value, column.data_type, column.name
            ))
        };

        let array: ArrayRef = match column.data_type {
            ColumnType::Integer => {
                let mut builder = Int64Builder::with_capacity(rows.len());
                for row in rows {
                    match &row[index] {
                        CellValue::Null => builder.append_null(),
                        CellValue::Integer(v) => builder.append_value(*v),
                        other => return Err(mismatch(other)),
                    }
                }
                Arc::new(builder.finish())
            }
            ColumnType::Float => {
                let mut builder = Float64Builder::with_capacity(rows.len());
                for row in rows {
                    match &row[index] {
                        CellValue::Null => builder.append_null(),
                        CellValue::Float(v) => builder.append_value(*v),
                        CellValue::Integer(v) => builder.append_value(*v as f64),
                        other => return Err(mismatch(other)),
                    }
                }
                Arc::new(builder.finish())
            }
            ColumnType::Boolean => {
                let mut builder = BooleanBuilder::with_capacity(rows.len());
                for row in rows {
                    match &row[index] {
                        CellValue::Null => builder.append_null(),
                        CellValue::Boolean(v) => builder.append_value(*v),
                        other => return Err(mismatch(other)),
                    }
                }
                Arc::new(builder.finish())
            }
            ColumnType::Timestamp => {
                let mut builder = TimestampMicrosecondBuilder::with_capacity(rows.len());
                for row in rows {
                    match &row[index] {
                        CellValue::Null => builder.append_null(),
                        CellValue::Timestamp(v) => {
                            builder.append_value(v.and_utc().timestamp_micros())
                        }
                        other => return Err(mismatch(other)),
                    }
                }
                Arc::new(builder.finish())
            }
            ColumnType::Text => {
                let mut builder = StringBuilder::with_capacity(rows.len(), rows.len() * 16);
                for row in rows {
                    match &row[index] {
                        CellValue::Null => builder.append_null(),
                        CellValue::Text(v) => builder.append_value(v),
                        other => return Err(mismatch(other)),
                    }
                }
                Arc::new(builder.finish())
            }
        };
        Ok(array)
    }
}
