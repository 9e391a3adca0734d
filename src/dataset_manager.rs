use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::catalog::{AnalysisRecord, CatalogStore, Dataset, DatasetUpdate};
use crate::domain::{FileUpload, NewDataset};
use crate::error::AnalysisError;
use crate::ingest::{IngestOutcome, IngestionPipeline};
use crate::storage::DatasetStorage;
use crate::table_manager::{TableManager, TableSnapshot};

const UNTITLED: &str = "Untitled dataset";

/// Dataset lifecycle over the catalog, the stored source files and the live tables.
pub struct DatasetManager {
    catalog: Arc<dyn CatalogStore>,
    storage: DatasetStorage,
    tables: Arc<TableManager>,
    pipeline: IngestionPipeline,
}

fn default_title(file_name: Option<&str>) -> String {
    file_name
        .map(|name| name.rsplit(['/', '\\']).next().unwrap_or(name))
        .map(|name| name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name))
        .map(str::trim)
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| UNTITLED.to_string())
}

fn into_bytes(bytes: Arc<Vec<u8>>) -> Bytes {
    Bytes::from(Arc::try_unwrap(bytes).unwrap_or_else(|shared| shared.as_ref().clone()))
}

impl DatasetManager {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        storage: DatasetStorage,
        tables: Arc<TableManager>,
    ) -> Self {
        let pipeline = IngestionPipeline::new(tables.clone());
        Self {
            catalog,
            storage,
            tables,
            pipeline,
        }
    }

    pub fn storage(&self) -> &DatasetStorage {
        &self.storage
    }

    pub async fn create_dataset(&self, new_dataset: NewDataset) -> Result<Dataset, AnalysisError> {
        let (title, description, file) = new_dataset.into_parts();
        let dataset_id = format!("ds_{}", Uuid::new_v4().simple());
        let title = match title.trim() {
            "" => default_title(file.file_name.as_deref()),
            trimmed => trimmed.to_string(),
        };
        info!("Creating dataset {} ({})", dataset_id, title);

        let _lock = self.tables.lock_dataset(&dataset_id).await;
        let bytes = Arc::new(file.bytes);
        let outcome = self
            .pipeline
            .load(&dataset_id, bytes.clone(), file.format, file.file_name)
            .await?;

        let source_path = self
            .storage
            .save_source(
                &dataset_id,
                outcome.table_name(),
                outcome.format,
                into_bytes(bytes),
            )
            .await?;

        let now = Utc::now();
        let dataset = Dataset {
            id: dataset_id.clone(),
            title,
            description: description.filter(|d| !d.trim().is_empty()),
            table_name: String::new(),
            format: outcome.format,
            source_path,
            row_count: 0,
            column_count: 0,
            columns: Vec::new(),
            created_at: now,
            updated_at: now,
        }
        .with_outcome(&outcome);

        if let Err(e) = self.catalog.insert_dataset(&dataset).await {
            error!("Failed to record dataset {}: {}", dataset_id, e);
            if let Err(cleanup) = self.storage.delete_dataset(&dataset_id).await {
                warn!(
                    "Could not remove stored source of {}: {}",
                    dataset_id, cleanup
                );
            }
            return Err(e);
        }
        self.pipeline.publish(&outcome);

        info!(
            "Created dataset {} with {} rows in table {}",
            dataset.id, dataset.row_count, dataset.table_name
        );
        Ok(dataset)
    }

    pub async fn list_datasets(&self) -> Result<Vec<Dataset>, AnalysisError> {
        self.catalog.list_datasets().await
    }

    pub async fn get_dataset(&self, dataset_id: &str) -> Result<Dataset, AnalysisError> {
        self.catalog
            .get_dataset(dataset_id)
            .await?
            .ok_or_else(|| AnalysisError::not_found(dataset_id))
    }

    pub async fn update_dataset(
        &self,
        dataset_id: &str,
        update: DatasetUpdate,
    ) -> Result<Dataset, AnalysisError> {
        // Held so a concurrent replace cannot be overwritten with stale table facts.
        let _lock = self.tables.lock_dataset(dataset_id).await;
        let mut dataset = self.get_dataset(dataset_id).await?;

        if let Some(title) = update.title {
            let title = title.trim();
            if !title.is_empty() {
                dataset.title = title.to_string();
            }
        }
        if let Some(description) = update.description {
            dataset.description = description.filter(|d| !d.trim().is_empty());
        }
        dataset.updated_at = Utc::now();

        self.catalog.update_dataset(&dataset).await?;
        info!("Updated metadata of dataset {}", dataset_id);
        Ok(dataset)
    }

    /// Re-ingests a dataset from a new file.
    ///
    /// The new table only goes live once its source is stored and the catalog
    /// points at it. Any earlier failure leaves the previous table, source file
    /// and catalog entry untouched.
    pub async fn replace_dataset_file(
        &self,
        dataset_id: &str,
        file: FileUpload,
    ) -> Result<Dataset, AnalysisError> {
        let _lock = self.tables.lock_dataset(dataset_id).await;
        let dataset = self.get_dataset(dataset_id).await?;
        info!("Replacing file of dataset {}", dataset_id);

        let bytes = Arc::new(file.bytes);
        let outcome = self
            .pipeline
            .load(dataset_id, bytes.clone(), file.format, file.file_name)
            .await?;

        let source_path = self
            .storage
            .save_source(
                dataset_id,
                outcome.table_name(),
                outcome.format,
                into_bytes(bytes),
            )
            .await?;

        let mut dataset = dataset.with_outcome(&outcome);
        dataset.format = outcome.format;
        dataset.source_path = source_path;
        dataset.updated_at = Utc::now();
        if let Err(e) = self.catalog.update_dataset(&dataset).await {
            error!("Failed to record new file of dataset {}: {}", dataset_id, e);
            if let Err(cleanup) = self.storage.delete_source(&dataset.source_path).await {
                warn!(
                    "Could not remove unused source {}: {}",
                    dataset.source_path, cleanup
                );
            }
            return Err(e);
        }
        self.pipeline.publish(&outcome);

        if let Err(e) = self
            .storage
            .delete_other_sources(dataset_id, &dataset.source_path)
            .await
        {
            warn!(
                "Could not remove earlier sources of dataset {}: {}",
                dataset_id, e
            );
        }

        info!(
            "Dataset {} now has {} rows in table {}",
            dataset_id, dataset.row_count, dataset.table_name
        );
        Ok(dataset)
    }

    pub async fn delete_dataset(&self, dataset_id: &str) -> Result<(), AnalysisError> {
        let _lock = self.tables.lock_dataset(dataset_id).await;

        if !self.catalog.delete_dataset(dataset_id).await? {
            return Err(AnalysisError::not_found(dataset_id));
        }
        self.tables.drop_table(dataset_id);
        self.storage.delete_dataset(dataset_id).await?;

        info!("Deleted dataset {}", dataset_id);
        Ok(())
    }

    /// The dataset's live table, rebuilt from its stored source if this
    /// process has not loaded it yet.
    pub async fn snapshot(&self, dataset_id: &str) -> Result<Arc<TableSnapshot>, AnalysisError> {
        if let Some(snapshot) = self.tables.snapshot(dataset_id) {
            return Ok(snapshot);
        }

        let _lock = self.tables.lock_dataset(dataset_id).await;
        if let Some(snapshot) = self.tables.snapshot(dataset_id) {
            return Ok(snapshot);
        }
        let dataset = self.get_dataset(dataset_id).await?;

        warn!(
            "Dataset {} has no loaded table, rebuilding from {}",
            dataset_id, dataset.source_path
        );
        let bytes = self.storage.load_source(&dataset.source_path).await?;
        let outcome = self
            .pipeline
            .load(
                dataset_id,
                Arc::new(bytes.to_vec()),
                Some(dataset.format.as_str().to_string()),
                None,
            )
            .await?;

        let mut dataset = dataset.with_outcome(&outcome);
        dataset.updated_at = Utc::now();
        self.catalog.update_dataset(&dataset).await?;
        self.pipeline.publish(&outcome);

        Ok(outcome.snapshot)
    }

    pub async fn record_analysis(&self, record: &AnalysisRecord) -> Result<(), AnalysisError> {
        self.catalog.insert_analysis(record).await
    }

    pub async fn list_analyses(
        &self,
        dataset_id: &str,
    ) -> Result<Vec<AnalysisRecord>, AnalysisError> {
        self.get_dataset(dataset_id).await?;
        self.catalog.list_analyses(dataset_id).await
    }
}

impl Dataset {
    /// Copies the table facts of a completed load into the catalog record.
    fn with_outcome(mut self, outcome: &IngestOutcome) -> Self {
        self.table_name = outcome.table_name().to_string();
        self.row_count = outcome.row_count() as i64;
        self.column_count = outcome.columns().len() as i32;
        self.columns = outcome.columns().to_vec();
        self
    }
}
