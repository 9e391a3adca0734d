use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::catalog::{AnalysisRecord, CatalogStore, Dataset, DatasetUpdate, MemoryCatalog};
use crate::config::EngineConfig;
use crate::database::DatabaseManager;
use crate::datafusion_engine::DataFusionEngine;
use crate::dataset_manager::DatasetManager;
use crate::domain::{DataPage, FileUpload, NewDataset, QueryResult};
use crate::error::AnalysisError;
use crate::profiler::{AnalysisReport, Profiler};
use crate::query_gateway::QueryGateway;
use crate::storage::DatasetStorage;
use crate::table_manager::TableManager;

/// Entry point for the presentation layer. Share it as an `Arc`.
pub struct AnalysisEngine {
    datasets: DatasetManager,
    gateway: QueryGateway,
}

impl AnalysisEngine {
    pub async fn new(config: EngineConfig) -> Result<Self, AnalysisError> {
        info!("Initializing Analysis Engine");
        config.validate()?;

        let catalog: Arc<dyn CatalogStore> = match &config.database_url {
            Some(database_url) => {
                info!("Using PostgreSQL catalog");
                Arc::new(DatabaseManager::new(database_url).await?)
            }
            None => {
                info!("Using in-memory catalog");
                Arc::new(MemoryCatalog::new())
            }
        };
        let storage = DatasetStorage::new(&config.storage_url)?;

        let engine = Self::with_parts(config, catalog, storage)?;
        info!("Analysis Engine initialized successfully");
        Ok(engine)
    }

    pub async fn from_env() -> Result<Self, AnalysisError> {
        Self::new(EngineConfig::from_env()?).await
    }

    /// Builds an engine over an already constructed catalog and storage.
    pub fn with_parts(
        config: EngineConfig,
        catalog: Arc<dyn CatalogStore>,
        storage: DatasetStorage,
    ) -> Result<Self, AnalysisError> {
        let tables = Arc::new(TableManager::new(config.ingest_batch_size));
        let datafusion = DataFusionEngine::new(config.query_memory_limit)?;

        Ok(Self {
            datasets: DatasetManager::new(catalog, storage, tables),
            gateway: QueryGateway::new(
                datafusion,
                config.default_page_size,
                config.max_query_rows,
            ),
        })
    }

    /// In-memory catalog and storage with default limits.
    pub fn in_memory() -> Result<Self, AnalysisError> {
        Self::with_parts(
            EngineConfig::default(),
            Arc::new(MemoryCatalog::new()),
            DatasetStorage::in_memory(),
        )
    }

    pub async fn create_dataset(&self, new_dataset: NewDataset) -> Result<Dataset, AnalysisError> {
        self.datasets.create_dataset(new_dataset).await
    }

    pub async fn list_datasets(&self) -> Result<Vec<Dataset>, AnalysisError> {
        self.datasets.list_datasets().await
    }

    pub async fn get_dataset(&self, dataset_id: &str) -> Result<Dataset, AnalysisError> {
        self.datasets.get_dataset(dataset_id).await
    }

    pub async fn update_dataset(
        &self,
        dataset_id: &str,
        update: DatasetUpdate,
    ) -> Result<Dataset, AnalysisError> {
        self.datasets.update_dataset(dataset_id, update).await
    }

    pub async fn replace_dataset_file(
        &self,
        dataset_id: &str,
        file: FileUpload,
    ) -> Result<Dataset, AnalysisError> {
        self.datasets.replace_dataset_file(dataset_id, file).await
    }

    pub async fn delete_dataset(&self, dataset_id: &str) -> Result<(), AnalysisError> {
        self.datasets.delete_dataset(dataset_id).await
    }

    pub async fn dataset_data(
        &self,
        dataset_id: &str,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<DataPage, AnalysisError> {
        let snapshot = self.datasets.snapshot(dataset_id).await?;
        self.gateway.data_page(&snapshot, limit, offset).await
    }

    pub async fn query_dataset(
        &self,
        dataset_id: &str,
        query: &str,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<QueryResult, AnalysisError> {
        let snapshot = self.datasets.snapshot(dataset_id).await?;
        self.gateway.execute(&snapshot, query, limit, offset).await
    }

    pub async fn analysis_report(&self, dataset_id: &str) -> Result<AnalysisReport, AnalysisError> {
        let snapshot = self.datasets.snapshot(dataset_id).await?;
        tokio::task::spawn_blocking(move || Profiler::profile(&snapshot)).await?
    }

    /// Runs a query and keeps its first page alongside the dataset.
    pub async fn save_analysis(
        &self,
        dataset_id: &str,
        query: &str,
        limit: Option<u64>,
    ) -> Result<AnalysisRecord, AnalysisError> {
        let result = self.query_dataset(dataset_id, query, limit, None).await?;
        let record = AnalysisRecord {
            id: Uuid::new_v4(),
            dataset_id: dataset_id.to_string(),
            query: query.to_string(),
            result: serde_json::to_value(&result)?,
            created_at: Utc::now(),
        };
        self.datasets.record_analysis(&record).await?;

        info!("Saved analysis {} for dataset {}", record.id, dataset_id);
        Ok(record)
    }

    pub async fn list_analyses(&self, dataset_id: &str) -> Result<Vec<AnalysisRecord>, AnalysisError> {
        self.datasets.list_analyses(dataset_id).await
    }

    pub async fn health_check(&self) -> Result<(), AnalysisError> {
        self.gateway.engine().health_check().await?;
        self.datasets.storage().health_check().await
    }
}
