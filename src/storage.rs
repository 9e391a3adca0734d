use bytes::Bytes;
use futures::StreamExt;
use object_store::{
    aws::AmazonS3Builder, gcp::GoogleCloudStorageBuilder, local::LocalFileSystem,
    memory::InMemory, path::Path as ObjectPath, ObjectStore, PutPayload,
};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::catalog::DataFormat;
use crate::error::AnalysisError;

/// Keeps each dataset's uploaded source file so tables can be rebuilt.
#[derive(Debug)]
pub struct DatasetStorage {
    store: Arc<dyn ObjectStore>,
    base_url: String,
}

fn create_gcs_client(bucket_name: &str) -> Result<Arc<dyn ObjectStore>, AnalysisError> {
    let mut builder = GoogleCloudStorageBuilder::new().with_bucket_name(bucket_name);

    if let Ok(service_account_path) = std::env::var("GOOGLE_APPLICATION_CREDENTIALS") {
        builder = builder.with_service_account_path(service_account_path);
    }

    let store = builder.build().map_err(|e| AnalysisError::Config {
        message: format!(
            "Failed to create GCS client for bucket '{}': {}",
            bucket_name, e
        ),
    })?;

    Ok(Arc::new(store))
}

impl DatasetStorage {
    pub fn new(storage_url: &str) -> Result<Self, AnalysisError> {
        let url = Url::parse(storage_url).map_err(|e| AnalysisError::Config {
            message: format!("Invalid storage URL {}: {}", storage_url, e),
        })?;

        let store: Arc<dyn ObjectStore> = match url.scheme() {
            "memory" => Arc::new(InMemory::new()),
            "file" => {
                let root = url.to_file_path().map_err(|_| AnalysisError::Config {
                    message: format!("Invalid file storage URL: {}", storage_url),
                })?;
                std::fs::create_dir_all(&root)?;
                let local = LocalFileSystem::new_with_prefix(&root).map_err(|e| {
                    AnalysisError::Config {
                        message: format!("Failed to open {}: {}", root.display(), e),
                    }
                })?;
                Arc::new(local)
            }
            "gs" => {
                let bucket = url.host_str().ok_or_else(|| AnalysisError::Config {
                    message: "Invalid GCS URL: missing bucket".to_string(),
                })?;
                info!("Creating GCS client for bucket: {}", bucket);
                create_gcs_client(bucket)?
            }
            "s3" => {
                let bucket = url.host_str().ok_or_else(|| AnalysisError::Config {
                    message: "Invalid S3 URL: missing bucket".to_string(),
                })?;
                info!("Creating S3 client for bucket: {}", bucket);
                let s3_store = AmazonS3Builder::from_env()
                    .with_bucket_name(bucket)
                    .build()
                    .map_err(|e| AnalysisError::Config {
                        message: format!("Failed to create S3 client: {}", e),
                    })?;
                Arc::new(s3_store)
            }
            scheme => {
                return Err(AnalysisError::Config {
                    message: format!("Unsupported storage scheme: {}", scheme),
                });
            }
        };

        info!("Dataset storage initialized at {}", storage_url);
        Ok(Self {
            store,
            base_url: Self::normalize_base(storage_url),
        })
    }

    /// Base URL ending in exactly one separator, e.g. `gs://bucket/` or `memory://`.
    fn normalize_base(storage_url: &str) -> String {
        if storage_url.ends_with("://") {
            return storage_url.to_string();
        }
        format!("{}/", storage_url.trim_end_matches('/'))
    }

    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            base_url: "memory://".to_string(),
        }
    }

    fn dataset_prefix(dataset_id: &str) -> ObjectPath {
        ObjectPath::from(format!("datasets/{}", dataset_id))
    }

    /// Each upload gets its own object, named after the table built from it,
    /// so a replacement never overwrites the source the catalog still points at.
    pub fn source_path(dataset_id: &str, version: &str, format: DataFormat) -> ObjectPath {
        ObjectPath::from(format!(
            "datasets/{}/{}.{}",
            dataset_id,
            version,
            format.extension()
        ))
    }

    /// Full location of a stored object, as recorded in the catalog.
    pub fn location(&self, path: &ObjectPath) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Object path back from a catalog location.
    pub fn path_from_location(&self, location: &str) -> ObjectPath {
        let relative = location
            .strip_prefix(&self.base_url)
            .unwrap_or(location)
            .trim_start_matches('/');
        ObjectPath::from(relative)
    }

    pub async fn save_source(
        &self,
        dataset_id: &str,
        version: &str,
        format: DataFormat,
        bytes: Bytes,
    ) -> Result<String, AnalysisError> {
        let path = Self::source_path(dataset_id, version, format);
        let size = bytes.len();
        self.store.put(&path, PutPayload::from(bytes)).await?;

        let location = self.location(&path);
        info!("Stored {} byte source file at {}", size, location);
        Ok(location)
    }

    pub async fn load_source(&self, location: &str) -> Result<Bytes, AnalysisError> {
        let path = self.path_from_location(location);
        let result = self.store.get(&path).await?;
        Ok(result.bytes().await?)
    }

    pub async fn delete_source(&self, location: &str) -> Result<(), AnalysisError> {
        let path = self.path_from_location(location);
        match self.store.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes every stored object of a dataset.
    pub async fn delete_dataset(&self, dataset_id: &str) -> Result<usize, AnalysisError> {
        let prefix = Self::dataset_prefix(dataset_id);
        let mut listing = self.store.list(Some(&prefix));
        let mut paths = Vec::new();
        while let Some(meta) = listing.next().await {
            paths.push(meta?.location);
        }

        for path in &paths {
            match self.store.delete(path).await {
                Ok(()) => {}
                Err(object_store::Error::NotFound { .. }) => {
                    warn!("Object {} already removed", path);
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(
            "Deleted {} stored objects for dataset {}",
            paths.len(),
            dataset_id
        );
        Ok(paths.len())
    }

    /// Removes stored sources other than `keep`, i.e. those of earlier uploads.
    pub async fn delete_other_sources(
        &self,
        dataset_id: &str,
        keep: &str,
    ) -> Result<(), AnalysisError> {
        let keep = self.path_from_location(keep);
        let prefix = Self::dataset_prefix(dataset_id);
        let mut listing = self.store.list(Some(&prefix));
        let mut stale = Vec::new();
        while let Some(meta) = listing.next().await {
            let location = meta?.location;
            if location != keep {
                stale.push(location);
            }
        }
        for path in stale {
            self.store.delete(&path).await?;
        }
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), AnalysisError> {
        let mut listing = self.store.list(Some(&ObjectPath::from("datasets")));
        if let Some(Err(e)) = listing.next().await {
            return Err(e.into());
        }
        Ok(())
    }
}
