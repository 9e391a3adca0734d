use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::{
    pooled_connection::{
        deadpool::{Object, Pool},
        AsyncDieselConnectionManager,
    },
    AsyncConnection, AsyncPgConnection, RunQueryDsl, SimpleAsyncConnection,
};
use std::collections::HashMap;
use tracing::info;

use crate::catalog::{AnalysisRecord, CatalogStore, Dataset};
use crate::error::AnalysisError;
use crate::models::*;
use crate::schema::*;

const CREATE_CATALOG: &str =
    include_str!("../migrations/2024-06-01-000000_create_catalog/up.sql");

/// PostgreSQL-backed catalog.
#[derive(Clone)]
pub struct DatabaseManager {
    pool: Pool<AsyncPgConnection>,
}

impl DatabaseManager {
    pub async fn new(database_url: &str) -> Result<Self, AnalysisError> {
        let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder(config)
            .build()
            .map_err(|e| AnalysisError::Config {
                message: format!("Failed to create database pool: {}", e),
            })?;

        let manager = Self { pool };
        manager.run_migrations().await?;

        Ok(manager)
    }

    /// Creates the catalog tables if they are missing.
    pub async fn run_migrations(&self) -> Result<(), AnalysisError> {
        let mut conn = self.connection().await?;
        conn.batch_execute(CREATE_CATALOG)
            .await
            .map_err(|e| AnalysisError::Storage {
                message: format!("Failed to create catalog tables: {}", e),
            })?;
        info!("Catalog tables are ready");
        Ok(())
    }

    async fn connection(&self) -> Result<Object<AsyncPgConnection>, AnalysisError> {
        self.pool.get().await.map_err(|e| AnalysisError::Storage {
            message: format!("Failed to get database connection: {}", e),
        })
    }

    async fn columns_for(
        conn: &mut AsyncPgConnection,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<ColumnRow>>, AnalysisError> {
        let rows = dataset_columns::table
            .filter(dataset_columns::dataset_id.eq_any(ids))
            .order((dataset_columns::dataset_id, dataset_columns::position))
            .select(ColumnRow::as_select())
            .load::<ColumnRow>(conn)
            .await
            .map_err(|e| AnalysisError::Storage {
                message: format!("Failed to load dataset columns: {}", e),
            })?;

        let mut grouped: HashMap<String, Vec<ColumnRow>> = HashMap::new();
        for row in rows {
            grouped.entry(row.dataset_id.clone()).or_default().push(row);
        }
        Ok(grouped)
    }
}

#[async_trait]
impl CatalogStore for DatabaseManager {
    async fn insert_dataset(&self, dataset: &Dataset) -> Result<(), AnalysisError> {
        info!("Adding dataset {} to catalog", dataset.id);
        let mut conn = self.connection().await?;

        conn.transaction::<_, AnalysisError, _>(|conn| {
            Box::pin(async move {
                diesel::insert_into(datasets::table)
                    .values(&NewDatasetRow::from_dataset(dataset))
                    .execute(conn)
                    .await
                    .map_err(|e| AnalysisError::Storage {
                        message: format!("Failed to insert dataset: {}", e),
                    })?;

                let columns = new_column_rows(dataset);
                if !columns.is_empty() {
                    diesel::insert_into(dataset_columns::table)
                        .values(&columns)
                        .execute(conn)
                        .await
                        .map_err(|e| AnalysisError::Storage {
                            message: format!("Failed to insert dataset columns: {}", e),
                        })?;
                }
                Ok(())
            })
        })
        .await
    }

    async fn get_dataset(&self, dataset_id: &str) -> Result<Option<Dataset>, AnalysisError> {
        let mut conn = self.connection().await?;

        let row = datasets::table
            .filter(datasets::id.eq(dataset_id))
            .select(DatasetRow::as_select())
            .get_result::<DatasetRow>(&mut conn)
            .await
            .optional()
            .map_err(|e| AnalysisError::Storage {
                message: format!("Failed to fetch dataset: {}", e),
            })?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut columns = Self::columns_for(&mut conn, &[row.id.clone()]).await?;
        let columns = columns.remove(&row.id).unwrap_or_default();
        row.into_dataset(columns).map(Some)
    }

    async fn list_datasets(&self) -> Result<Vec<Dataset>, AnalysisError> {
        let mut conn = self.connection().await?;

        let rows = datasets::table
            .order((datasets::created_at.desc(), datasets::id.asc()))
            .select(DatasetRow::as_select())
            .load::<DatasetRow>(&mut conn)
            .await
            .map_err(|e| AnalysisError::Storage {
                message: format!("Failed to fetch datasets: {}", e),
            })?;

        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let mut columns = Self::columns_for(&mut conn, &ids).await?;

        rows.into_iter()
            .map(|row| {
                let row_columns = columns.remove(&row.id).unwrap_or_default();
                row.into_dataset(row_columns)
            })
            .collect()
    }

    async fn update_dataset(&self, dataset: &Dataset) -> Result<(), AnalysisError> {
        let mut conn = self.connection().await?;

        conn.transaction::<_, AnalysisError, _>(|conn| {
            Box::pin(async move {
                let updated = diesel::update(datasets::table.find(&dataset.id))
                    .set(&DatasetChanges::from_dataset(dataset))
                    .execute(conn)
                    .await
                    .map_err(|e| AnalysisError::Storage {
                        message: format!("Failed to update dataset: {}", e),
                    })?;
                if updated == 0 {
                    return Err(AnalysisError::not_found(&dataset.id));
                }

                diesel::delete(
                    dataset_columns::table.filter(dataset_columns::dataset_id.eq(&dataset.id)),
                )
                .execute(conn)
                .await
                .map_err(|e| AnalysisError::Storage {
                    message: format!("Failed to clear dataset columns: {}", e),
                })?;

                let columns = new_column_rows(dataset);
                if !columns.is_empty() {
                    diesel::insert_into(dataset_columns::table)
                        .values(&columns)
                        .execute(conn)
                        .await
                        .map_err(|e| AnalysisError::Storage {
                            message: format!("Failed to insert dataset columns: {}", e),
                        })?;
                }
                Ok(())
            })
        })
        .await
    }

    async fn delete_dataset(&self, dataset_id: &str) -> Result<bool, AnalysisError> {
        let mut conn = self.connection().await?;

        conn.transaction::<_, AnalysisError, _>(|conn| {
            Box::pin(async move {
                diesel::delete(analyses::table.filter(analyses::dataset_id.eq(dataset_id)))
                    .execute(conn)
                    .await?;
                diesel::delete(
                    dataset_columns::table.filter(dataset_columns::dataset_id.eq(dataset_id)),
                )
                .execute(conn)
                .await?;
                let deleted = diesel::delete(datasets::table.find(dataset_id))
                    .execute(conn)
                    .await?;
                Ok(deleted > 0)
            })
        })
        .await
    }

    async fn insert_analysis(&self, record: &AnalysisRecord) -> Result<(), AnalysisError> {
        let mut conn = self.connection().await?;

        diesel::insert_into(analyses::table)
            .values(&NewAnalysisRow {
                id: record.id,
                dataset_id: &record.dataset_id,
                query: &record.query,
                result: &record.result,
                created_at: record.created_at,
            })
            .execute(&mut conn)
            .await
            .map_err(|e| AnalysisError::Storage {
                message: format!("Failed to insert analysis: {}", e),
            })?;
        Ok(())
    }

    async fn list_analyses(&self, dataset_id: &str) -> Result<Vec<AnalysisRecord>, AnalysisError> {
        let mut conn = self.connection().await?;

        let rows = analyses::table
            .filter(analyses::dataset_id.eq(dataset_id))
            .order(analyses::created_at.desc())
            .select(AnalysisRow::as_select())
            .load::<AnalysisRow>(&mut conn)
            .await
            .map_err(|e| AnalysisError::Storage {
                message: format!("Failed to fetch analyses: {}", e),
            })?;

        Ok(rows.into_iter().map(AnalysisRecord::from).collect())
    }
}
