use std::time::Instant;
use tracing::{info, warn};

use crate::datafusion_engine::{batches_to_rows, DataFusionEngine};
use crate::domain::{DataPage, QueryResult};
use crate::error::AnalysisError;
use crate::query_parser::{self, quote_identifier, QueryShape, SelectQuery};
use crate::table_manager::{TableSnapshot, ROW_ID_COLUMN};

/// Page window after defaults and the server cap are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub limit: u64,
    pub offset: u64,
}

/// Validates and runs caller-supplied queries against one dataset table.
pub struct QueryGateway {
    engine: DataFusionEngine,
    default_limit: u64,
    max_rows: u64,
}

impl QueryGateway {
    pub fn new(engine: DataFusionEngine, default_limit: u64, max_rows: u64) -> Self {
        Self {
            engine,
            default_limit,
            max_rows: max_rows.max(1),
        }
    }

    pub fn engine(&self) -> &DataFusionEngine {
        &self.engine
    }

    pub fn page_window(&self, limit: Option<u64>, offset: Option<u64>) -> PageWindow {
        PageWindow {
            limit: limit.unwrap_or(self.default_limit).min(self.max_rows),
            offset: offset.unwrap_or(0),
        }
    }

    pub async fn execute(
        &self,
        snapshot: &TableSnapshot,
        query_text: &str,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<QueryResult, AnalysisError> {
        let start_time = Instant::now();
        let QueryShape::Select(query) = query_parser::parse_query(query_text, &snapshot.table_name)
            .map_err(|e| {
                warn!("Rejected query on dataset {}: {:?}", snapshot.dataset_id, e);
                AnalysisError::from(e)
            })?;

        let window = self.page_window(limit, offset);
        let result = self.run_select(snapshot, &query, window).await?;

        info!(
            "Query on dataset {} returned {} of {} rows in {}ms",
            snapshot.dataset_id,
            result.rows.len(),
            result.total,
            start_time.elapsed().as_millis()
        );
        Ok(result)
    }

    async fn run_select(
        &self,
        snapshot: &TableSnapshot,
        query: &SelectQuery,
        window: PageWindow,
    ) -> Result<QueryResult, AnalysisError> {
        let core = query.render_core(&snapshot.table_name);

        let count_sql = format!(
            "SELECT COUNT(*) AS \"total\" FROM ({}) AS \"q\"",
            core
        );
        let available = self.engine.run_count(snapshot, &count_sql).await?;

        let user_offset = query.offset.unwrap_or(0);
        let mut total = available.saturating_sub(user_offset);
        if let Some(user_limit) = query.limit {
            total = total.min(user_limit);
        }

        let page_limit = window.limit.min(total.saturating_sub(window.offset));
        let page_sql = format!(
            "{}{} LIMIT {} OFFSET {}",
            core,
            query.render_order_by(Some(ROW_ID_COLUMN)),
            page_limit,
            user_offset.saturating_add(window.offset)
        );
        let output = self.engine.run(snapshot, &page_sql).await?;

        Ok(QueryResult {
            columns: output.column_names(),
            column_types: output.column_types(),
            rows: batches_to_rows(&output.batches)?,
            total,
            limit: window.limit,
            offset: window.offset,
        })
    }

    /// The stored table in row order, one page at a time.
    pub async fn data_page(
        &self,
        snapshot: &TableSnapshot,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<DataPage, AnalysisError> {
        let window = self.page_window(limit, offset);
        let sql = format!(
            "SELECT * FROM {} ORDER BY {} ASC LIMIT {} OFFSET {}",
            quote_identifier(&snapshot.table_name),
            quote_identifier(ROW_ID_COLUMN),
            window.limit,
            window.offset
        );
        let output = self.engine.run(snapshot, &sql).await?;

        Ok(DataPage {
            table_name: snapshot.table_name.clone(),
            columns: output.column_names(),
            rows: batches_to_rows(&output.batches)?,
            total: snapshot.row_count as u64,
            limit: window.limit,
            offset: window.offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDescriptor, ColumnType};
    use crate::inference::CellValue;
    use crate::table_manager::TableManager;
    use serde_json::Value;
    use std::sync::Arc;

    fn gateway(default_limit: u64, max_rows: u64) -> QueryGateway {
        let engine = DataFusionEngine::new(256 * 1024 * 1024).unwrap();
        QueryGateway::new(engine, default_limit, max_rows)
    }

    fn column(name: &str, data_type: ColumnType) -> ColumnDescriptor {
        ColumnDescriptor {
            name: name.to_string(),
            original_name: name.to_string(),
            data_type,
            nullable: true,
        }
    }

    fn products() -> Arc<TableSnapshot> {
        let manager = TableManager::new(2);
        manager
            .create_table(
                "products",
                vec![
                    column("category", ColumnType::Text),
                    column("price", ColumnType::Float),
                ],
            )
            .unwrap();
        let rows = [("A", Some(10.5)), ("B", None), ("A", Some(9.0))]
            .into_iter()
            .map(|(category, price)| {
                vec![
                    CellValue::Text(category.to_string()),
                    price.map(CellValue::Float).unwrap_or(CellValue::Null),
                ]
            })
            .collect();
        manager.bulk_load("products", rows).unwrap()
    }

    #[tokio::test]
    async fn filters_rows_with_total() {
        let snapshot = products();
        let query = format!(
            "SELECT _row_id, category, price FROM {} WHERE price > 9",
            snapshot.table_name
        );

        let result = gateway(100, 1000)
            .execute(&snapshot, &query, None, None)
            .await
            .unwrap();

        assert_eq!(result.total, 2);
        assert_eq!(result.columns, vec!["_row_id", "category", "price"]);
        assert_eq!(result.rows[0][0], Value::from(1));
        assert_eq!(result.rows[1][0], Value::from(3));
    }

    #[tokio::test]
    async fn total_ignores_page_but_respects_user_limit() {
        let snapshot = products();
        let gateway = gateway(100, 1000);

        let paged = gateway
            .execute(&snapshot, "SELECT * FROM dataset", Some(1), Some(1))
            .await
            .unwrap();
        assert_eq!(paged.total, 3);
        assert_eq!(paged.rows.len(), 1);
        assert_eq!(paged.rows[0][0], Value::from(2));

        let limited = gateway
            .execute(&snapshot, "SELECT * FROM dataset LIMIT 2", Some(10), Some(1))
            .await
            .unwrap();
        assert_eq!(limited.total, 2);
        assert_eq!(limited.rows.len(), 1);
        assert_eq!(limited.rows[0][0], Value::from(2));
    }

    #[tokio::test]
    async fn limit_is_clamped_to_server_cap() {
        let snapshot = products();
        let result = gateway(100, 2)
            .execute(&snapshot, "SELECT price FROM dataset", Some(50), None)
            .await
            .unwrap();
        assert_eq!(result.limit, 2);
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.total, 3);
    }

    #[tokio::test]
    async fn aggregates_and_grouping() {
        let snapshot = products();
        let result = gateway(100, 1000)
            .execute(
                &snapshot,
                "SELECT category, COUNT(*) AS n FROM dataset GROUP BY category ORDER BY category",
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(result.total, 2);
        assert_eq!(
            result.rows,
            vec![
                vec![Value::from("A"), Value::from(2)],
                vec![Value::from("B"), Value::from(1)],
            ]
        );
    }

    #[tokio::test]
    async fn unknown_column_is_a_query_error() {
        let snapshot = products();
        let err = gateway(100, 1000)
            .execute(&snapshot, "SELECT nope FROM dataset", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Query { .. }));
    }

    #[tokio::test]
    async fn unsafe_queries_never_execute() {
        let snapshot = products();
        let gateway = gateway(100, 1000);
        for query in [
            "DROP TABLE x",
            "SELECT * FROM other_dataset_table",
            "SELECT * FROM t; DELETE FROM t",
        ] {
            let err = gateway
                .execute(&snapshot, query, None, None)
                .await
                .unwrap_err();
            assert!(matches!(err, AnalysisError::UnsafeQuery { .. }), "{query}");
        }
    }

    #[tokio::test]
    async fn data_page_returns_rows_in_order() {
        let snapshot = products();
        let page = gateway(2, 1000)
            .data_page(&snapshot, None, Some(1))
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.columns, vec!["_row_id", "category", "price"]);
        assert_eq!(page.rows.len(), 2);
        assert_eq!(page.rows[0][0], Value::from(2));
        assert_eq!(page.rows[1][2], Value::from(9.0));
    }
}
