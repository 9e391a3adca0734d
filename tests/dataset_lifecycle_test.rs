use dataset_analysis_service::catalog::{ColumnType, DataFormat, DatasetUpdate};
use dataset_analysis_service::domain::{FileUpload, NewDataset};
use dataset_analysis_service::engine::AnalysisEngine;
use dataset_analysis_service::error::{AnalysisError, ErrorKind};
use serde_json::{json, Value};
use std::sync::{Arc, Once};

static INIT: Once = Once::new();

fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

const PRODUCTS_CSV: &str = "id,price,category\n1,10.5,A\n2,,B\n3,9.0,A\n";

async fn products(engine: &AnalysisEngine) -> String {
    engine
        .create_dataset(NewDataset::new(
            "Products",
            FileUpload::new("products.csv", PRODUCTS_CSV.as_bytes().to_vec()),
        ))
        .await
        .expect("Failed to create products dataset")
        .id
}

#[tokio::test]
async fn test_csv_upload_is_typed_profiled_and_queryable() {
    init_test_logging();

    // Given: An in-memory engine
    let engine = AnalysisEngine::in_memory().unwrap();

    // When: Uploading a small CSV with one missing price
    let dataset = engine
        .create_dataset(
            NewDataset::new(
                "Products",
                FileUpload::new("products.csv", PRODUCTS_CSV.as_bytes().to_vec()),
            )
            .with_description("three products"),
        )
        .await
        .unwrap();

    // Then: The catalog entry describes the inferred table
    assert!(dataset.id.starts_with("ds_"));
    assert!(dataset.table_name.starts_with("tbl_"));
    assert_eq!(dataset.format, DataFormat::Csv);
    assert_eq!(dataset.row_count, 3);
    assert_eq!(dataset.column_count, 3);
    let types: Vec<ColumnType> = dataset.columns.iter().map(|c| c.data_type).collect();
    assert_eq!(
        types,
        vec![ColumnType::Integer, ColumnType::Float, ColumnType::Text]
    );
    assert!(dataset.columns[1].nullable);

    // And: The profile reports the missing price, its mean and the category counts
    let report = engine.analysis_report(&dataset.id).await.unwrap();
    assert_eq!(report.row_count, 3);
    assert_eq!(report.missing_values["price"], 1);
    assert!((report.numeric["price"].mean - 9.75).abs() < 1e-9);
    assert_eq!(report.categorical["category"]["A"], 2);
    assert_eq!(report.categorical["category"]["B"], 1);
    for column in &dataset.columns {
        let present = match report.numeric.get(&column.name) {
            Some(summary) => summary.count,
            None => report.categorical[&column.name].values().sum(),
        };
        assert_eq!(report.missing_values[&column.name] + present, report.row_count);
    }

    // When: Filtering by price through the physical table name
    let query = format!(
        "SELECT category, price, id FROM {} WHERE price > 9",
        dataset.table_name
    );
    let result = engine
        .query_dataset(&dataset.id, &query, None, None)
        .await
        .unwrap();

    // Then: Rows 1 and 3 match
    assert_eq!(result.total, 2);
    assert_eq!(result.columns, vec!["category", "price", "id"]);
    let ids: Vec<Value> = result.rows.iter().map(|r| r[2].clone()).collect();
    assert_eq!(ids, vec![json!(1), json!(3)]);
}

#[tokio::test]
async fn test_single_row_profile_collapses_to_the_value() {
    init_test_logging();

    // Given: A one-row, one-column dataset
    let engine = AnalysisEngine::in_memory().unwrap();
    let dataset = engine
        .create_dataset(NewDataset::new(
            "single",
            FileUpload::new("single.csv", b"x\n5\n".to_vec()),
        ))
        .await
        .unwrap();

    // When: Profiling it
    let report = engine.analysis_report(&dataset.id).await.unwrap();

    // Then: Every statistic equals the single value
    let x = &report.numeric["x"];
    assert_eq!((x.min, x.max, x.mean, x.std), (5.0, 5.0, 5.0, 0.0));
    assert_eq!(
        (x.boxplot.q1, x.boxplot.median, x.boxplot.q3),
        (5.0, 5.0, 5.0)
    );
    assert_eq!(x.histogram.counts, vec![1]);
    assert_eq!(x.outlier_count, 0);
}

#[tokio::test]
async fn test_unsafe_queries_are_rejected() {
    init_test_logging();

    // Given: A loaded dataset
    let engine = AnalysisEngine::in_memory().unwrap();
    let dataset_id = products(&engine).await;

    // When / Then: Each modifying, foreign or multi-statement query is refused
    for query in [
        "DROP TABLE x",
        "SELECT * FROM other_dataset_table",
        "SELECT * FROM t; DELETE FROM t",
        "UPDATE dataset SET price = 0",
    ] {
        let err = engine
            .query_dataset(&dataset_id, query, None, None)
            .await
            .unwrap_err();
        assert!(
            matches!(err, AnalysisError::UnsafeQuery { .. }),
            "{} gave {:?}",
            query,
            err
        );
        assert_eq!(err.kind(), ErrorKind::Rejected);
    }

    // And: The table is untouched
    let page = engine.dataset_data(&dataset_id, None, None).await.unwrap();
    assert_eq!(page.total, 3);
}

#[tokio::test]
async fn test_unknown_column_surfaces_engine_message() {
    init_test_logging();

    // Given: A loaded dataset
    let engine = AnalysisEngine::in_memory().unwrap();
    let dataset_id = products(&engine).await;

    // When: Selecting a column that does not exist
    let err = engine
        .query_dataset(&dataset_id, "SELECT weight FROM dataset", None, None)
        .await
        .unwrap_err();

    // Then: It is a query error that names the column
    match err {
        AnalysisError::Query { message } => assert!(message.contains("weight"), "{}", message),
        other => panic!("expected query error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_paging_and_totals() {
    init_test_logging();

    // Given: A dataset of 25 rows
    let engine = AnalysisEngine::in_memory().unwrap();
    let mut csv = String::from("n\n");
    for n in 1..=25 {
        csv.push_str(&format!("{}\n", n));
    }
    let dataset = engine
        .create_dataset(NewDataset::new(
            "numbers",
            FileUpload::new("numbers.csv", csv.into_bytes()),
        ))
        .await
        .unwrap();

    // When: Reading the second page of ten
    let page = engine
        .dataset_data(&dataset.id, Some(10), Some(10))
        .await
        .unwrap();

    // Then: Rows 11..=20 come back in row order and total counts all rows
    assert_eq!(page.total, 25);
    assert_eq!(page.table_name, dataset.table_name);
    assert_eq!(page.rows.first().unwrap()[1], json!(11));
    assert_eq!(page.rows.last().unwrap()[1], json!(20));

    // When: Paging a query that carries its own LIMIT
    let result = engine
        .query_dataset(
            &dataset.id,
            "SELECT n FROM dataset WHERE n > 5 LIMIT 12",
            Some(5),
            Some(10),
        )
        .await
        .unwrap();

    // Then: The total honors the query LIMIT and the page is its tail
    assert_eq!(result.total, 12);
    assert_eq!(
        result.rows,
        vec![vec![json!(16)], vec![json!(17)]]
    );
}

#[tokio::test]
async fn test_replace_is_atomic_and_failed_replace_keeps_old_table() {
    init_test_logging();

    // Given: A loaded dataset
    let engine = AnalysisEngine::in_memory().unwrap();
    let dataset_id = products(&engine).await;
    let before = engine.get_dataset(&dataset_id).await.unwrap();

    // When: Replacing it with a file of a different shape
    let replaced = engine
        .replace_dataset_file(
            &dataset_id,
            FileUpload::new("more.json", br#"[{"a": 1, "b": "x"}, {"a": 2}]"#.to_vec()),
        )
        .await
        .unwrap();

    // Then: Counts, format and physical table all change together
    assert_eq!(replaced.row_count, 2);
    assert_eq!(replaced.column_count, 2);
    assert_eq!(replaced.format, DataFormat::Json);
    assert_ne!(replaced.table_name, before.table_name);
    let report = engine.analysis_report(&dataset_id).await.unwrap();
    assert_eq!(report.row_count, 2);
    assert_eq!(report.missing_values["b"], 1);

    // When: Replacing it with a malformed file
    let err = engine
        .replace_dataset_file(
            &dataset_id,
            FileUpload::new("broken.csv", b"a,b\n1,2,3\n".to_vec()),
        )
        .await
        .unwrap_err();

    // Then: The error is a format error and nothing changed
    assert!(matches!(err, AnalysisError::Format { .. }));
    let after = engine.get_dataset(&dataset_id).await.unwrap();
    assert_eq!(after.row_count, 2);
    assert_eq!(after.table_name, replaced.table_name);
    let page = engine.dataset_data(&dataset_id, None, None).await.unwrap();
    assert_eq!(page.total, 2);
}

#[tokio::test]
async fn test_reads_during_replace_see_one_complete_table() {
    init_test_logging();

    // Given: A dataset of 3 rows that will be replaced by one of 500 rows
    let engine = Arc::new(AnalysisEngine::in_memory().unwrap());
    let dataset_id = products(&engine).await;
    let mut csv = String::from("v\n");
    for v in 0..500 {
        csv.push_str(&format!("{}\n", v));
    }

    // When: Reading counts while the replace runs
    let writer = {
        let engine = engine.clone();
        let dataset_id = dataset_id.clone();
        tokio::spawn(async move {
            engine
                .replace_dataset_file(&dataset_id, FileUpload::new("big.csv", csv.into_bytes()))
                .await
        })
    };
    let mut seen = Vec::new();
    for _ in 0..20 {
        let result = engine
            .query_dataset(&dataset_id, "SELECT COUNT(*) AS n FROM dataset", None, None)
            .await
            .unwrap();
        seen.push(result.rows[0][0].clone());
        tokio::task::yield_now().await;
    }
    writer.await.unwrap().unwrap();

    // Then: Every read saw either the old or the new table in full
    for count in seen {
        assert!(count == json!(3) || count == json!(500), "saw {}", count);
    }
}

#[tokio::test]
async fn test_metadata_update_delete_and_not_found() {
    init_test_logging();

    // Given: Two datasets
    let engine = AnalysisEngine::in_memory().unwrap();
    let first = products(&engine).await;
    let second = products(&engine).await;

    // When: Editing the title of one
    let updated = engine
        .update_dataset(
            &first,
            DatasetUpdate {
                title: Some("Renamed".to_string()),
                description: Some(Some("edited".to_string())),
            },
        )
        .await
        .unwrap();

    // Then: Only metadata changes
    assert_eq!(updated.title, "Renamed");
    assert_eq!(updated.description.as_deref(), Some("edited"));
    assert_eq!(updated.row_count, 3);

    // When: Deleting it
    engine.delete_dataset(&first).await.unwrap();

    // Then: It is gone everywhere and the other dataset is still listed
    let ids: Vec<String> = engine
        .list_datasets()
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.id)
        .collect();
    assert_eq!(ids, vec![second]);
    for err in [
        engine.get_dataset(&first).await.unwrap_err(),
        engine.dataset_data(&first, None, None).await.unwrap_err(),
        engine
            .query_dataset(&first, "SELECT * FROM dataset", None, None)
            .await
            .unwrap_err(),
        engine.analysis_report(&first).await.unwrap_err(),
        engine.delete_dataset(&first).await.unwrap_err(),
    ] {
        assert_eq!(err.kind(), ErrorKind::NotFound, "{:?}", err);
    }
}

#[tokio::test]
async fn test_invalid_uploads_are_typed_errors() {
    init_test_logging();

    // Given: An in-memory engine
    let engine = AnalysisEngine::in_memory().unwrap();

    // When / Then: A header-only CSV has no rows
    let err = engine
        .create_dataset(NewDataset::new(
            "empty",
            FileUpload::new("empty.csv", b"a,b\n".to_vec()),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, AnalysisError::EmptyDataset { .. }));

    // And: A header of blank names has no usable columns
    let err = engine
        .create_dataset(NewDataset::new(
            "blank",
            FileUpload::new("blank.csv", b" , \n1,2\n".to_vec()),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, AnalysisError::Schema { .. }));

    // And: An unknown declared format is a format error
    let err = engine
        .create_dataset(NewDataset::new(
            "parquet",
            FileUpload {
                file_name: None,
                format: Some("parquet".to_string()),
                bytes: b"PAR1".to_vec(),
            },
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, AnalysisError::Format { .. }));

    // And: Failed uploads never reach the catalog
    assert!(engine.list_datasets().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_saved_analyses_follow_their_dataset() {
    init_test_logging();

    // Given: A loaded dataset
    let engine = AnalysisEngine::in_memory().unwrap();
    let dataset_id = products(&engine).await;

    // When: Saving two query runs
    let first = engine
        .save_analysis(&dataset_id, "SELECT * FROM dataset", Some(2))
        .await
        .unwrap();
    let second = engine
        .save_analysis(
            &dataset_id,
            "SELECT category, COUNT(*) AS n FROM dataset GROUP BY category",
            None,
        )
        .await
        .unwrap();

    // Then: They are listed newest first with their stored results
    let analyses = engine.list_analyses(&dataset_id).await.unwrap();
    let ids: Vec<_> = analyses.iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![second.id, first.id]);
    assert_eq!(first.result["total"], json!(3));
    assert_eq!(first.result["rows"].as_array().unwrap().len(), 2);

    // And: Unsafe queries are not saved
    assert!(engine
        .save_analysis(&dataset_id, "DROP TABLE dataset", None)
        .await
        .is_err());
    assert_eq!(engine.list_analyses(&dataset_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_health_check() {
    let engine = AnalysisEngine::in_memory().unwrap();
    assert!(engine.health_check().await.is_ok());
}

#[tokio::test]
async fn test_excel_upload_uses_first_sheet_and_typed_cells() {
    init_test_logging();

    // Given: A workbook whose first sheet holds dates, an error cell and gaps
    let engine = AnalysisEngine::in_memory().unwrap();
    let bytes = include_bytes!("fixtures/sales.xlsx");

    // When: Uploading it without a declared format
    let dataset = engine
        .create_dataset(NewDataset::new(
            "Sales",
            FileUpload::new("sales.xlsx", bytes.to_vec()),
        ))
        .await
        .unwrap();

    // Then: Only the first sheet is loaded, with typed columns
    assert_eq!(dataset.format, DataFormat::Excel);
    assert_eq!(dataset.row_count, 3);
    let names: Vec<&str> = dataset.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["region", "units", "price", "sold_on", "ratio"]);
    assert_eq!(dataset.columns[3].original_name, "Sold On");
    let types: Vec<ColumnType> = dataset.columns.iter().map(|c| c.data_type).collect();
    assert_eq!(
        types,
        vec![
            ColumnType::Text,
            ColumnType::Integer,
            ColumnType::Float,
            ColumnType::Timestamp,
            ColumnType::Float
        ]
    );
    assert!(dataset.columns[2].nullable);
    assert!(dataset.columns[4].nullable);

    // And: Error cells are missing values
    let result = engine
        .query_dataset(
            &dataset.id,
            "SELECT region, units FROM dataset WHERE ratio IS NULL ORDER BY units",
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(
        result.rows,
        vec![
            vec![json!("North"), json!(3)],
            vec![json!("East"), json!(5)]
        ]
    );
}

#[tokio::test]
async fn test_keyword_headers_are_queryable_unquoted() {
    init_test_logging();

    // Given: A CSV whose headers are SQL words
    let engine = AnalysisEngine::in_memory().unwrap();
    let dataset = engine
        .create_dataset(NewDataset::new(
            "Keywords",
            FileUpload::new("keywords.csv", b"first,Order,date\n1,2,x\n3,4,y\n".to_vec()),
        ))
        .await
        .unwrap();
    let names: Vec<&str> = dataset.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["first", "order_col", "date"]);

    // When: Querying every column by its stored name
    let result = engine
        .query_dataset(
            &dataset.id,
            "SELECT first, order_col, date FROM dataset WHERE first > 1",
            None,
            None,
        )
        .await
        .unwrap();

    // Then: The matching row comes back
    assert_eq!(result.rows, vec![vec![json!(3), json!(4), json!("y")]]);
}
