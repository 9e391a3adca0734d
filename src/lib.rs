pub mod catalog;
pub mod config;
pub mod database;
pub mod datafusion_engine;
pub mod dataset_manager;
pub mod domain;
pub mod engine;
pub mod error;
pub mod inference;
pub mod ingest;
pub mod models;
pub mod profiler;
pub mod query_gateway;
pub mod query_parser;
pub mod readers;
pub mod schema;
pub mod stats;
pub mod storage;
pub mod table_manager;

pub use catalog::{ColumnDescriptor, ColumnType, DataFormat, Dataset, DatasetUpdate};
pub use config::EngineConfig;
pub use domain::{DataPage, FileUpload, NewDataset, QueryResult};
pub use engine::AnalysisEngine;
pub use error::{AnalysisError, ErrorKind};
pub use profiler::AnalysisReport;
