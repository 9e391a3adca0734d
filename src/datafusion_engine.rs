use datafusion::arrow::array::{Array, ArrayRef, AsArray};
use datafusion::arrow::compute::cast;
use datafusion::arrow::datatypes::{DataType, Float64Type, Int64Type, SchemaRef, UInt64Type};
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::arrow::util::display::{ArrayFormatter, FormatOptions};
use datafusion::execution::config::SessionConfig;
use datafusion::execution::context::SessionContext;
use datafusion::execution::runtime_env::{RuntimeEnv, RuntimeEnvBuilder};
use serde_json::{Number, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::AnalysisError;
use crate::table_manager::TableSnapshot;

/// Result of one SQL statement: its output schema and materialized batches.
#[derive(Debug)]
pub struct QueryOutput {
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
}

impl QueryOutput {
    pub fn column_names(&self) -> Vec<String> {
        self.schema
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    pub fn column_types(&self) -> Vec<String> {
        self.schema
            .fields()
            .iter()
            .map(|f| datafusion_type_to_string(f.data_type()))
            .collect()
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }
}

/// Executes SQL against a single dataset snapshot.
///
/// Every call builds a fresh session whose catalog holds nothing but the one
/// snapshot, so a statement has no other table to reach.
pub struct DataFusionEngine {
    runtime: Arc<RuntimeEnv>,
}

impl DataFusionEngine {
    pub fn new(max_memory: usize) -> Result<Self, AnalysisError> {
        let memory_fraction = 0.8;

        let runtime = RuntimeEnvBuilder::new()
            .with_memory_limit(max_memory, memory_fraction)
            .build_arc()
            .map_err(|e| AnalysisError::Config {
                message: format!("Failed to build DataFusion runtime environment: {}", e),
            })?;

        info!(
            "DataFusion engine initialized with a {} byte memory limit",
            max_memory
        );
        Ok(Self { runtime })
    }

    fn session(&self) -> SessionContext {
        let session_config = SessionConfig::new()
            .with_target_partitions(1)
            .with_information_schema(false);
        SessionContext::new_with_config_rt(session_config, self.runtime.clone())
    }

    fn session_for(&self, snapshot: &TableSnapshot) -> Result<SessionContext, AnalysisError> {
        let ctx = self.session();
        ctx.register_table(snapshot.table_name.as_str(), snapshot.table_provider()?)?;
        Ok(ctx)
    }

    pub async fn run(
        &self,
        snapshot: &TableSnapshot,
        sql: &str,
    ) -> Result<QueryOutput, AnalysisError> {
        let start_time = std::time::Instant::now();
        debug!("Executing on {}: {}", snapshot.table_name, sql);

        let ctx = self.session_for(snapshot)?;
        let df = ctx.sql(sql).await?;
        let schema: SchemaRef = Arc::new(df.schema().as_arrow().clone());
        let batches = df.collect().await?;

        let output = QueryOutput { schema, batches };
        debug!(
            "Query returned {} rows in {}ms",
            output.num_rows(),
            start_time.elapsed().as_millis()
        );
        Ok(output)
    }

    /// Runs a statement producing a single integer cell.
    pub async fn run_count(
        &self,
        snapshot: &TableSnapshot,
        sql: &str,
    ) -> Result<u64, AnalysisError> {
        let output = self.run(snapshot, sql).await?;
        let batch = output
            .batches
            .iter()
            .find(|b| b.num_rows() > 0)
            .ok_or_else(|| AnalysisError::Internal {
                message: "Count query returned no rows".to_string(),
            })?;
        let counts = cast(batch.column(0), &DataType::Int64)?;
        let counts = counts.as_primitive::<Int64Type>();
        if counts.is_null(0) {
            return Ok(0);
        }
        Ok(counts.value(0).max(0) as u64)
    }

    pub async fn health_check(&self) -> Result<(), AnalysisError> {
        let _ = self.session().sql("SELECT 1 as health_check").await?;
        Ok(())
    }
}

/// Converts result batches into JSON rows.
///
/// Integers stay integers, floats become numbers (NaN and infinities as
/// `null`), text stays text and everything else uses Arrow's display form.
pub fn batches_to_rows(batches: &[RecordBatch]) -> Result<Vec<Vec<Value>>, AnalysisError> {
    let mut rows = Vec::with_capacity(batches.iter().map(|b| b.num_rows()).sum());
    for batch in batches {
        let columns = batch
            .columns()
            .iter()
            .map(column_values)
            .collect::<Result<Vec<_>, _>>()?;
        for row_index in 0..batch.num_rows() {
            rows.push(
                columns
                    .iter()
                    .map(|values| values[row_index].clone())
                    .collect(),
            );
        }
    }
    Ok(rows)
}

fn column_values(array: &ArrayRef) -> Result<Vec<Value>, AnalysisError> {
    let values = match array.data_type() {
        DataType::Null => vec![Value::Null; array.len()],
        DataType::Boolean => array
            .as_boolean()
            .iter()
            .map(|v| v.map(Value::Bool).unwrap_or(Value::Null))
            .collect(),
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32 => {
            let ints = cast(array, &DataType::Int64)?;
            ints.as_primitive::<Int64Type>()
                .iter()
                .map(|v| v.map(Value::from).unwrap_or(Value::Null))
                .collect()
        }
        DataType::UInt64 => array
            .as_primitive::<UInt64Type>()
            .iter()
            .map(|v| v.map(Value::from).unwrap_or(Value::Null))
            .collect(),
        DataType::Float16
        | DataType::Float32
        | DataType::Float64
        | DataType::Decimal128(_, _)
        | DataType::Decimal256(_, _) => {
            let floats = cast(array, &DataType::Float64)?;
            floats
                .as_primitive::<Float64Type>()
                .iter()
                .map(|v| {
                    v.and_then(Number::from_f64)
                        .map(Value::Number)
                        .unwrap_or(Value::Null)
                })
                .collect()
        }
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => {
            let strings = cast(array, &DataType::Utf8)?;
            strings
                .as_string::<i32>()
                .iter()
                .map(|v| v.map(|s| Value::String(s.to_string())).unwrap_or(Value::Null))
                .collect()
        }
        _ => {
            let options = FormatOptions::default();
            let formatter = ArrayFormatter::try_new(array.as_ref(), &options)?;
            (0..array.len())
                .map(|i| {
                    if array.is_null(i) {
                        Value::Null
                    } else {
                        Value::String(formatter.value(i).to_string())
                    }
                })
                .collect()
        }
    };
    Ok(values)
}

pub fn datafusion_type_to_string(data_type: &DataType) -> String {
    match data_type {
        DataType::Boolean => "Boolean".to_string(),
        DataType::Int8 => "Int8".to_string(),
        DataType::Int16 => "Int16".to_string(),
        DataType::Int32 => "Int32".to_string(),
        DataType::Int64 => "Int64".to_string(),
        DataType::UInt8 => "UInt8".to_string(),
        DataType::UInt16 => "UInt16".to_string(),
        DataType::UInt32 => "UInt32".to_string(),
        DataType::UInt64 => "UInt64".to_string(),
        DataType::Float16 => "Float16".to_string(),
        DataType::Float32 => "Float32".to_string(),
        DataType::Float64 => "Float64".to_string(),
        DataType::Timestamp(unit, tz) => match tz {
            Some(tz) => format!("Timestamp({:?}, {})", unit, tz),
            None => format!("Timestamp({:?})", unit),
        },
        DataType::Date32 => "Date32".to_string(),
        DataType::Date64 => "Date64".to_string(),
        DataType::Utf8 | DataType::Utf8View => "String".to_string(),
        DataType::LargeUtf8 => "LargeString".to_string(),
        DataType::Decimal128(precision, scale) => {
            format!("Decimal128({}, {})", precision, scale)
        }
        DataType::Decimal256(precision, scale) => {
            format!("Decimal256({}, {})", precision, scale)
        }
        DataType::List(field) => format!("List({})", datafusion_type_to_string(field.data_type())),
        _ => format!("{:?}", data_type),
    }
}
