use chrono::DateTime;
use datafusion::arrow::array::{Array, AsArray};
use datafusion::arrow::datatypes::{Float64Type, Int64Type, TimestampMicrosecondType};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info};

use crate::catalog::{ColumnDescriptor, ColumnType};
use crate::error::AnalysisError;
use crate::stats::{self, BoxPlot, Histogram, HISTOGRAM_BINS};
use crate::table_manager::TableSnapshot;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
    pub histogram: Histogram,
    pub boxplot: BoxPlot,
    pub outlier_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub dataset_id: String,
    pub table_name: String,
    pub row_count: u64,
    pub column_count: u64,
    pub missing_values: BTreeMap<String, u64>,
    pub numeric: BTreeMap<String, NumericSummary>,
    pub categorical: BTreeMap<String, BTreeMap<String, u64>>,
}

impl NumericSummary {
    /// Summarizes sorted, non-missing values.
    pub fn from_sorted(sorted: &[f64]) -> Self {
        let boxplot = stats::boxplot(sorted);
        Self {
            count: sorted.len() as u64,
            min: sorted.first().copied().unwrap_or(0.0),
            max: sorted.last().copied().unwrap_or(0.0),
            mean: stats::mean(sorted),
            std: stats::std_dev(sorted),
            histogram: stats::histogram(sorted, HISTOGRAM_BINS),
            outlier_count: stats::outlier_count(sorted, &boxplot),
            boxplot,
        }
    }
}

/// Computes the analysis report over a complete table snapshot.
pub struct Profiler;

impl Profiler {
    pub fn profile(snapshot: &TableSnapshot) -> Result<AnalysisReport, AnalysisError> {
        let start_time = Instant::now();
        let mut report = AnalysisReport {
            dataset_id: snapshot.dataset_id.clone(),
            table_name: snapshot.table_name.clone(),
            row_count: snapshot.row_count as u64,
            column_count: snapshot.columns.len() as u64,
            missing_values: BTreeMap::new(),
            numeric: BTreeMap::new(),
            categorical: BTreeMap::new(),
        };

        for column in &snapshot.columns {
            let index = snapshot
                .column_index(&column.name)
                .ok_or_else(|| AnalysisError::Internal {
                    message: format!(
                        "Column {} missing from table {}",
                        column.name, snapshot.table_name
                    ),
                })?;

            let missing: usize = snapshot
                .batches
                .iter()
                .map(|batch| batch.column(index).null_count())
                .sum();
            report
                .missing_values
                .insert(column.name.clone(), missing as u64);

            if column.data_type.is_numeric() {
                let sorted = Self::sorted_numeric(snapshot, index, column);
                report
                    .numeric
                    .insert(column.name.clone(), NumericSummary::from_sorted(&sorted));
            } else {
                report.categorical.insert(
                    column.name.clone(),
                    Self::frequencies(snapshot, index, column),
                );
            }
        }

        info!(
            "Profiled dataset {} ({} rows, {} columns) in {}ms",
            snapshot.dataset_id,
            report.row_count,
            report.column_count,
            start_time.elapsed().as_millis()
        );
        Ok(report)
    }

    fn sorted_numeric(
        snapshot: &TableSnapshot,
        index: usize,
        column: &ColumnDescriptor,
    ) -> Vec<f64> {
        let mut values = Vec::with_capacity(snapshot.row_count);
        for batch in &snapshot.batches {
            let array = batch.column(index);
            match column.data_type {
                ColumnType::Integer => values.extend(
                    array
                        .as_primitive::<Int64Type>()
                        .iter()
                        .flatten()
                        .map(|v| v as f64),
                ),
                _ => values.extend(array.as_primitive::<Float64Type>().iter().flatten()),
            }
        }
        values.sort_by(f64::total_cmp);
        debug!("Collected {} values for {}", values.len(), column.name);
        values
    }

    fn frequencies(
        snapshot: &TableSnapshot,
        index: usize,
        column: &ColumnDescriptor,
    ) -> BTreeMap<String, u64> {
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for batch in &snapshot.batches {
            let array = batch.column(index);
            match column.data_type {
                ColumnType::Boolean => {
                    for value in array.as_boolean().iter().flatten() {
                        *counts.entry(value.to_string()).or_default() += 1;
                    }
                }
                ColumnType::Timestamp => {
                    for micros in array
                        .as_primitive::<TimestampMicrosecondType>()
                        .iter()
                        .flatten()
                    {
                        let key = DateTime::from_timestamp_micros(micros)
                            .map(|dt| dt.naive_utc().format("%Y-%m-%d %H:%M:%S").to_string())
                            .unwrap_or_else(|| micros.to_string());
                        *counts.entry(key).or_default() += 1;
                    }
                }
                _ => {
                    for value in array.as_string::<i32>().iter().flatten() {
                        *counts.entry(value.to_string()).or_default() += 1;
                    }
                }
            }
        }
        counts
    }
}
