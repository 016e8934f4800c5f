use arrow::{
    array::{ArrayRef, Float64Array, Int64Array, StringArray, TimestampMicrosecondArray},
    datatypes::{DataType, Field, Schema, TimeUnit},
    error::ArrowError,
    record_batch::RecordBatch,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

use super::{LoadOptions, Warehouse};
use crate::{
    config::{RuntimeConfig, TableRef},
    error::WarehouseError,
    process::CustomerAggregate,
};

/// Column order of the results table: provenance first, then the aggregate.
pub fn results_schema() -> Schema {
    Schema::new(vec![
        Field::new("file_name", DataType::Utf8, false),
        Field::new(
            "processed_at",
            DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            false,
        ),
        Field::new("customer_id", DataType::Int64, false),
        Field::new("max_period", DataType::Int64, false),
        Field::new("total_income", DataType::Float64, false),
    ])
}

/// Attach `file_name` and `processed_at` to every aggregate row.
pub fn build_results_batch(
    file_name: &str,
    processed_at: DateTime<Utc>,
    customers: &[CustomerAggregate],
) -> Result<RecordBatch, ArrowError> {
    let n = customers.len();
    let ts = processed_at.timestamp_micros();

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(vec![file_name; n])),
        Arc::new(TimestampMicrosecondArray::from(vec![ts; n]).with_timezone("UTC")),
        Arc::new(Int64Array::from_iter_values(
            customers.iter().map(|c| c.customer_id),
        )),
        Arc::new(Int64Array::from_iter_values(
            customers.iter().map(|c| c.max_period),
        )),
        Arc::new(Float64Array::from_iter_values(
            customers.iter().map(|c| c.total_income),
        )),
    ];

    RecordBatch::try_new(Arc::new(results_schema()), columns)
}

/// Append the aggregate to the results table and wait for the load to finish.
///
/// Returns the number of rows written; an empty aggregate writes nothing.
#[tracing::instrument(level = "debug", skip_all, fields(table = %table, file = %file_name))]
pub async fn write_results(
    warehouse: &dyn Warehouse,
    table: &TableRef,
    file_name: &str,
    customers: &[CustomerAggregate],
    runtime: &RuntimeConfig,
) -> Result<usize, WarehouseError> {
    if customers.is_empty() {
        info!(file = %file_name, "no aggregates to persist");
        return Ok(0);
    }

    let batch = build_results_batch(file_name, Utc::now(), customers)?;
    let rows = batch.num_rows();

    let job = warehouse
        .bulk_load(table, batch, &LoadOptions::append_allow_field_addition())
        .await?;
    warehouse
        .await_completion(&job, runtime.job_poll_interval(), runtime.job_timeout())
        .await?;

    info!(%table, rows, job_id = %job.job_id, "results saved");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::LocalWarehouse;
    use arrow::array::Array;
    use tempfile::tempdir;

    fn customers() -> Vec<CustomerAggregate> {
        vec![
            CustomerAggregate {
                customer_id: 1,
                max_period: 202401,
                total_income: 250.5,
            },
            CustomerAggregate {
                customer_id: 9034463,
                max_period: 202504,
                total_income: 1500.0,
            },
        ]
    }

    #[test]
    fn batch_has_provenance_columns_first() {
        let at: DateTime<Utc> = "2025-04-30T12:00:00Z".parse().unwrap();
        let batch = build_results_batch("rentas.csv", at, &customers()).unwrap();

        let names: Vec<&str> = batch
            .schema_ref()
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .collect();
        assert_eq!(
            names,
            ["file_name", "processed_at", "customer_id", "max_period", "total_income"]
        );
        assert_eq!(batch.num_rows(), 2);

        let files = batch
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert!(files.iter().all(|f| f == Some("rentas.csv")));

        let ts = batch
            .column(1)
            .as_any()
            .downcast_ref::<TimestampMicrosecondArray>()
            .unwrap();
        assert_eq!(ts.value(1), at.timestamp_micros());

        let income = batch
            .column(4)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(income.value(1), 1500.0);
        assert_eq!(income.null_count(), 0);
    }

    #[tokio::test]
    async fn write_results_loads_and_appends() {
        let tmp = tempdir().unwrap();
        let wh = LocalWarehouse::new(tmp.path()).unwrap();
        let table = TableRef::new("p", "ds", "cliente_renta_resultado");
        let runtime = RuntimeConfig::default();

        let n = write_results(&wh, &table, "a.csv", &customers(), &runtime)
            .await
            .unwrap();
        assert_eq!(n, 2);
        write_results(&wh, &table, "b.csv", &customers()[..1], &runtime)
            .await
            .unwrap();

        let batches = wh.read_batches(&table).unwrap();
        let total: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(total, 3);
    }

    #[tokio::test]
    async fn empty_aggregate_is_a_no_op() {
        let tmp = tempdir().unwrap();
        let wh = LocalWarehouse::new(tmp.path()).unwrap();
        let table = TableRef::new("p", "ds", "cliente_renta_resultado");

        let n = write_results(&wh, &table, "empty.csv", &[], &RuntimeConfig::default())
            .await
            .unwrap();
        assert_eq!(n, 0);
        assert!(wh.read_batches(&table).unwrap().is_empty());
        assert!(!wh.table_dir(&table).exists());
    }
}
