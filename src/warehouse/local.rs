//! Filesystem warehouse for local runs and tests.
//!
//! Layout, one hive-style partition per UTC day:
//!
//! ```text
//! <root>/<dataset>/<table>/date=YYYYMMDD/rows.ndjson        streaming inserts
//! <root>/<dataset>/<table>/date=YYYYMMDD/<job_id>.parquet   load jobs
//! ```

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::Utc;
use glob::glob;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, BufWriter, Write},
    path::PathBuf,
};
use tracing::info;

use super::{new_job_id, write_parquet, InsertError, JobState, LoadJob, LoadOptions, Warehouse};
use crate::{config::TableRef, error::WarehouseError};

const ROWS_FILE: &str = "rows.ndjson";

pub struct LocalWarehouse {
    root: PathBuf,
}

impl LocalWarehouse {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, WarehouseError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn table_dir(&self, table: &TableRef) -> PathBuf {
        self.root.join(&table.dataset_id).join(&table.table_id)
    }

    fn today_partition(&self, table: &TableRef) -> Result<PathBuf, WarehouseError> {
        let partition = format!("date={}", Utc::now().date_naive().format("%Y%m%d"));
        let dir = self.table_dir(table).join(partition);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn files(&self, table: &TableRef, file_pattern: &str) -> Result<Vec<PathBuf>, WarehouseError> {
        let pattern = format!("{}/date=*/{}", self.table_dir(table).display(), file_pattern);
        let mut paths: Vec<PathBuf> = glob(&pattern)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?
            .filter_map(Result::ok)
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Every row streamed into `table`, oldest partition first.
    pub fn read_rows(&self, table: &TableRef) -> Result<Vec<serde_json::Value>, WarehouseError> {
        let mut rows = Vec::new();
        for path in self.files(table, ROWS_FILE)? {
            let reader = BufReader::new(File::open(&path)?);
            for line in reader.lines() {
                let line = line?;
                if !line.trim().is_empty() {
                    rows.push(serde_json::from_str(&line)?);
                }
            }
        }
        Ok(rows)
    }

    /// Every batch loaded into `table`.
    pub fn read_batches(&self, table: &TableRef) -> Result<Vec<RecordBatch>, WarehouseError> {
        let mut batches = Vec::new();
        for path in self.files(table, "*.parquet")? {
            let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&path)?)?
                .with_batch_size(1024)
                .build()?;
            for batch in reader {
                batches.push(batch?);
            }
        }
        Ok(batches)
    }
}

#[async_trait]
impl Warehouse for LocalWarehouse {
    async fn insert_rows(
        &self,
        table: &TableRef,
        rows: Vec<serde_json::Value>,
    ) -> Result<Vec<InsertError>, WarehouseError> {
        let rejected: Vec<InsertError> = rows
            .iter()
            .enumerate()
            .filter(|(_, row)| !row.is_object())
            .map(|(index, _)| InsertError {
                index,
                message: "row is not a JSON object".into(),
            })
            .collect();
        if !rejected.is_empty() {
            return Ok(rejected);
        }

        let path = self.today_partition(table)?.join(ROWS_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut out = BufWriter::new(file);
        for row in &rows {
            serde_json::to_writer(&mut out, row)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
        Ok(Vec::new())
    }

    async fn bulk_load(
        &self,
        table: &TableRef,
        batch: RecordBatch,
        _options: &LoadOptions,
    ) -> Result<LoadJob, WarehouseError> {
        let job_id = new_job_id("local", table);
        let dir = self.today_partition(table)?;
        let tmp = dir.join(format!("{job_id}.parquet.tmp"));
        let final_path = dir.join(format!("{job_id}.parquet"));

        write_parquet(BufWriter::new(File::create(&tmp)?), &batch)?;
        fs::rename(&tmp, &final_path)?;

        info!(%table, rows = batch.num_rows(), path = %final_path.display(), "loaded batch");
        Ok(LoadJob {
            project_id: table.project_id.clone(),
            job_id,
            location: None,
        })
    }

    async fn job_state(&self, _job: &LoadJob) -> Result<JobState, WarehouseError> {
        Ok(JobState::Done)
    }
}
