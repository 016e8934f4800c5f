use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use renta_ingest::{
    store::{GcsObjectStore, LocalObjectStore, ObjectStore},
    warehouse::{BigQueryWarehouse, LocalWarehouse, Warehouse},
    Config, Pipeline, PipelineResponse, StorageEvent,
};
use std::{convert::Infallible, env, path::PathBuf, sync::Arc};
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};
use warp::{reject::Rejection, reply::Reply, Filter};

/// Aggregate income CSV uploads per customer and persist them to the warehouse.
#[derive(Parser, Debug)]
#[command(name = "renta-ingest", version)]
struct Cli {
    /// YAML config file; `RENTA_*` env vars override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use `<dir>/objects` and `<dir>/warehouse` instead of GCS and BigQuery
    #[arg(long, global = true, env = "RENTA_LOCAL_ROOT")]
    local_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve storage notifications over HTTP (`POST /`, `GET /health`)
    Serve {
        #[arg(long, env = "PORT", default_value_t = 8080)]
        port: u16,
    },
    /// Process a single object and print the response
    Process {
        #[arg(long)]
        bucket: String,
        #[arg(long)]
        name: String,
    },
}

async fn build_pipeline(cli: &Cli, config: Config) -> Result<Pipeline> {
    let store: Arc<dyn ObjectStore>;
    let warehouse: Arc<dyn Warehouse>;
    match &cli.local_root {
        Some(root) => {
            info!(root = %root.display(), "using local object store and warehouse");
            store = Arc::new(LocalObjectStore::new(root.join("objects")));
            warehouse = Arc::new(
                LocalWarehouse::new(root.join("warehouse")).context("creating local warehouse")?,
            );
        }
        None => {
            store = Arc::new(
                GcsObjectStore::new()
                    .await
                    .context("authenticating GCS client")?,
            );
            warehouse = Arc::new(
                BigQueryWarehouse::new(config.warehouse.location.clone())
                    .await
                    .context("authenticating BigQuery client")?,
            );
        }
    }
    Ok(Pipeline::new(store, warehouse, config))
}

fn with_pipeline(
    pipeline: Arc<Pipeline>,
) -> impl Filter<Extract = (Arc<Pipeline>,), Error = Infallible> + Clone {
    warp::any().map(move || pipeline.clone())
}

async fn health_check() -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&serde_json::json!({
        "status": "healthy",
        "service": "renta-ingest"
    })))
}

async fn handle_event(
    event: StorageEvent,
    pipeline: Arc<Pipeline>,
) -> Result<impl Reply, Rejection> {
    let response = pipeline.handle(&event).await;
    Ok(warp::reply::json(&response))
}

fn routes(
    pipeline: Arc<Pipeline>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let health = warp::path("health")
        .and(warp::get())
        .and_then(health_check);

    let events = warp::path::end()
        .and(warp::post())
        .and(warp::body::json())
        .and(with_pipeline(pipeline))
        .and_then(handle_event);

    health.or(events)
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(log_level.parse().unwrap_or(Level::INFO.into())),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    info!(
        project = %config.warehouse.project_id,
        dataset = %config.warehouse.dataset_id,
        "configuration loaded"
    );
    let pipeline = Arc::new(build_pipeline(&cli, config).await?);

    match cli.command {
        Command::Serve { port } => {
            info!("Server starting on port {}", port);
            warp::serve(routes(pipeline)).run(([0, 0, 0, 0], port)).await;
        }
        Command::Process { bucket, name } => {
            let response = pipeline.handle(&StorageEvent { bucket, name }).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
            if let PipelineResponse::Failure(f) = response {
                bail!("processing {} failed: {}", f.file, f.error);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tempfile::tempdir;

    fn local_pipeline(root: &std::path::Path) -> Arc<Pipeline> {
        Arc::new(Pipeline::new(
            Arc::new(LocalObjectStore::new(root.join("objects"))),
            Arc::new(LocalWarehouse::new(root.join("warehouse")).unwrap()),
            Config::default(),
        ))
    }

    #[tokio::test]
    async fn test_health_check() {
        let result = health_check().await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn post_event_returns_pipeline_response() {
        let tmp = tempdir().unwrap();
        let bucket_dir = tmp.path().join("objects/incoming");
        std::fs::create_dir_all(&bucket_dir).unwrap();
        std::fs::write(
            bucket_dir.join("rentas.csv"),
            "C1;202504;1000;215940;76363085;4;1003;P;01;E;P;R;9034463;3\n",
        )
        .unwrap();
        let api = routes(local_pipeline(tmp.path()));

        let resp = warp::test::request()
            .method("POST")
            .path("/")
            .json(&json!({"bucket": "incoming", "name": "rentas.csv", "size": "61"}))
            .reply(&api)
            .await;
        assert_eq!(resp.status(), 200);
        let body: Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["total_customers"], 1);
        assert_eq!(body["persisted"], true);

        let resp = warp::test::request()
            .method("POST")
            .path("/")
            .json(&json!({"bucket": "incoming", "name": "readme.md"}))
            .reply(&api)
            .await;
        let body: Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body, json!({"error": "not a CSV file"}));
    }

    #[test]
    fn cli_parses_process_command() {
        let cli = Cli::parse_from([
            "renta-ingest",
            "--local-root",
            "/tmp/renta",
            "process",
            "--bucket",
            "incoming",
            "--name",
            "rentas.csv",
        ]);
        assert_eq!(cli.local_root, Some(PathBuf::from("/tmp/renta")));
        match cli.command {
            Command::Process { bucket, name } => {
                assert_eq!(bucket, "incoming");
                assert_eq!(name, "rentas.csv");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
