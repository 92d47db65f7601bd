use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use tokio_util::sync::CancellationToken;

use bq_load::backoff::ExponentialBackoff;
use bq_load::schema::read_schema;
use bq_load::structs::job_configuration_load::{CreateDisposition, SourceFormat, WriteDisposition};
use bq_load::wait::WaitBudget;
use bq_load::{BatchLoadSubmitter, Client, ClientConfig, LoadRequest};

/// Loads files from Google Cloud Storage into a BigQuery table and waits
/// for the load job to finish.
#[derive(Parser, Debug)]
#[command(name = "bq_load", version)]
struct Cli {
    /// Your Google Cloud project ID.
    project_id: String,

    /// A BigQuery dataset ID.
    dataset_id: String,

    /// Name of the table to load data into.
    table_name: String,

    /// Path to a JSON file describing the table schema.
    schema_file: PathBuf,

    /// Cloud Storage path to the data, for example gs://mybucket/etl/*.json
    data_path: String,

    /// How often to poll the job for completion (seconds).
    #[arg(short, long, default_value_t = 1)]
    poll_interval: u64,

    /// Number of times to retry a request that failed with a 5xx error.
    /// Defaults to `default_retries` from the settings.
    #[arg(short = 'r', long)]
    num_retries: Option<usize>,

    #[arg(short = 't', long, value_enum, default_value_t = SourceFormat::Csv)]
    source_format: SourceFormat,

    /// What to do if the destination table already has data.
    #[arg(short, long, value_enum, default_value_t = WriteDisposition::WriteEmpty)]
    write_disposition: WriteDisposition,

    #[arg(long, value_enum, default_value_t = CreateDisposition::CreateIfNeeded)]
    create_disposition: CreateDisposition,

    /// Fail rows that carry values not described by the schema.
    #[arg(long)]
    no_ignore_unknown_values: bool,

    /// Expected number of files under the data path. When given, the load
    /// waits until exactly this many are listed before it is submitted.
    #[arg(short = 'n', long)]
    batch_count: Option<usize>,

    /// Location of the dataset, e.g. US or europe-west1.
    #[arg(long)]
    location: Option<String>,

    /// Give up after waiting this many seconds in total.
    #[arg(long)]
    max_wait: Option<u64>,

    /// How many times to list the source files before giving up.
    #[arg(long, default_value_t = 40)]
    readiness_attempts: u32,

    /// First delay between source listings (seconds); grows exponentially.
    #[arg(long, default_value_t = 1)]
    readiness_base_delay: u64,

    /// Settings file (toml, yaml or json).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    match main_result(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            println!("Error loading table: {err:?}");
            ExitCode::FAILURE
        }
    }
}

async fn main_result(cli: Cli) -> Result<()> {
    let config = ClientConfig::load(cli.config.as_deref()).context("failed to load settings")?;
    let schema = read_schema(&cli.schema_file).await?;
    let request = LoadRequest::new(
        cli.project_id,
        cli.dataset_id,
        cli.table_name,
        schema,
        cli.data_path,
    )
    .source_format(cli.source_format)
    .write_disposition(cli.write_disposition)
    .create_disposition(cli.create_disposition)
    .ignore_unknown_values(!cli.no_ignore_unknown_values)
    .location(cli.location)
    .retries(cli.num_retries.unwrap_or(config.default_retries));

    let client = Client::new(&config)
        .await
        .context("failed to create google api client")?;

    let token = CancellationToken::new();
    let on_interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    let submitter = BatchLoadSubmitter::new(client.clone(), client)
        .poll_interval(Duration::from_secs(cli.poll_interval))
        .readiness_backoff(Box::new(ExponentialBackoff::new(
            Duration::from_secs(cli.readiness_base_delay),
            cli.readiness_attempts,
        )))
        .budget(WaitBudget::new(token, cli.max_wait.map(Duration::from_secs)))
        .on_submitted(|handle| println!("Waiting for job {} to finish...", handle.job_id));

    let destination = request.destination();
    println!(
        "Loading {} into {}:{}.{}",
        request.source_uri(),
        destination.project_id,
        destination.dataset_id,
        destination.table_id
    );
    let outcome = submitter
        .run(&request, cli.batch_count)
        .await
        .with_context(|| format!("load into {}.{} failed", destination.dataset_id, destination.table_id))?;
    println!("Job {} complete.", outcome.handle.job_id);
    Ok(())
}
