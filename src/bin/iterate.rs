use clap::Parser;
use image_iteration::{
    app_state::{build_pipeline, build_sinks},
    config::AppConfig,
    db,
    models::job::{Job, SubmitResponse, MAX_ITERATIONS},
    services::{broadcast::LogBroadcaster, sink::SinkFanout, upload},
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Run one image iteration job from a local file.
#[derive(Debug, Parser)]
#[command(name = "iterate", version, about)]
struct Args {
    /// Seed image (png or jpeg)
    image: PathBuf,

    /// Number of iterations to run
    #[arg(short = 'n', long, default_value_t = 1)]
    iterations: u32,

    /// Do not record iterations to PostgreSQL or Airtable
    #[arg(long)]
    no_sinks: bool,

    /// Write the JSON results to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let args = Args::parse();

    if args.iterations == 0 || args.iterations > MAX_ITERATIONS {
        return Err(format!("iterations must be between 1 and {MAX_ITERATIONS}").into());
    }

    let filename = args.image.to_string_lossy();
    if !upload::allowed_file(&filename) {
        return Err(format!("{filename}: unsupported file type").into());
    }

    let seed = tokio::fs::read(&args.image).await?;
    if upload::detect_image(&seed).is_none() {
        return Err(format!("{filename}: not a valid image").into());
    }

    let config = AppConfig::from_env()?;

    let sinks = if args.no_sinks {
        SinkFanout::empty()
    } else {
        tracing::info!("Connecting to PostgreSQL");
        let pool = db::init_pool(config.require_database_url()?).await?;
        db::run_migrations(&pool).await?;
        build_sinks(&config, Some(pool))?
    };

    let pipeline = build_pipeline(&config, sinks, Arc::new(LogBroadcaster))?;

    let job = Job::new(seed, args.iterations);
    tracing::info!(job_id = %job.id, iterations = job.iterations, "Running job");

    let results = pipeline.run(job.seed_image, job.iterations, job.id).await?;

    if results.len() < args.iterations as usize {
        tracing::warn!(
            job_id = %job.id,
            completed = results.len(),
            requested = args.iterations,
            "Some iterations were skipped, see log for details"
        );
    }

    let json = serde_json::to_string_pretty(&SubmitResponse {
        job_id: job.id,
        results,
    })?;

    match args.output {
        Some(path) => tokio::fs::write(&path, json).await?,
        None => println!("{json}"),
    }

    Ok(())
}
