//! CLI entry point for the cloud-cover bulletin.
//!
//! Provides subcommands for a single refresh, the scheduled loop, recording
//! observations for bias correction, and inspecting the catalog and the last
//! bulletin.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration, DurationRound, FixedOffset, Utc};
use clap::{Args, Parser, Subcommand};
use cloud_bulletin::{
    cache::CycleCache,
    catalog::RegionCatalog,
    config::PipelineConfig,
    fetch::{BasicClient, HttpClient, fallback::first_success, load_source},
    infra::{
        bias_store::{BiasStore, JsonFileBiasStore},
        s3::S3Renderer,
    },
    output::{CsvRenderer, JsonFileRenderer, LogRenderer, Renderer, read_bulletin_json},
    pipeline::{
        bias::BiasCorrector,
        driver::{Pipeline, PipelineContext, ScheduleDriver, Trigger, hour_snapshot},
        fetcher::SeriesFetcher,
        types::{Bulletin, ist, to_ist},
    },
    providers::build_providers,
};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "cloud_bulletin")]
#[command(about = "Cloud-cover forecast bulletin for Indian regions", long_about = None)]
struct Cli {
    /// Pipeline config JSON (every field optional)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Region catalog file or URL; repeat to give fallbacks, first loadable wins
    #[arg(long = "regions", global = true)]
    regions: Vec<String>,

    /// GeoJSON FeatureCollection used to fill regions without sample points
    #[arg(long, global = true)]
    geojson: Option<String>,

    /// Durable bias records
    #[arg(long, global = true, default_value = "data/bias.json")]
    bias_store: PathBuf,

    /// Bulletin JSON written after every cycle
    #[arg(short, long, global = true, default_value = "data/bulletin.json")]
    output: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct OutputArgs {
    /// CSV file to append one row per region and horizon day
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Optional: S3 bucket to publish the bulletin to (e.g., "my-bucket")
    #[arg(long)]
    s3_bucket: Option<String>,

    #[arg(long, default_value = "bulletins")]
    s3_prefix: String,

    /// Optional: Gzip compress the bulletin before uploading to S3
    #[arg(long, default_value_t = false)]
    gzip: bool,

    /// Log the whole bulletin as JSON instead of one line per region
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one refresh cycle over every region
    Run {
        /// Ignore the cached bulletin for the current cycle
        #[arg(long, default_value_t = false)]
        refresh: bool,

        /// Directory holding per-cycle cached bulletins
        #[arg(long, default_value = "cache")]
        cache_dir: PathBuf,

        /// Prebuilt bulletin URLs tried in order before computing locally
        #[arg(long = "prebuilt-url")]
        prebuilt_urls: Vec<String>,

        #[command(flatten)]
        outputs: OutputArgs,
    },
    /// Refresh every 3 hours (IST-aligned) and at midnight
    Schedule {
        /// Number of cycles to run (0 = infinite)
        #[arg(short = 'n', long, default_value_t = 0)]
        max_cycles: usize,

        #[arg(long, default_value = "cache")]
        cache_dir: PathBuf,

        #[command(flatten)]
        outputs: OutputArgs,
    },
    /// Record an observed cloud-cover percentage and update the region's bias
    Observe {
        /// Region id, e.g. "Rajasthan:West Rajasthan"
        #[arg(long)]
        region: String,

        #[arg(long)]
        observed: f64,

        /// Model value the observation is compared with; looked up in the
        /// last bulletin when omitted
        #[arg(long)]
        predicted: Option<f64>,

        /// Observation time (RFC 3339); defaults to the current hour
        #[arg(long)]
        at: Option<DateTime<FixedOffset>>,
    },
    /// List the validated region catalog
    ListRegions,
    /// Show every region at an hour index of the last bulletin
    Hour {
        #[arg(value_name = "INDEX")]
        index: usize,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/cloud_bulletin.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("cloud_bulletin.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    let client = http_client(&config)?;

    match &cli.command {
        Commands::Run {
            refresh,
            cache_dir,
            prebuilt_urls,
            outputs,
        } => {
            let renderers = renderers(&cli.output, outputs).await;
            let now = Utc::now();

            if !prebuilt_urls.is_empty() {
                match fetch_prebuilt(client.as_ref(), prebuilt_urls).await {
                    Ok(bulletin) => return render_all(&renderers, &bulletin).await,
                    Err(e) => warn!(error = %e, "No prebuilt bulletin available, computing locally"),
                }
            }

            let cache = CycleCache::new(cache_dir);
            if !refresh && let Some(bulletin) = cache.load(now)? {
                return render_all(&renderers, &bulletin).await;
            }

            let mut driver = build_driver(&cli, &config, client.clone())
                .await?
                .with_cache(cache);
            for renderer in renderers {
                driver = driver.with_renderer(renderer);
            }
            driver.run_cycle(now, Trigger::Manual).await?;
        }
        Commands::Schedule {
            max_cycles,
            cache_dir,
            outputs,
        } => {
            let mut driver = build_driver(&cli, &config, client.clone())
                .await?
                .with_cache(CycleCache::new(cache_dir));
            for renderer in renderers(&cli.output, outputs).await {
                driver = driver.with_renderer(renderer);
            }
            if *max_cycles == 0 {
                info!("Refreshing indefinitely. Press Ctrl+C to stop.");
            }
            driver.run(*max_cycles).await?;
        }
        Commands::Observe {
            region,
            observed,
            predicted,
            at,
        } => {
            let catalog = load_catalog(&cli, client.as_ref()).await?;
            if catalog.get(region).is_none() {
                bail!("unknown region {region:?}; see list-regions");
            }

            let at = match at {
                Some(at) => at.with_timezone(&ist()),
                None => to_ist(Utc::now()),
            };
            let hour = at.duration_trunc(Duration::hours(1))?;
            let predicted = match predicted {
                Some(p) => *p,
                None => {
                    let bulletin = read_bulletin_json(&cli.output)?;
                    bulletin
                        .regions
                        .get(region)
                        .and_then(|r| r.raw_at(hour))
                        .with_context(|| {
                            format!("no model value for {region} at {hour}; pass --predicted")
                        })?
                }
            };

            let corrector = bias_corrector(&cli, &config);
            let record = corrector.observe(region, *observed, predicted).await?;
            info!(
                region_id = %region,
                at = %hour,
                observed,
                predicted,
                bias = record.bias,
                observations = record.observations,
                "Observation recorded"
            );
        }
        Commands::ListRegions => {
            let catalog = load_catalog(&cli, client.as_ref()).await?;
            for region in catalog.regions() {
                info!(
                    region_id = %region.id,
                    state = %region.state,
                    name = %region.name,
                    points = region.points.len(),
                    "Region"
                );
            }
            let merged: Vec<String> = catalog.merge_groups().into_iter().map(|(s, _)| s).collect();
            info!(total = catalog.len(), merged_states = ?merged, "Region catalog summary");
        }
        Commands::Hour { index } => {
            let bulletin = read_bulletin_json(&cli.output)?;
            for (area, value) in hour_snapshot(&bulletin, *index) {
                match (value.percent, value.bucket) {
                    (Some(pct), Some(bucket)) => {
                        info!(area = %area, index, percent = pct, bucket = %bucket, "Hour")
                    }
                    _ => info!(area = %area, index, "Hour: no data"),
                }
            }
        }
    }

    Ok(())
}

fn http_client(config: &PipelineConfig) -> Result<Arc<dyn HttpClient>> {
    let connect = std::time::Duration::from_secs(config.connect_timeout_secs);
    Ok(Arc::new(BasicClient::with_timeouts(config.fetch_timeout(), connect)?))
}

fn bias_corrector(cli: &Cli, config: &PipelineConfig) -> BiasCorrector {
    let store: Arc<dyn BiasStore> = Arc::new(JsonFileBiasStore::new(&cli.bias_store));
    BiasCorrector::new(store, config.bias_alpha)
}

/// Loads the catalog (first working source, or the built-in one), fills
/// missing points from GeoJSON, and drops invalid regions.
async fn load_catalog(cli: &Cli, client: &dyn HttpClient) -> Result<RegionCatalog> {
    let mut catalog = if cli.regions.is_empty() {
        RegionCatalog::builtin()
    } else {
        RegionCatalog::load_first(client, &cli.regions).await?
    };

    if let Some(source) = &cli.geojson {
        let bytes = load_source(client, source).await?;
        let collection: serde_json::Value =
            serde_json::from_slice(&bytes).with_context(|| format!("{source} is not JSON"))?;
        let filled = catalog.fill_missing_from_geojson(&collection);
        info!(filled, source = %source, "Filled region points from GeoJSON");
    }

    let (catalog, rejected) = catalog.validated();
    if !rejected.is_empty() {
        warn!(rejected = rejected.len(), "Some regions were skipped");
    }
    if catalog.is_empty() {
        bail!("region catalog has no usable regions");
    }
    Ok(catalog)
}

async fn build_driver(
    cli: &Cli,
    config: &PipelineConfig,
    client: Arc<dyn HttpClient>,
) -> Result<ScheduleDriver> {
    let catalog = load_catalog(cli, client.as_ref()).await?;
    let owm_key = std::env::var("OPENWEATHERMAP_API_KEY").ok();
    let providers = build_providers(&config.providers, client, owm_key);
    if providers.is_empty() {
        bail!("no providers configured");
    }

    let fetcher = SeriesFetcher::new(providers);
    info!(providers = ?fetcher.provider_names(), regions = catalog.len(), "Pipeline ready");
    let pipeline = Pipeline::new(config.clone(), fetcher, bias_corrector(cli, config));

    let mut driver = ScheduleDriver::new(Arc::new(pipeline), catalog);
    // The last bulletin seeds stale fallback and hysteresis across restarts.
    if cli.output.exists() {
        match read_bulletin_json(&cli.output) {
            Ok(previous) => driver = driver.with_context(PipelineContext::from_bulletin(previous)),
            Err(e) => warn!(error = %e, "Ignoring unreadable previous bulletin"),
        }
    }
    Ok(driver)
}

async fn renderers(output: &Path, args: &OutputArgs) -> Vec<Box<dyn Renderer>> {
    let mut out: Vec<Box<dyn Renderer>> = vec![
        Box::new(JsonFileRenderer::new(output)),
        Box::new(LogRenderer { json: args.json }),
    ];
    if let Some(csv) = &args.csv {
        out.push(Box::new(CsvRenderer::new(csv)));
    }
    if let Some(bucket) = &args.s3_bucket {
        info!(bucket = %bucket, gzip = args.gzip, "S3 upload enabled");
        out.push(Box::new(
            S3Renderer::from_env(bucket.clone(), args.s3_prefix.clone(), args.gzip).await,
        ));
    }
    out
}

async fn render_all(renderers: &[Box<dyn Renderer>], bulletin: &Bulletin) -> Result<()> {
    for renderer in renderers {
        renderer
            .render(bulletin)
            .await
            .with_context(|| format!("renderer {} failed", renderer.name()))?;
    }
    Ok(())
}

/// First prebuilt bulletin URL that returns a valid bulletin.
#[tracing::instrument(skip_all, fields(candidates = urls.len()))]
async fn fetch_prebuilt(client: &dyn HttpClient, urls: &[String]) -> Result<Bulletin> {
    let (url, bulletin) = first_success(urls, |url| async move {
        let bytes = load_source(client, url).await?;
        Ok::<Bulletin, anyhow::Error>(serde_json::from_slice(&bytes)?)
    })
    .await?;
    info!(url = %url, cycle = %bulletin.cycle, "Using prebuilt bulletin");
    Ok(bulletin)
}
