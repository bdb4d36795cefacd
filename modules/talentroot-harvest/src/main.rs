use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use talentroot_common::{Config, ReportScope};
use talentroot_harvest::{
    ConflictPolicy, DedupEngine, HealthPolicy, HttpFetcher, JobController, JsonExtractor, LogSink,
    ReportConfig, ReportGenerator, RetentionPolicy, SourceRegistry, Worker, WorkerConfig,
};
use talentroot_store::{
    JobStore, LogStore, PgJobStore, PgLogStore, PgRecordStore, PgReportStore, PgSourceStore,
    RecordStore, ReportStore, SourceStore,
};

const USER_AGENT: &str = "talentroot-harvest/0.1";

#[derive(Parser)]
#[command(name = "talentroot-harvest", about = "CV ingestion and quality pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the worker pool, heartbeat, and maintenance loops.
    Run,
    /// Generate a quality report over the trailing window and print it.
    Report {
        #[arg(long, default_value_t = 30)]
        days: i64,
    },
    /// Purge log entries past their retention windows.
    PurgeLogs,
}

struct Services {
    config: Config,
    sources: Arc<dyn SourceStore>,
    jobs: Arc<dyn JobStore>,
    records: Arc<dyn RecordStore>,
    logs: Arc<LogSink>,
    log_store: Arc<dyn LogStore>,
    reports: Arc<dyn ReportStore>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("talentroot=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    config.log_redacted();

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    talentroot_store::migrate(&pool).await?;

    let log_store: Arc<dyn LogStore> = Arc::new(PgLogStore::new(pool.clone()));
    let services = Services {
        sources: Arc::new(PgSourceStore::new(pool.clone())),
        jobs: Arc::new(PgJobStore::new(pool.clone())),
        records: Arc::new(PgRecordStore::new(pool.clone())),
        logs: Arc::new(LogSink::new(
            log_store.clone(),
            RetentionPolicy {
                short_days: config.debug_log_retention_days,
                long_days: config.error_log_retention_days,
            },
        )),
        log_store,
        reports: Arc::new(PgReportStore::new(pool)),
        config,
    };

    match cli.command {
        Command::Run => run(services).await,
        Command::Report { days } => report(services, days).await,
        Command::PurgeLogs => {
            let purged = services.logs.purge_expired().await?;
            info!(purged, "Log purge complete");
            Ok(())
        }
    }
}

async fn run(services: Services) -> Result<()> {
    let registry = Arc::new(
        SourceRegistry::load(services.sources.clone(), HealthPolicy::default()).await?,
    );
    let fetcher = Arc::new(HttpFetcher::new(USER_AGENT));
    let extractor = Arc::new(JsonExtractor);
    let dedup = Arc::new(DedupEngine::new(
        services.records.clone(),
        services.config.auto_merge_threshold,
        ConflictPolicy::default(),
    ));
    let controller = Arc::new(JobController::new(
        services.jobs.clone(),
        services.logs.clone(),
    ));

    for n in 0..services.config.worker_count {
        let worker = Worker::new(
            format!("{}-{n}", services.config.worker_id),
            services.jobs.clone(),
            services.records.clone(),
            registry.clone(),
            fetcher.clone(),
            extractor.clone(),
            dedup.clone(),
            services.logs.clone(),
            WorkerConfig::default(),
        );
        tokio::spawn(async move {
            if let Err(e) = worker.run_forever().await {
                warn!(error = %e, "Worker loop exited");
            }
        });
    }
    info!(workers = services.config.worker_count, "Worker pool started");

    // Heartbeat: probes sources outside the request budget.
    {
        let registry = registry.clone();
        let fetcher = fetcher.clone();
        let interval = services.config.health_check_interval_secs;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval));
            loop {
                ticker.tick().await;
                registry.heartbeat(fetcher.as_ref()).await;
            }
        });
    }

    // Schedule sweep: re-queue recurring jobs.
    {
        let controller = controller.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                if let Err(e) = controller.requeue_due().await {
                    warn!(error = %e, "Schedule sweep failed");
                }
            }
        });
    }

    // Log retention sweep.
    {
        let logs = services.logs.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(3600));
            loop {
                ticker.tick().await;
                if let Err(e) = logs.purge_expired().await {
                    warn!(error = %e, "Log purge failed");
                }
            }
        });
    }

    // Scheduled quality reports over the trailing window.
    {
        let generator = ReportGenerator::new(
            services.records.clone(),
            services.log_store.clone(),
            services.reports.clone(),
            ReportConfig::default(),
        );
        let interval_hours = services.config.report_interval_hours.max(1) as u64;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_hours * 3600));
            ticker.tick().await; // don't report at startup
            loop {
                ticker.tick().await;
                let now = chrono::Utc::now();
                let scope = ReportScope {
                    source_ids: Vec::new(),
                    from: now - chrono::Duration::hours(interval_hours as i64 * 2),
                    to: now,
                };
                if let Err(e) = generator.generate(scope).await {
                    warn!(error = %e, "Scheduled report failed");
                }
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, in-flight work will checkpoint");
    Ok(())
}

async fn report(services: Services, days: i64) -> Result<()> {
    let generator = ReportGenerator::new(
        services.records,
        services.log_store,
        services.reports,
        ReportConfig::default(),
    );
    let now = chrono::Utc::now();
    let report = generator
        .generate(ReportScope {
            source_ids: Vec::new(),
            from: now - chrono::Duration::days(days),
            to: now,
        })
        .await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
