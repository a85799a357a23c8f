use std::path::Path;
use std::process::ExitCode;
use std::str::FromStr;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use storecrawl_cli::{Command, Config};
use storecrawl_client::{HuggingFaceClient, StorefrontClient};
use storecrawl_core::{
    BatchUpsertWriter, CrawlConfig, CrawlOrchestrator, DbConfig, EmbedConfig,
    EmbeddingBackfillService, HttpConfig, ProductDump, RunReport, ThrottleConfig, TracingReporter,
    WriterConfig, read_origins,
};
use storecrawl_db::ProductRepository;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenv().ok();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let config = Config::parse();

    match config.command {
        Command::Crawl {
            ref domains,
            ref output,
            max_workers,
            batch_size,
            permits,
            no_persist,
        } => {
            let pool = if no_persist {
                info!("Persistence disabled with --no-persist");
                None
            } else {
                match connect(&config).await? {
                    Some(pool) => {
                        ProductRepository::new(pool.clone())
                            .health_check()
                            .await
                            .context("Database is not reachable")?;
                        storecrawl_db::run_migrations(&pool)
                            .await
                            .context("Failed to prepare database schema")?;
                        Some(pool)
                    }
                    None => {
                        warn!("DATABASE_URL is not set, running fetch-only (nothing is persisted)");
                        None
                    }
                }
            };

            let crawl_config = CrawlConfig::default()
                .with_max_parallelism(max_workers as usize)
                .with_throttle(ThrottleConfig {
                    permits: permits as usize,
                    ..ThrottleConfig::default()
                });
            let writer_config = WriterConfig::default().with_batch_size(batch_size as usize);

            let report = crawl(domains, pool, crawl_config, writer_config).await?;
            print_report(&report);
            write_dump(output, &report);

            if report.is_success() {
                Ok(ExitCode::SUCCESS)
            } else {
                error!("Every attempted domain failed");
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Embed {
            ref hf_token,
            ref embedding_model,
            batch_size,
        } => {
            let repo = ProductRepository::new(require_db(&config).await?);
            let client = HuggingFaceClient::with_model(hf_token, embedding_model)?;
            let embed_config = EmbedConfig {
                batch_size: batch_size as usize,
                ..EmbedConfig::default()
            };

            info!(model = %embedding_model, batch_size, "Starting embedding backfill");
            let stats = EmbeddingBackfillService::new(repo, client)
                .run(&embed_config)
                .await?;

            info!("");
            info!("{}", "=".repeat(60));
            info!("EMBEDDING BACKFILL COMPLETE");
            info!("{}", "=".repeat(60));
            info!("  Scanned:             {}", stats.scanned);
            info!("  Embedded:            {}", stats.embedded);
            info!("  Failed batches:      {}", stats.failed_batches);
            info!("{}", "=".repeat(60));
            Ok(ExitCode::SUCCESS)
        }
        Command::Migrate => {
            let pool = require_db(&config).await?;
            storecrawl_db::run_migrations(&pool).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Stats => {
            let repo = ProductRepository::new(require_db(&config).await?);
            show_stats(&repo).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Opens the pool if a database URL is configured.
async fn connect(config: &Config) -> anyhow::Result<Option<PgPool>> {
    let Some(url) = config.database_url.as_deref() else {
        return Ok(None);
    };

    let mut options = PgConnectOptions::from_str(url).context("Invalid DATABASE_URL")?;
    if let Some(password) = config.database_password.as_deref() {
        options = options.password(password);
    }

    info!("Connecting to database...");
    let db_config = DbConfig::default();
    let pool = PgPoolOptions::new()
        .max_connections(db_config.max_connections)
        .connect_with(options)
        .await
        .context("Failed to connect to database")?;

    Ok(Some(pool))
}

async fn require_db(config: &Config) -> anyhow::Result<PgPool> {
    connect(config)
        .await?
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required for this command"))
}

async fn crawl(
    domains_path: &Path,
    pool: Option<PgPool>,
    crawl_config: CrawlConfig,
    writer_config: WriterConfig,
) -> anyhow::Result<RunReport> {
    let origins = read_origins(domains_path)
        .with_context(|| format!("Failed to read domain list {}", domains_path.display()))?;
    info!("Loaded {} domains from {}", origins.len(), domains_path.display());

    let client = StorefrontClient::with_config(&HttpConfig::default())?;
    let writer = pool
        .map(|pool| BatchUpsertWriter::with_config(ProductRepository::new(pool), writer_config));
    let orchestrator = CrawlOrchestrator::with_config(client, writer, crawl_config);

    let cancel_token = CancellationToken::new();
    let signal_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight domains");
            signal_token.cancel();
        }
    });

    Ok(orchestrator
        .run_cancellable(&origins, &TracingReporter, cancel_token)
        .await)
}

/// A failed dump is reported but does not change the exit status.
fn write_dump(path: &Path, report: &RunReport) {
    match ProductDump::write_json(path, &report.products) {
        Ok(count) => info!("Wrote {} products to {}", count, path.display()),
        Err(e) => error!("Failed to write {}: {}", path.display(), e.user_message()),
    }
}

fn print_report(report: &RunReport) {
    for line in report_lines(report) {
        info!("{}", line);
    }
}

fn report_lines(report: &RunReport) -> Vec<String> {
    let rule = "=".repeat(60);
    let mut lines = vec![
        String::new(),
        rule.clone(),
        if report.interrupted {
            "CRAWL INTERRUPTED".to_string()
        } else {
            "CRAWL COMPLETE".to_string()
        },
        rule.clone(),
        format!("  Duration:            {:.1}s", report.elapsed.as_secs_f64()),
        format!("  Domains attempted:   {}", report.attempted),
        format!(
            "  Successful:          {} ({:.1}%)",
            report.succeeded,
            report.success_rate()
        ),
        format!("  Failed:              {}", report.failed_count()),
        format!("  Total products:      {}", report.total_products()),
    ];

    if report.not_dispatched > 0 {
        lines.push(format!("  Not started:         {}", report.not_dispatched));
    }

    if !report.failed.is_empty() {
        lines.push("-".repeat(60));
        lines.push("Failed domains:".to_string());
        for failure in &report.failed {
            lines.push(format!("  - {}: {}", failure.origin, failure.reason));
        }
    }
    lines.push(rule);
    lines
}

async fn show_stats(repo: &ProductRepository) -> anyhow::Result<()> {
    repo.health_check()
        .await
        .context("Database is not reachable")?;
    let stats = repo.get_stats().await?;

    println!("\nDatabase Statistics\n");
    println!("  Domains:               {}", stats.domains);
    println!("  Products:              {}", stats.products);
    println!("  With embeddings:       {}", stats.products_with_embeddings);
    println!("  Variants:              {}", stats.variants);
    println!("  Images:                {}", stats.images);
    println!("  Option values:         {}", stats.option_values);
    println!("  Snapshots:             {}", stats.snapshots);
    println!();

    Ok(())
}
