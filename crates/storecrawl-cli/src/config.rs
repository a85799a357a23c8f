use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::LazyLock;

static VERSION_INFO: LazyLock<String> = LazyLock::new(|| {
    let version = env!("CARGO_PKG_VERSION");

    // Use VERGEN_GIT_SHA for the commit hash (with safe slicing)
    let commit = option_env!("VERGEN_GIT_SHA")
        .map(|s| s.chars().take(7).collect::<String>())
        .unwrap_or_else(|| "unknown".to_string());

    let built = option_env!("VERGEN_BUILD_DATE").unwrap_or("unknown"); // YYYY-MM-DD
    let target = option_env!("VERGEN_CARGO_TARGET_TRIPLE").unwrap_or("unknown");
    let rustc = option_env!("VERGEN_RUSTC_SEMVER").unwrap_or("unknown");

    format!("{version}\ncommit: {commit}\nbuilt: {built}\ntarget: {target}\nrustc: {rustc}")
});

pub fn version_info() -> &'static str {
    &VERSION_INFO
}

/// CLI configuration parsed from command line arguments and environment variables
#[derive(Parser, Debug)]
#[command(name = "storecrawl")]
#[command(
    author,
    version = version_info(),
    about = "Harvests public storefront product catalogs into PostgreSQL"
)]
#[command(after_help = "Examples:
  storecrawl crawl --domains domains.txt --output products.json
  storecrawl crawl --no-persist --max-workers 8
  storecrawl embed --batch-size 256
  storecrawl stats

Without DATABASE_URL the crawl runs in fetch-only mode and only writes the dump.")]
pub struct Config {
    /// PostgreSQL connection URL. Crawls without it are fetch-only.
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    /// Password for the database, if not embedded in the URL
    #[arg(long, env = "DATABASE_PASSWORD", global = true, hide_env_values = true)]
    pub database_password: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Crawl every domain in the list and persist the catalogs
    #[command(after_help = "Examples:
  storecrawl crawl                                  # domains.txt -> products.json
  storecrawl crawl --domains shops.txt --permits 4
  storecrawl crawl --no-persist --output /tmp/dump.json")]
    Crawl {
        /// File with one storefront domain per line (`#` starts a comment)
        #[arg(short, long, value_name = "PATH", default_value = "domains.txt")]
        domains: PathBuf,

        /// Where to write the JSON dump of every fetched product
        #[arg(short, long, value_name = "PATH", default_value = "products.json")]
        output: PathBuf,

        /// Maximum number of domains crawled at once
        #[arg(long, default_value = "32", value_parser = clap::value_parser!(u64).range(1..))]
        max_workers: u64,

        /// Rows per upsert statement
        #[arg(long, default_value = "50", value_parser = clap::value_parser!(u64).range(1..))]
        batch_size: u64,

        /// Requests allowed in flight across all domains
        #[arg(long, default_value = "2", value_parser = clap::value_parser!(u64).range(1..))]
        permits: u64,

        /// Skip the database even if DATABASE_URL is set
        #[arg(long)]
        no_persist: bool,
    },
    /// Compute embeddings for products that do not have one yet
    Embed {
        /// Hugging Face access token
        #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
        hf_token: String,

        /// Embedding model id
        #[arg(
            long,
            env = "EMBEDDING_MODEL",
            default_value = "sentence-transformers/all-MiniLM-L6-v2"
        )]
        embedding_model: String,

        /// Titles per embedding request
        #[arg(long, default_value = "512", value_parser = clap::value_parser!(u64).range(1..))]
        batch_size: u64,
    },
    /// Create or update the database schema
    Migrate,
    /// Show row counts per table
    Stats,
}
