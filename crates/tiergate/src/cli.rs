use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tiergate")]
#[command(about = "Inspect and operate the tiered cache and admission gate")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to ./tiergate.toml when present)
    #[arg(short, long, global = true, env = "TIERGATE_CONFIG")]
    pub config: Option<String>,

    /// Override the configured log level
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show cache statistics and shared-tier health
    Stats,
    /// Evict every cache key associated with a tag
    Invalidate {
        /// Tag name
        tag: String,
    },
    /// Clear both cache tiers
    Flush,
    /// Summarize the security event log
    Summary,
    /// Run the admission gate against a synthetic request
    Evaluate(EvaluateArgs),
    /// Remove an IP from the blacklist and forget its suspicious activity
    Unblock {
        /// IP address
        ip: String,
    },
}

#[derive(clap::Args)]
pub struct EvaluateArgs {
    /// Client IP address
    #[arg(long)]
    pub ip: String,
    /// Rate-limit class of the endpoint
    #[arg(long, default_value = "default")]
    pub class: String,
    /// Request URI, including the query string
    #[arg(long, default_value = "/")]
    pub uri: String,
    /// HTTP method
    #[arg(long, default_value = "GET")]
    pub method: String,
    /// User-Agent header
    #[arg(long)]
    pub user_agent: Option<String>,
    /// Extra header as NAME:VALUE (repeatable)
    #[arg(long = "header", value_name = "NAME:VALUE")]
    pub headers: Vec<String>,
    /// Raw request body
    #[arg(long)]
    pub body: Option<String>,
}
