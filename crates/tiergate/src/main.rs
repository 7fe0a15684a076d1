mod cli;

use anyhow::{Context, Result, bail};
use clap::Parser;
use colored::Colorize;
use serde::Serialize;

use cli::{Cli, Commands, EvaluateArgs};
use tiergate::Tiergate;
use tiergate::config::loader::load_config;
use tiergate::observability::{apply_logging_level, init_tracing, level_override, rust_log_is_set};
use tiergate_security::RequestContext;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{} {e:#}", "✗".red());
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present (ignore if not found)
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("{} failed to load .env file: {e}", "!".yellow());
        }
    }

    let cli = Cli::parse();
    init_tracing("warn");

    let config = load_config(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(level) = level_override(
        cli.log_level.as_deref(),
        &config.logging.level,
        rust_log_is_set(),
    ) {
        apply_logging_level(level);
    }

    let app = Tiergate::from_config(&config)
        .await
        .context("failed to initialise tiergate")?;

    match cli.command {
        Commands::Stats => {
            let shared_reachable = app.cache.is_shared_available().await;
            let mut stats = serde_json::to_value(app.cache.stats())?;
            stats["sharedReachable"] = shared_reachable.into();
            print_json(&stats)?;
        }
        Commands::Invalidate { tag } => {
            if !app.cache.has_shared_tier() {
                bail!("tag invalidation needs the shared tier; enable redis in the configuration");
            }
            let removed = app.cache.invalidate_by_tag(&tag).await;
            print_json(&serde_json::json!({ "tag": tag, "removed": removed }))?;
            print_success(&format!("invalidated {removed} key(s) tagged '{tag}'"));
        }
        Commands::Flush => {
            let tiers = app.cache.flush().await;
            print_json(&serde_json::json!({ "tiersCleared": tiers }))?;
            print_success(&format!("cleared {tiers} tier(s)"));
        }
        Commands::Summary => {
            let summary = app.gate.logger().summarize().await?;
            print_json(&summary)?;
        }
        Commands::Evaluate(args) => {
            let request = build_request(args)?;
            let decision = app.gate.evaluate(&request).await;
            print_json(&serde_json::json!({
                "status": decision.http_status(),
                "decision": decision,
            }))?;
        }
        Commands::Unblock { ip } => {
            let was_blacklisted = app.gate.unblock(&ip).await?;
            print_json(&serde_json::json!({ "ip": ip, "wasBlacklisted": was_blacklisted }))?;
            if was_blacklisted {
                print_success(&format!("{ip} removed from blacklist"));
            } else {
                eprintln!("{} {ip} was not blacklisted", "!".yellow());
            }
        }
    }
    Ok(())
}

fn build_request(args: EvaluateArgs) -> Result<RequestContext> {
    let mut request = RequestContext::new(args.ip)
        .with_class(args.class)
        .with_uri(args.uri)
        .with_method(args.method);
    if let Some(user_agent) = args.user_agent {
        request = request.with_user_agent(user_agent);
    }
    if let Some(body) = args.body {
        request = request.with_body(body);
    }
    for header in &args.headers {
        let Some((name, value)) = header.split_once(':') else {
            bail!("invalid header '{header}', expected NAME:VALUE");
        };
        request = request.with_header(name.trim(), value.trim());
    }
    Ok(request)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_success(msg: &str) {
    eprintln!("{} {}", "✓".green(), msg);
}
