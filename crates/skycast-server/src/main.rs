mod web;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use skycast_config::{find_config_path, load, mask_secret, Config};
use skycast_core::cron::{CronService, DailySchedule};
use skycast_core::llm::selector::detect_provider;
use skycast_core::service::DAILY_JOB_ID;
use skycast_core::tools::build_tools;
use skycast_core::{DailyReportJob, RunError, WeatherService};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "skycast", about = "Daily city weather report agent", version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server and the daily scheduler (default)
    Serve,
    /// Run one report cycle now and print the result
    Trigger,
    /// Discover and list the available tools
    Tools,
    /// Show the effective configuration
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let base_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = format!("{base_filter},skycast_core::agent=debug");
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(find_config_path);
    let config = load(&config_path)?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_serve(config).await,
        Commands::Trigger => run_trigger(&config).await,
        Commands::Tools => run_tools(&config).await,
        Commands::Status => {
            run_status(&config_path, &config);
            Ok(())
        }
    }
}

async fn run_serve(config: Config) -> Result<()> {
    info!("=== Starting weather push agent ===");
    let service = Arc::new(
        WeatherService::bootstrap(&config)
            .await
            .context("failed to initialize weather service")?,
    );
    info!(
        "Tools: {}\n{}",
        service.tools().names().join(", "),
        service.tools().describe()
    );

    let mut cron = CronService::new();
    if config.schedule.enabled {
        let schedule = DailySchedule::from_config(&config.schedule)?;
        cron.schedule_daily(
            DAILY_JOB_ID,
            schedule,
            Arc::new(DailyReportJob::new(service.clone())),
        );
        cron.start();
        info!(
            "Daily push scheduled: city={} at {:02}:{:02} ({})",
            service.target_city(),
            config.schedule.hour,
            config.schedule.minute,
            config.schedule.timezone
        );
    } else {
        warn!("Daily schedule disabled; reports run only on manual trigger");
    }

    let addr: SocketAddr = format!("{}:{}", config.gateway.host, config.gateway.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid gateway listen address: {e}"))?;

    let result = web::serve(service, addr, shutdown_signal()).await;

    cron.stop();
    info!("=== Weather push agent stopped ===");
    result
}

async fn run_trigger(config: &Config) -> Result<()> {
    let service = WeatherService::bootstrap(config)
        .await
        .context("failed to initialize weather service")?;

    match service.run_cycle().await {
        Ok(run) => {
            println!("{}", run.final_message);
            println!();
            println!("Tools used: {}", run.tools_used().join(", "));
            Ok(())
        }
        Err(RunError::Failed { error, run }) => {
            println!("{}", run.final_message);
            println!();
            println!("Tools used: {}", run.tools_used().join(", "));
            Err(anyhow::anyhow!(error).context("weather report run failed"))
        }
        Err(e) => Err(e.into()),
    }
}

async fn run_tools(config: &Config) -> Result<()> {
    let tools = build_tools(&config.tools)
        .await
        .context("tool discovery failed")?;
    println!("{} tool(s):", tools.len());
    for tool in tools.list() {
        println!("  {:<24} {}", tool.name(), tool.description());
    }
    Ok(())
}

fn run_status(config_path: &Path, config: &Config) {
    println!("skycast status");
    println!();

    if config_path.exists() {
        println!("  Config:    {} (found)", config_path.display());
    } else {
        println!("  Config:    {} (not found, using defaults)", config_path.display());
    }
    println!("  City:      {}", config.agent.target_city);
    println!();

    let provider = config
        .providers
        .default_provider
        .as_deref()
        .unwrap_or_else(|| detect_provider(&config.providers));
    println!("  Provider:  {provider}");
    for (name, p) in [("qwen", &config.providers.qwen), ("gemini", &config.providers.gemini)] {
        println!(
            "    {name:<7} key={} model={}",
            mask_secret(p.key().unwrap_or_default()),
            p.model.as_deref().unwrap_or("(default)")
        );
    }
    println!();

    println!("  Tools:");
    println!("    AMap MCP:      {}", config.tools.amap.mcp_url);
    println!(
        "    AMap key:      {}",
        mask_secret(config.tools.amap.api_key.as_deref().unwrap_or_default())
    );
    println!(
        "    Feishu hook:   {}",
        match config.tools.feishu.webhook_url.as_deref() {
            Some(url) if !url.is_empty() => "configured",
            _ => "not configured",
        }
    );
    println!();

    let schedule = &config.schedule;
    if schedule.enabled {
        match DailySchedule::from_config(schedule) {
            Ok(daily) => {
                let next = daily
                    .next_fire_after(chrono::Utc::now())
                    .map(|t| t.with_timezone(&daily.timezone()).to_string())
                    .unwrap_or_else(|e| format!("unavailable ({e})"));
                println!(
                    "  Schedule:  daily {:02}:{:02} {} (next: {next})",
                    schedule.hour, schedule.minute, schedule.timezone
                );
            }
            Err(e) => println!("  Schedule:  invalid ({e})"),
        }
    } else {
        println!("  Schedule:  disabled");
    }
    println!(
        "  Gateway:   http://{}:{}",
        config.gateway.host, config.gateway.port
    );
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_is_the_default_command() {
        let cli = Cli::try_parse_from(["skycast"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from(["skycast", "status", "--config", "/tmp/c.json"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Status)));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.json")));
    }
}
