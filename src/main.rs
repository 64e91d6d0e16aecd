//! Deal watcher CLI

use anyhow::Result;
use clap::{Parser, Subcommand};
use dealwatch::{
    evaluate, ApiClient, ApiError, Config, LogNotifier, Monitor, Notifier, OtpAuthenticator,
    SessionStore, StdinPrompt, TelegramNotifier,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "dealwatch")]
#[command(about = "Watches a cashback marketplace for deals worth taking")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch continuously and alert on fresh qualifying offers
    Run,

    /// Create a session interactively (phone number + OTP)
    Login,

    /// Fetch once, apply the thresholds, and print what qualifies
    Scan,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    // Load configuration
    let config = Config::from_env()?;

    match cli.command {
        Commands::Run => run_watcher(config).await,
        Commands::Login => login(&config).await,
        Commands::Scan => scan(&config).await,
    }
}

async fn run_watcher(config: Config) -> Result<()> {
    let client = ApiClient::new(&config.api_base_url);

    let notifier: Box<dyn Notifier> = if config.notify.enabled {
        Box::new(TelegramNotifier::from_config(&config.notify)?)
    } else {
        Box::new(LogNotifier)
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    spawn_signal_listener(shutdown.clone());

    let mut sessions = SessionStore::new(&config.session_file);
    let mut auth = OtpAuthenticator::new(client.clone(), StdinPrompt);

    let monitor = Monitor::new(client, notifier, &config, shutdown);
    let exit = monitor.run(&mut sessions, &mut auth).await?;

    if exit.is_fatal() {
        anyhow::bail!("watcher terminated: {exit}");
    }

    Ok(())
}

async fn login(config: &Config) -> Result<()> {
    let client = ApiClient::new(&config.api_base_url);
    let mut sessions = SessionStore::new(&config.session_file);
    let mut auth = OtpAuthenticator::new(client, StdinPrompt);

    match sessions.create(&mut auth).await? {
        Some(_) => {
            println!(
                "Session created and saved to {}",
                config.session_file.display()
            );
            Ok(())
        }
        None => anyhow::bail!("login rejected; no session was created"),
    }
}

async fn scan(config: &Config) -> Result<()> {
    println!("\n{}", "=".repeat(70));
    println!(
        "  DEAL SCAN at {}  |  min earn {} | max pay {} | min earn/pay {}",
        chrono::Utc::now().format("%H:%M:%S"),
        config.thresholds.min_earn,
        config.thresholds.max_pay,
        config.thresholds.min_earn_per_pay
    );
    println!("{}\n", "=".repeat(70));

    let client = ApiClient::new(&config.api_base_url);
    let mut sessions = SessionStore::new(&config.session_file);

    let Some(session) = sessions.load() else {
        anyhow::bail!("no session found; run `dealwatch login` first");
    };

    let deals = match client
        .fetch_deals(&session.access_token, &session.session_key)
        .await
    {
        Ok(deals) => deals,
        Err(ApiError::SessionExpired) => {
            anyhow::bail!("session expired; run `dealwatch login` again")
        }
        Err(err) => return Err(err.into()),
    };

    let evaluation = evaluate(&deals, &config.thresholds, &HashSet::new());

    println!(
        "Fetched {} deal(s); {} pass the thresholds\n",
        deals.len(),
        evaluation.fresh.len()
    );

    if evaluation.fresh.is_empty() {
        println!("Nothing interesting right now.");
        return Ok(());
    }

    for (i, offer) in evaluation.fresh.iter().enumerate() {
        println!(
            "{}. Pay ${:.2} → Earn ${:.2}   [{}]",
            i + 1,
            offer.pay,
            offer.earn,
            offer.id
        );
    }

    Ok(())
}

fn spawn_signal_listener(flag: Arc<AtomicBool>) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received; finishing the current cycle");
        flag.store(true, Ordering::Relaxed);
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
