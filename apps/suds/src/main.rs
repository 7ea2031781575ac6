use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use suds_client_core::config::ClientConfig;
use suds_client_core::connection::{ConnectionEvent, ConnectionManager, ConnectionState};
use suds_client_core::platform::ProvisionedPlatform;
use suds_client_core::store::{MachineStore, SortKey, TimeBand};
use suds_client_core::watch::{WatchError, WatchManager};
use suds_proto::{FeedFrame, MachineKind, MachineStatus};

#[derive(Parser)]
#[command(name = "suds", about = "Live laundry machine status and completion alerts")]
struct Cli {
    /// Station base URL.
    #[arg(long, env = "SUDS_SERVER", default_value = "http://127.0.0.1:8080")]
    server: String,

    /// Provisioned push destination for this device.
    #[arg(long, env = "SUDS_PUSH_ENDPOINT")]
    push_endpoint: Option<String>,
    #[arg(long, env = "SUDS_PUSH_P256DH")]
    push_p256dh: Option<String>,
    #[arg(long, env = "SUDS_PUSH_AUTH")]
    push_auth: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow the live feed and print the room state as it changes.
    Watch,
    /// Fetch a one-shot snapshot and exit.
    Status,
    /// Get notified when a machine finishes.
    Subscribe { machine_id: String },
    /// Stop watching a machine.
    Unsubscribe { machine_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::new(cli.server.clone());

    match &cli.command {
        Commands::Watch => run_watch(&config).await,
        Commands::Status => run_status(&config).await,
        Commands::Subscribe { machine_id } => run_subscribe(&cli, &config, machine_id).await,
        Commands::Unsubscribe { machine_id } => run_unsubscribe(&cli, &config, machine_id).await,
    }
}

async fn run_watch(config: &ClientConfig) -> anyhow::Result<()> {
    let (manager, mut events) = ConnectionManager::new(config.connection());
    manager.connect();

    let mut store = MachineStore::new();
    let mut exhausted = false;

    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::Open => {
                println!("connected to {}", config.feed_url());
            }
            ConnectionEvent::Snapshot { seq, machines } => {
                if store.replace_all(seq, machines) {
                    print_summary(&store);
                }
            }
            ConnectionEvent::ConnectivityChanged(ConnectionState::Closed) => {
                if exhausted {
                    eprintln!("gave up reconnecting; run `suds watch` to try again");
                } else {
                    eprintln!("channel closed; run `suds watch` to resume");
                }
                break;
            }
            ConnectionEvent::ConnectivityChanged(_) => {
                if store.last_updated().is_some() && !store.is_stale() {
                    store.mark_stale();
                    println!("(connection lost, showing last known state)");
                }
            }
            ConnectionEvent::TransportError(err) => warn!(error = %err, "transport error"),
            ConnectionEvent::ReconnectsExhausted => exhausted = true,
        }
    }
    Ok(())
}

async fn run_status(config: &ClientConfig) -> anyhow::Result<()> {
    let url = format!("{}/api/machines", config.server_url);
    let frame: FeedFrame = reqwest::get(&url)
        .await
        .with_context(|| format!("failed to reach {url}"))?
        .json()
        .await
        .context("station returned an unreadable snapshot")?;

    let FeedFrame::Snapshot { seq, machines } = frame;
    let mut store = MachineStore::new();
    store.replace_all(seq, machines);
    print_summary(&store);
    Ok(())
}

async fn run_subscribe(cli: &Cli, config: &ClientConfig, machine_id: &str) -> anyhow::Result<()> {
    let mut manager = watch_manager(cli, config);
    match manager.subscribe(machine_id).await {
        Ok(()) => {
            println!("you'll be notified when {machine_id} finishes");
            Ok(())
        }
        Err(WatchError::Unsupported) => {
            println!(
                "no push destination is provisioned for this device; \
                 notifications are unavailable (set SUDS_PUSH_ENDPOINT, \
                 SUDS_PUSH_P256DH and SUDS_PUSH_AUTH)"
            );
            Ok(())
        }
        Err(WatchError::PermissionDenied) => {
            println!("notification permission was not granted; not subscribed");
            Ok(())
        }
        Err(err) => Err(err).context("subscribe failed"),
    }
}

async fn run_unsubscribe(cli: &Cli, config: &ClientConfig, machine_id: &str) -> anyhow::Result<()> {
    let mut manager = watch_manager(cli, config);
    match manager.unsubscribe(machine_id).await {
        Ok(()) => {
            println!("no longer watching {machine_id}");
            Ok(())
        }
        Err(WatchError::Unsupported) => {
            println!("no push destination is provisioned for this device; nothing to do");
            Ok(())
        }
        Err(err) => Err(err).context("unsubscribe failed"),
    }
}

fn watch_manager(cli: &Cli, config: &ClientConfig) -> WatchManager<ProvisionedPlatform> {
    let platform = ProvisionedPlatform::new(
        cli.push_endpoint.clone(),
        cli.push_p256dh.clone(),
        cli.push_auth.clone(),
    );
    WatchManager::new(platform, config.server_url.clone())
}

fn kind_label(kind: MachineKind) -> &'static str {
    match kind {
        MachineKind::Washer => "washer",
        MachineKind::Dryer => "dryer",
    }
}

fn print_summary(store: &MachineStore) {
    let washers = store.count_by_status_and_kind(MachineStatus::Available, MachineKind::Washer);
    let dryers = store.count_by_status_and_kind(MachineStatus::Available, MachineKind::Dryer);
    let updated = store
        .last_updated()
        .map(|at| at.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());

    println!(
        "washers available: {washers} (est. wait {}s) | dryers available: {dryers} (est. wait {}s) | updated {updated}{}",
        store.estimated_wait(MachineKind::Washer),
        store.estimated_wait(MachineKind::Dryer),
        if store.is_stale() { " (stale)" } else { "" },
    );
    for machine in store.sorted_by(SortKey::Id) {
        let band = if machine.is_running() {
            format!(
                " ({})",
                TimeBand::from_seconds(machine.time_remaining_seconds).label()
            )
        } else {
            String::new()
        };
        println!(
            "  {:<12} {:<7} {:<15} {:>5}s{}",
            machine.id,
            kind_label(machine.kind),
            machine.status.as_str(),
            machine.time_remaining_seconds,
            band,
        );
    }
}
