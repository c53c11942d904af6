use clap::{
    Parser,
    Subcommand,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use std::path::{
    Path,
    PathBuf,
};
use tictac_sync::{
    chain::GameAccounts,
    config::SessionConfig,
    connector::Connector,
    control_plane::HttpControlPlaneFactory,
    ledger::DetachedProgram,
    notify::TracingNotifier,
    session::RemoteSession,
    types::{
        Address,
        Signature,
    },
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
    prelude::*,
};

#[derive(Parser, Debug)]
#[command(
    name = "tictac-sync",
    about = "Observe and administer an on-chain tic-tac-toe game and its control plane",
    version
)]
struct Args {
    /// JSON session config; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Control plane host
    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    modern_port: Option<u16>,

    #[arg(long)]
    legacy_port: Option<u16>,

    /// Ledger JSON-RPC URL
    #[arg(long)]
    rpc_url: Option<String>,

    /// Ledger pubsub WebSocket URL
    #[arg(long)]
    ws_url: Option<String>,

    /// Snapshot isolation group
    #[arg(long)]
    group: Option<String>,

    #[arg(long)]
    program_id: Option<Address>,

    #[arg(long)]
    game: Option<Address>,

    #[arg(long)]
    player_one: Option<Address>,

    #[arg(long)]
    player_two: Option<Address>,

    /// Also write logs to daily-rotated files in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Negotiate with the control plane and report the tier
    Probe,
    /// Print the current game state
    State,
    /// Snapshot both players and the game account
    Snapshot,
    /// Restore (and consume) the latest snapshot of the group
    Restore,
    /// Delete every snapshot of the group
    Cleanup,
    /// Attach a label to a transaction
    Label { signature: String, label: String },
    /// Airdrop the configured amount to an address
    Fund { address: Address },
    /// Print the lamport balance of an address
    Balance { address: Address },
    /// Stream game state and player balance changes until interrupted
    Watch,
}

fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = fmt::layer().with_writer(std::io::stderr);
    match log_dir {
        Some(dir) => {
            let (writer, guard) =
                tracing_appender::non_blocking(rolling::daily(dir, "tictac-sync.log"));
            let file = fmt::layer().with_ansi(false).with_writer(writer);
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(file)
                .try_init();
            Some(guard)
        }
        None => {
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .try_init();
            None
        }
    }
}

fn session_config(args: &Args) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)
            .wrap_err_with(|| format!("loading config {}", path.display()))?,
        None => SessionConfig::default(),
    };
    if let Some(host) = &args.host {
        config.control_plane.host = host.clone();
    }
    if let Some(port) = args.modern_port {
        config.control_plane.modern_port = port;
    }
    if let Some(port) = args.legacy_port {
        config.control_plane.legacy_port = port;
    }
    if let Some(url) = &args.rpc_url {
        config.ledger.rpc_url = url.clone();
    }
    if let Some(url) = &args.ws_url {
        config.ledger.ws_url = url.clone();
    }
    if let Some(group) = &args.group {
        config.isolation_group = group.clone();
    }
    if args.program_id.is_some() {
        config.program_id = args.program_id;
    }
    if let (Some(game), Some(player_one), Some(player_two)) =
        (args.game, args.player_one, args.player_two)
    {
        config.game = Some(GameAccounts {
            game,
            player_one,
            player_two,
        });
    }
    Ok(config)
}

async fn probe(config: &SessionConfig) -> Result<()> {
    let connector = Connector::new(
        HttpControlPlaneFactory::new(config.request_timeout()),
        TracingNotifier,
        config.modern_endpoint(),
        config.legacy_endpoint(),
    );
    let connection = connector.get_connection().await?;
    println!("{} ({:?})", connection.endpoint(), connection.tier());
    Ok(())
}

async fn connect(config: &SessionConfig) -> Result<RemoteSession<TracingNotifier, DetachedProgram>> {
    RemoteSession::connect(config, TracingNotifier, DetachedProgram)
        .await
        .wrap_err("starting session")
}

async fn watch(session: &RemoteSession<TracingNotifier, DetachedProgram>) -> Result<()> {
    let accounts = *session.accounts();
    let _game = session
        .subscribe_game_state(|state| println!("{state}"))
        .await
        .wrap_err("subscribing to game account")?;
    let mut balances = Vec::new();
    for (name, address) in [("player one", accounts.player_one), ("player two", accounts.player_two)]
    {
        let handle = session
            .subscribe_balance(&address, move |lamports| {
                println!("{name} {address}: {lamports} lamports")
            })
            .await
            .wrap_err_with(|| format!("subscribing to {name} balance"))?;
        balances.push(handle);
    }
    tracing::info!("watching game {}, press ctrl-c to stop", accounts.game);
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("received interrupt, releasing subscriptions"),
        Err(err) => tracing::warn!(%err, "interrupt handler failed, exiting anyway"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    let _log_guard = init_tracing(args.log_dir.as_deref());
    let config = session_config(&args)?;

    match args.command {
        Command::Probe => probe(&config).await?,
        Command::State => {
            let session = connect(&config).await?;
            let state = session.fetch_game_state().await?;
            println!("{state}");
        }
        Command::Snapshot => {
            let session = connect(&config).await?;
            let snapshot_id = session.take_snapshot().await?;
            println!("{snapshot_id}");
        }
        Command::Restore => {
            let session = connect(&config).await?;
            let restored = session.restore_last_updated_snapshot().await?;
            println!(
                "restored {} ({} accounts)",
                restored.snapshot_id,
                restored.restored_accounts.len()
            );
        }
        Command::Cleanup => {
            let session = connect(&config).await?;
            let deleted = session.delete_app_snapshots().await?;
            println!("deleted {} snapshots", deleted.deleted.len());
        }
        Command::Label { signature, label } => {
            connect(&config)
                .await?
                .label_transaction(&Signature::new(signature), &label)
                .await?;
        }
        Command::Fund { address } => {
            let session = connect(&config).await?;
            let signature = session.fund_account(&address).await?;
            println!("{signature}");
        }
        Command::Balance { address } => {
            let session = connect(&config).await?;
            let lamports = session.get_account_funds(&address).await?;
            println!("{lamports}");
        }
        Command::Watch => watch(&connect(&config).await?).await?,
    }
    Ok(())
}
