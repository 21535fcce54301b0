//! Gatekeeper - ownership claims and approvals for NSQ topics and channels

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gatekeeper::{
    broker::{Broker, MemoryBroker, NsqBroker},
    config::Args,
    db::{MongoClient, MongoJournal},
    registry::spawn_sync_task,
    server,
    store::{Journal, NullJournal},
    Gatekeeper,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("gatekeeper={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Gatekeeper - NSQ ownership & approvals");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("nsqlookupd: {}", args.lookupd_url);
    info!(
        "MongoDB: {}",
        if args.mongodb_uri.is_some() { args.mongodb_db.as_str() } else { "disabled" }
    );
    info!("Broker sync: every {}s", args.sync_interval_secs);
    info!("======================================");

    let journal = open_journal(&args).await?;
    let broker = open_broker(&args).await?;
    let sessions = args.session_issuer()?;

    let gatekeeper = Arc::new(Gatekeeper::new(
        journal.clone(),
        broker.clone(),
        sessions,
        args.reset_token_ttl_secs,
    ));

    let snapshot = journal.load().await?;
    gatekeeper.hydrate(snapshot);

    let boot = gatekeeper
        .bootstrap(&args.root_username, args.root_password.as_deref())
        .await?;
    if let Some(password) = &boot.generated_password {
        warn!(
            "Generated password for root account '{}': {} (shown once, change it)",
            boot.root_user.username, password
        );
    }

    if args.sync_interval_secs > 0 {
        spawn_sync_task(
            gatekeeper.registry().clone(),
            broker,
            Duration::from_secs(args.sync_interval_secs),
        );
        info!("Broker sync task started");
    } else if let Err(e) = gatekeeper
        .registry()
        .sync_from_broker(gatekeeper.broker().as_ref())
        .await
    {
        warn!("Initial broker sync failed: {}", e);
    }

    let state = Arc::new(server::AppState::new(args, gatekeeper));
    server::run(state).await?;
    Ok(())
}

/// MongoDB journal when configured, otherwise state lives in memory only
async fn open_journal(args: &Args) -> anyhow::Result<Arc<dyn Journal>> {
    let Some(uri) = args.mongodb_uri.as_deref() else {
        warn!("No MONGODB_URI configured - state will not survive a restart");
        return Ok(Arc::new(NullJournal));
    };

    match MongoClient::new(uri, &args.mongodb_db).await {
        Ok(client) => {
            info!("MongoDB connected successfully");
            Ok(Arc::new(MongoJournal::open(&client).await?))
        }
        Err(e) if args.dev_mode => {
            warn!("MongoDB connection failed (dev mode, continuing without): {}", e);
            Ok(Arc::new(NullJournal))
        }
        Err(e) => {
            error!("MongoDB connection failed: {}", e);
            Err(e.into())
        }
    }
}

/// NSQ broker; in dev mode an unreachable lookupd falls back to the
/// in-memory broker
async fn open_broker(args: &Args) -> anyhow::Result<Arc<dyn Broker>> {
    let nsq = NsqBroker::new(&args.lookupd_url, args.broker_timeout())?;
    if !args.dev_mode {
        return Ok(Arc::new(nsq));
    }

    match nsq.list_topics().await {
        Ok(topics) => {
            info!("nsqlookupd reachable ({} topics)", topics.len());
            Ok(Arc::new(nsq))
        }
        Err(e) => {
            warn!("nsqlookupd unreachable (dev mode, using in-memory broker): {}", e);
            Ok(Arc::new(MemoryBroker::new()))
        }
    }
}
