//! Fingerlock Daemon - Main entry point
//!
//! Runs one verification session against the system's fprintd until a
//! finger matches or the process is interrupted. `SIGUSR1` reports user
//! activity, `SIGUSR2` additionally forces a restart.

use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fingerlock_core::SystemClock;
use fingerlock_daemon::fprintd::{LogindSleep, ZbusConnector};
use fingerlock_daemon::{
    Collaborators, CommandReset, DaemonConfig, LogSink, RecoveryController, Session, SleepSource,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fingerlock_daemon=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Fingerlock daemon v{}", env!("CARGO_PKG_VERSION"));

    let config_path = DaemonConfig::default_path();
    let config = DaemonConfig::load_or_create(&config_path)?;
    info!("Using config {:?}", config_path);

    let clock = Arc::new(SystemClock);
    let recovery = Arc::new(RecoveryController::new(
        config.recovery,
        Arc::new(CommandReset::new(config.reset.clone())),
        clock.clone(),
    ));
    let sleep: Arc<dyn SleepSource> = Arc::new(LogindSleep::new());

    let mut session = Session::new(
        config.session.clone(),
        Collaborators {
            connector: Arc::new(ZbusConnector::new()),
            recovery,
            clock,
            sleep: Some(sleep),
        },
    );
    session.init(Arc::new(LogSink)).await;

    let mut activity = signal(SignalKind::user_defined1())?;
    let mut forced = signal(SignalKind::user_defined2())?;
    let mut ticker = tokio::time::interval(config.poll_interval());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                session.deinit();
                break;
            }
            _ = activity.recv() => session.set_restart_flag(false),
            _ = forced.recv() => session.set_restart_flag(true),
            _ = ticker.tick() => {
                if session.verify().await {
                    info!("Fingerprint matched");
                    session.deinit();
                    break;
                }
            }
        }
    }

    info!("Daemon shutting down");

    Ok(())
}
