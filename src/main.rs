pub mod boot;
pub mod config;
pub mod gpio;
pub mod mqtt;
pub mod network;
pub mod persistence;

use crate::boot::{Bootstrapper, LoopReady};
use crate::mqtt::mqtt_handler::MessageHandler;
use crate::persistence::config_store::ConfigStore;
use color_eyre::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

fn main() -> Result<()> {
    setup()?;
    info!("Starting ledcontroller {}", env!("CARGO_PKG_VERSION"));

    // Bring-up order is fixed; any failure ends the process here.
    let config_path = ConfigStore::default_path()?;
    let boot = Bootstrapper::create(config_path)
        .init_storage()?
        .init_netif()?;
    let (boot, runtime) = boot.create_event_loop()?;

    runtime.block_on(run(boot))
}

async fn run(boot: Bootstrapper<LoopReady>) -> Result<()> {
    let boot = boot.establish_link().await?;
    let (boot, pin) = boot.configure_output(gpio::open_rppal)?;
    let config = boot.into_config();

    let shutdown = CancellationToken::new();
    let session = mqtt::session::connect(
        &config.broker,
        MessageHandler::new(config.topic.path.clone()),
        pin,
        shutdown.clone(),
    )?;

    let stop = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested");
                stop.cancel();
            }
            Err(e) => error!("Unable to listen for shutdown signal: {}", e),
        }
    });

    session.join().await?;
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    setup_logging_env(log_level());
    Ok(())
}

/// `RUST_LOG` is honoured when it names a single level.
fn log_level() -> Level {
    std::env::var("RUST_LOG")
        .ok()
        .and_then(|value| value.parse::<Level>().ok())
        .unwrap_or(Level::INFO)
}

fn setup_logging_env(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
