use std::sync::Arc;

use color_eyre::Result;
use mqtt_poly::config;
use mqtt_poly::controller::ControllerHandle;
use mqtt_poly::devices::DeviceTypeRegistry;
use mqtt_poly::host::{LocalHost, ParamStore};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let params = config::params_path();
    info!("Using parameters from {}", params.display());

    let (host, events) = LocalHost::new(ParamStore::File(params));
    let host = Arc::new(host);

    let handle = ControllerHandle::spawn(
        host.clone(),
        events,
        Arc::new(DeviceTypeRegistry::builtin()),
    );

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut hangup = signal(SignalKind::hangup())?;
        let host = host.clone();
        tokio::spawn(async move {
            while hangup.recv().await.is_some() {
                info!("SIGHUP received, rediscovering");
                if let Err(err) = host.request_discover() {
                    warn!("Unable to request discovery: {err}");
                }
            }
        });
    }

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Interrupted, shutting down");
            handle.shutdown();
        }
        _ = handle.stopped() => {}
    }

    info!("Bridge stopped");
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|level| level.parse::<Level>().ok())
        .unwrap_or(Level::INFO);

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
