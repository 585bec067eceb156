//! Supervisor: starts the configured endpoints and the projector, wires
//! them to one dispatcher, and shuts everything down on signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::{Config, RunMode};
use crate::dispatcher::Dispatcher;
use crate::error::PduResult;
use crate::projector::{GpioBackend, Projector, SimGpio};
use crate::state::PduStateManager;
use crate::transport::{SerialEndpoint, UdpEndpoint};

/// Tasks get this long to observe shutdown before they are aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Run with the in-process expander bank. Harnesses with a real driver
/// plug it in through [`run_with_backend`].
pub async fn run(config: Config) -> PduResult<()> {
    run_with_backend(config, SimGpio::new()).await
}

pub async fn run_with_backend<B>(config: Config, backend: B) -> PduResult<()>
where
    B: GpioBackend + 'static,
{
    let state = Arc::new(PduStateManager::new());
    let dispatcher = Arc::new(Dispatcher::new(
        state.clone(),
        config.mode == RunMode::Simulator,
    ));

    let (shutdown_tx, _) = watch::channel(false);
    let serial_cancel = Arc::new(AtomicBool::new(false));
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    // Failing to bind or open the initial transports is fatal; everything
    // after this point retries instead of exiting.
    let udp = UdpEndpoint::bind(config.bind_addr(), dispatcher.clone()).await?;
    tasks.push(tokio::spawn(udp.run(shutdown_tx.subscribe())));

    if let Some(path) = config.rs422_port.clone() {
        let serial = SerialEndpoint::open(
            path,
            config.rs422_baud,
            config.serial_apid,
            dispatcher.clone(),
            serial_cancel.clone(),
        )?;
        tasks.push(tokio::task::spawn_blocking(move || serial.run()));
    }

    if config.mode == RunMode::Emulator {
        let mut projector = Projector::new(state.clone(), backend, config.projector_period);
        projector.configure()?;
        tasks.push(tokio::spawn(projector.run(shutdown_tx.subscribe())));
    }

    info!(mode = ?config.mode, "PDU supervisor up, both units in Boot");
    wait_for_signal().await;
    info!("shutdown requested");

    let _ = shutdown_tx.send(true);
    serial_cancel.store(true, Ordering::Relaxed);
    for mut task in tasks {
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
            task.abort();
        }
    }
    info!("PDU supervisor stopped");
    Ok(())
}

async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        // Without a signal handler the process can only be killed hard
        error!(error = %e, "failed to install shutdown signal handler");
        std::future::pending::<()>().await;
    }
}
