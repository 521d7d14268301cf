use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use shiftd::compactor;
use shiftd::config::Config;
use shiftd::directory::StaticDirectory;
use shiftd::engine::Scheduler;
use shiftd::store::WalShiftStore;
use shiftd::wire;

/// Counts a connection as active until dropped, including on panic.
struct ActiveConnection;

impl ActiveConnection {
    fn open() -> Self {
        metrics::gauge!(shiftd::observability::CONNECTIONS_ACTIVE).increment(1.0);
        Self
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        metrics::gauge!(shiftd::observability::CONNECTIONS_ACTIVE).decrement(1.0);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    shiftd::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let directory = match &config.employees_file {
        Some(path) => StaticDirectory::from_json_file(path)?,
        None => StaticDirectory::default(),
    };
    let store = Arc::new(WalShiftStore::open(config.wal_path())?);
    tokio::spawn(compactor::run_compactor(store.clone(), config.compact_threshold));
    let scheduler = Arc::new(Scheduler::new(store, Arc::new(directory.clone()), config.utc_offset));

    let max_connections = config.max_connections;
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("shiftd listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  employees: {}", directory.len());
    info!("  utc_offset: {}", config.utc_offset);
    info!("  max_connections: {max_connections}");
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight connections
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(shiftd::observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(shiftd::observability::CONNECTIONS_TOTAL).increment(1);
                let active = ActiveConnection::open();
                let scheduler = scheduler.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    let _active = active;
                    if let Err(e) = wire::process_connection(socket, scheduler).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    info!("connection from {peer} closed");
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    // Wait for in-flight connections to finish (up to 10s)
    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(std::time::Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
        }
    }

    info!("shiftd stopped");
    Ok(())
}
