//! TCP accept loop and graceful shutdown
//!
//! Accepts peers, runs each connection under the worker budget and, on
//! shutdown, gives in-flight connections a bounded grace period to drain
//! before aborting them.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use socket2::SockRef;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::AppError;
use crate::handler::{handle_connection, ConnectionSettings};

/// Worker slots taken by one connection: its reader and its writer
const SLOTS_PER_CONNECTION: u32 = 2;

/// The relay server
pub struct ChatServer {
    listener: TcpListener,
    config: Config,
    dispatcher: Dispatcher,
    workers: Arc<Semaphore>,
}

impl ChatServer {
    /// Bind the listening socket described by `config`
    pub async fn bind(config: Config) -> Result<Self, AppError> {
        config.validate()?;
        let listener = TcpListener::bind(config.bind_addr()).await?;
        let permits = config.worker_pool_size().min(Semaphore::MAX_PERMITS);
        Ok(Self {
            listener,
            dispatcher: Dispatcher::new(),
            workers: Arc::new(Semaphore::new(permits)),
            config,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Run the accept loop until `shutdown` is cancelled or accepting keeps
    /// failing, then drain and stop every connection.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            "Relay listening on {}, maximum nr. of connections={}",
            self.local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| self.config.bind_addr()),
            self.config.max_connections
        );

        let mut tasks = JoinSet::new();
        let mut failures: u32 = 0;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, no longer accepting connections");
                    break;
                }

                res = self.listener.accept() => match res {
                    Ok((stream, addr)) => {
                        failures = 0;
                        debug!("New TCP connection from {}", addr);
                        tasks.spawn(serve(
                            stream,
                            addr,
                            self.dispatcher.clone(),
                            Arc::clone(&self.workers),
                            self.config.connection_settings(),
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => {
                        failures += 1;
                        error!("Failed to accept connection: {} ({} in a row)", e, failures);
                        if failures >= self.config.max_accept_failures {
                            error!("Too many accept failures, shutting down");
                            break;
                        }
                    }
                },

                Some(res) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = res {
                        if e.is_panic() {
                            error!("A connection handler panicked: {:?}", e);
                        }
                    }
                }
            }
        }

        shutdown.cancel();
        drain(tasks, self.config.shutdown_grace()).await;
        info!("Relay stopped");
    }
}

/// Run one accepted connection once worker slots are available
async fn serve(
    stream: TcpStream,
    addr: SocketAddr,
    dispatcher: Dispatcher,
    workers: Arc<Semaphore>,
    settings: ConnectionSettings,
    shutdown: CancellationToken,
) {
    if workers.available_permits() < SLOTS_PER_CONNECTION as usize {
        info!("Connection from {} waiting for a free worker slot", addr);
    }
    let permit = tokio::select! {
        permit = workers.acquire_many_owned(SLOTS_PER_CONNECTION) => permit,
        _ = shutdown.cancelled() => return,
    };
    let Ok(_permit) = permit else {
        return;
    };

    if let Err(e) = configure_socket(&stream) {
        debug!("Failed to configure socket for {}: {}", addr, e);
    }
    let identifier = format!("{}:{}", addr.ip(), addr.port());
    let (reader, writer) = stream.into_split();

    if let Err(e) = handle_connection(reader, writer, identifier, dispatcher, settings, &shutdown).await {
        warn!("Connection from {} terminated unexpectedly: {}", addr, e);
    }
}

/// TCP_NODELAY for prompt line delivery, SO_KEEPALIVE to notice dead peers
fn configure_socket(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;
    SockRef::from(stream).set_keepalive(true)
}

/// Wait up to `grace` for connections to finish, then abort the rest
async fn drain(mut tasks: JoinSet<()>, grace: std::time::Duration) {
    if tasks.is_empty() {
        return;
    }
    info!("Waiting up to {:?} for {} connection(s) to drain", grace, tasks.len());

    let drained = tokio::time::timeout(grace, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;

    match drained {
        Ok(()) => info!("All client connections closed"),
        Err(_) => {
            warn!("Grace period elapsed, aborting {} connection(s)", tasks.len());
            tasks.shutdown().await;
        }
    }
}
