//! AMQP 1.0 server ingress module.
//!
//! Runs a minimal AMQP server on one dedicated worker thread: the thread owns
//! the listening socket and every live connection, so the whole protocol core
//! runs without locks. Inbound links are mapped to device identities through
//! the endpoint mapping table and each received message is published to the
//! broker tagged with that identity.

mod connection;
mod session;
mod translate;

use crate::broker::{Broker, Envelope};
use crate::modules::mapping::{MappingEntry, MappingTable};
use crate::modules::Module;
use anyhow::{Context, Result};
use connection::{Connection, StepCtx};
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

/// Standard AMQP port the module listens on unless configured otherwise.
pub const DEFAULT_AMQP_PORT: u16 = 5672;

const MODULE_NAME: &str = "amqpserver";
/// Park time for a tick that moved no bytes; bounds idle CPU while keeping
/// shutdown latency within one iteration.
const IDLE_TICK: Duration = Duration::from_millis(1);

/// Handle to a running AMQP server module.
///
/// Stopping is cooperative: `shutdown` (or drop) flips the running flag and
/// joins the worker, which force-closes any remaining connections on its way
/// out.
pub struct AmqpServerModule {
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl AmqpServerModule {
    /// Bind the listener and start the worker thread.
    ///
    /// Fails on invalid mapping configuration, bind failure, or thread-start
    /// failure; nothing keeps running after an error return.
    pub fn spawn(
        broker: Arc<dyn Broker>,
        bind: SocketAddr,
        mappings: Vec<MappingEntry>,
    ) -> Result<Self> {
        let mappings = MappingTable::build(mappings).context("building endpoint mapping table")?;
        let listener = TcpListener::bind(bind).with_context(|| format!("binding {bind}"))?;
        listener
            .set_nonblocking(true)
            .context("setting listener non-blocking")?;
        let local_addr = listener.local_addr().context("reading bound address")?;

        let running = Arc::new(AtomicBool::new(true));
        let worker_state = Worker {
            listener,
            broker,
            mappings,
            connections: Vec::new(),
            running: running.clone(),
            container_id: format!("portico-{}", uuid::Uuid::new_v4()),
        };
        let worker = thread::Builder::new()
            .name("amqp-server".into())
            .spawn(move || worker_state.run())
            .context("spawning amqp server worker thread")?;

        info!(%local_addr, "amqp server module started");
        Ok(Self {
            running,
            worker: Some(worker),
            local_addr,
        })
    }

    /// Address the listener actually bound; tests bind port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signal the worker to stop and wait for it to exit.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("amqp server worker panicked");
            }
        }
    }
}

impl Drop for AmqpServerModule {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Module for AmqpServerModule {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    /// Ingress-only: messages from the broker are not consumed here.
    fn receive(&self, _envelope: &Envelope) {}
}

/// All worker-owned state, moved into the spawned thread. Single writer of
/// the connection set; no other thread touches it.
struct Worker {
    listener: TcpListener,
    broker: Arc<dyn Broker>,
    mappings: MappingTable,
    connections: Vec<Connection>,
    running: Arc<AtomicBool>,
    container_id: String,
}

impl Worker {
    fn run(mut self) {
        while self.running.load(Ordering::Acquire) {
            let mut activity = self.accept_new();

            let ctx = StepCtx {
                broker: self.broker.as_ref(),
                mappings: &self.mappings,
                container_id: &self.container_id,
            };
            for connection in &mut self.connections {
                activity |= connection.step(&ctx);
            }

            self.connections.retain(|connection| {
                if connection.closed() {
                    info!(peer = %connection.peer(), "connection reclaimed");
                    false
                } else {
                    true
                }
            });

            if !activity {
                thread::sleep(IDLE_TICK);
            }
        }

        for connection in &mut self.connections {
            connection.shutdown();
        }
        let remaining = self.connections.len();
        self.connections.clear();
        info!(remaining, "amqp server worker stopped");
    }

    fn accept_new(&mut self) -> bool {
        let mut any = false;
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => match Connection::accept(stream, peer) {
                    Ok(connection) => {
                        info!(%peer, "client connected");
                        self.connections.push(connection);
                        any = true;
                    }
                    Err(err) => warn!(%peer, "failed to prepare accepted socket: {err}"),
                },
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => {
                    error!("listener accept failed: {err}");
                    break;
                }
            }
        }
        any
    }
}
