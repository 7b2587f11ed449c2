//! Addressable processing units and socket session tracking.
//!
//! A [`ProcessingUnit`] is a Tokio task that owns one [`Dispatcher`] and the set of
//! open socket connections for a logical server name. Callers reach it through a
//! cloneable [`UnitHandle`]; commands are handled strictly one at a time, which is
//! the only synchronization the connection set needs.
//!
//! [`UnitDirectory`] resolves logical names to handles, spawning a unit on first use
//! so every request for the same name lands on the same instance.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::{
    domain::CapabilityRegistry,
    errors::AppError,
    mcp::{
        dispatcher::Dispatcher,
        rpc::{json_rpc_error, json_rpc_notification, PARSE_ERROR},
    },
};

pub const INITIALIZED_NOTIFICATION: &str = "notifications/initialized";

/// Close code sent when a connection is torn down because of a fault.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;
/// Close code recorded when the peer vanished without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

const COMMAND_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Frames the unit pushes to a socket's send loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

enum UnitCommand {
    Dispatch {
        payload: Value,
        reply: oneshot::Sender<Option<Value>>,
    },
    Accept {
        connection: ConnectionId,
        outbound: mpsc::Sender<Outbound>,
    },
    Message {
        connection: ConnectionId,
        text: String,
    },
    Close {
        connection: ConnectionId,
        code: u16,
        reason: String,
    },
    Fault {
        connection: ConnectionId,
        error: String,
    },
    OpenConnections {
        reply: oneshot::Sender<usize>,
    },
}

pub struct ProcessingUnit {
    name: Arc<str>,
    dispatcher: Dispatcher,
    connections: HashMap<ConnectionId, mpsc::Sender<Outbound>>,
}

impl ProcessingUnit {
    /// Spawns the unit on the current runtime and returns its handle.
    pub fn spawn(name: impl Into<Arc<str>>, dispatcher: Dispatcher) -> UnitHandle {
        let name = name.into();
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let unit = Self {
            name: name.clone(),
            dispatcher,
            connections: HashMap::new(),
        };

        tokio::spawn(unit.run(rx));
        UnitHandle { name, tx }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<UnitCommand>) {
        info!(unit = %self.name, "processing unit started");

        while let Some(command) = rx.recv().await {
            match command {
                UnitCommand::Dispatch { payload, reply } => {
                    let _ = reply.send(self.dispatcher.dispatch(payload));
                }
                UnitCommand::Accept {
                    connection,
                    outbound,
                } => self.accept(connection, outbound),
                UnitCommand::Message { connection, text } => self.message(connection, &text),
                UnitCommand::Close {
                    connection,
                    code,
                    reason,
                } => self.close(connection, code, &reason),
                UnitCommand::Fault { connection, error } => self.fault(connection, &error),
                UnitCommand::OpenConnections { reply } => {
                    let _ = reply.send(self.connections.len());
                }
            }
        }

        info!(unit = %self.name, "processing unit stopped");
    }

    fn accept(&mut self, connection: ConnectionId, outbound: mpsc::Sender<Outbound>) {
        self.connections.insert(connection, outbound);
        info!(
            unit = %self.name,
            connection = %connection,
            open = self.connections.len(),
            "socket session opened"
        );

        let notification = json_rpc_notification(INITIALIZED_NOTIFICATION);
        self.send(connection, Outbound::Text(notification.to_string()));
    }

    fn message(&mut self, connection: ConnectionId, text: &str) {
        if !self.connections.contains_key(&connection) {
            debug!(unit = %self.name, connection = %connection, "dropping message for closed session");
            return;
        }

        let payload: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    unit = %self.name,
                    connection = %connection,
                    error = %err,
                    "invalid JSON frame"
                );
                let response = json_rpc_error(None, PARSE_ERROR, "Parse error");
                self.send(connection, Outbound::Text(response.to_string()));
                return;
            }
        };

        if let Some(response) = self.dispatcher.dispatch(payload) {
            self.send(connection, Outbound::Text(response.to_string()));
        }
    }

    fn close(&mut self, connection: ConnectionId, code: u16, reason: &str) {
        if self.connections.remove(&connection).is_some() {
            info!(
                unit = %self.name,
                connection = %connection,
                code,
                reason = %reason,
                open = self.connections.len(),
                "socket session closed"
            );
        }
    }

    fn fault(&mut self, connection: ConnectionId, error: &str) {
        let Some(outbound) = self.connections.remove(&connection) else {
            return;
        };

        warn!(
            unit = %self.name,
            connection = %connection,
            error = %error,
            open = self.connections.len(),
            "socket session failed"
        );

        let _ = outbound.try_send(Outbound::Close {
            code: CLOSE_INTERNAL_ERROR,
            reason: "Internal error".to_string(),
        });
    }

    fn send(&mut self, connection: ConnectionId, frame: Outbound) {
        let Some(outbound) = self.connections.get(&connection) else {
            return;
        };

        if let Err(err) = outbound.try_send(frame) {
            self.fault(connection, &format!("outbound queue unavailable: {err}"));
        }
    }
}

/// Cheap, cloneable address of a running [`ProcessingUnit`].
#[derive(Clone)]
pub struct UnitHandle {
    name: Arc<str>,
    tx: mpsc::Sender<UnitCommand>,
}

impl UnitHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs one envelope through the unit's dispatcher.
    pub async fn dispatch(&self, payload: Value) -> Result<Option<Value>, AppError> {
        let (reply, response) = oneshot::channel();
        self.submit(UnitCommand::Dispatch { payload, reply }).await?;
        response.await.map_err(|_| self.unavailable())
    }

    pub async fn accept(
        &self,
        connection: ConnectionId,
        outbound: mpsc::Sender<Outbound>,
    ) -> Result<(), AppError> {
        self.submit(UnitCommand::Accept {
            connection,
            outbound,
        })
        .await
    }

    pub async fn deliver(&self, connection: ConnectionId, text: String) -> Result<(), AppError> {
        self.submit(UnitCommand::Message { connection, text }).await
    }

    pub async fn close(
        &self,
        connection: ConnectionId,
        code: u16,
        reason: impl Into<String>,
    ) -> Result<(), AppError> {
        self.submit(UnitCommand::Close {
            connection,
            code,
            reason: reason.into(),
        })
        .await
    }

    pub async fn fault(
        &self,
        connection: ConnectionId,
        error: impl Into<String>,
    ) -> Result<(), AppError> {
        self.submit(UnitCommand::Fault {
            connection,
            error: error.into(),
        })
        .await
    }

    pub async fn open_connections(&self) -> Result<usize, AppError> {
        let (reply, count) = oneshot::channel();
        self.submit(UnitCommand::OpenConnections { reply }).await?;
        count.await.map_err(|_| self.unavailable())
    }

    async fn submit(&self, command: UnitCommand) -> Result<(), AppError> {
        self.tx.send(command).await.map_err(|_| self.unavailable())
    }

    fn unavailable(&self) -> AppError {
        AppError::internal(format!("processing unit {} is unavailable", self.name))
    }
}

/// Maps logical server names to their processing units.
#[derive(Clone)]
pub struct UnitDirectory {
    registry: Arc<CapabilityRegistry>,
    units: Arc<Mutex<HashMap<String, UnitHandle>>>,
    next_connection: Arc<AtomicU64>,
}

impl UnitDirectory {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            registry,
            units: Arc::new(Mutex::new(HashMap::new())),
            next_connection: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Returns the unit for `name`, spawning it if this is the first request.
    pub fn resolve(&self, name: &str) -> UnitHandle {
        let mut units = self
            .units
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(handle) = units.get(name).filter(|handle| !handle.tx.is_closed()) {
            return handle.clone();
        }

        let handle = ProcessingUnit::spawn(name, Dispatcher::new(self.registry.clone()));
        units.insert(name.to_string(), handle.clone());
        handle
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed))
    }
}
