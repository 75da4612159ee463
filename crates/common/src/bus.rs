//! Typed in-process command bus
//!
//! Components exchange [`BusMessage`]s over bounded per-component channels.
//! Commands arrive from the control surface as loosely typed [`RawCommand`]s
//! and are decoded once into [`Command`] at the boundary.

use crate::error::{BusError, Result};
use crate::types::{ConfigId, LocalAggregate};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

pub const ACTIVATE_AGGREGATOR: &str = "ACTIVATE_AGGREGATOR";
pub const DEACTIVATE_AGGREGATOR: &str = "DEACTIVATE_AGGREGATOR";
pub const START_AGGREGATOR_APP: &str = "START_AGGREGATOR_APP";
pub const STOP_AGGREGATOR_APP: &str = "STOP_AGGREGATOR_APP";
pub const REFRESH_AGGREGATOR_APP: &str = "REFRESH_AGGREGATOR_APP";
pub const RENEW_SIGNER: &str = "RENEW_SIGNER";
pub const STREAM_LOCAL_AGGREGATE: &str = "STREAM_LOCAL_AGGREGATE";

/// Bus participants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Component {
    /// Administrative control surface
    Admin,
    Fetcher,
    Aggregator,
}

impl Component {
    pub const ALL: [Component; 3] = [Component::Admin, Component::Fetcher, Component::Aggregator];
}

/// Decoded command, one variant per protocol command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ActivateAggregator { id: ConfigId },
    DeactivateAggregator { id: ConfigId },
    StartAggregatorApp,
    StopAggregatorApp,
    RefreshAggregatorApp,
    RenewSigner,
    StreamLocalAggregate { value: LocalAggregate },
}

impl Command {
    /// Wire name of the command
    pub fn name(&self) -> &'static str {
        match self {
            Command::ActivateAggregator { .. } => ACTIVATE_AGGREGATOR,
            Command::DeactivateAggregator { .. } => DEACTIVATE_AGGREGATOR,
            Command::StartAggregatorApp => START_AGGREGATOR_APP,
            Command::StopAggregatorApp => STOP_AGGREGATOR_APP,
            Command::RefreshAggregatorApp => REFRESH_AGGREGATOR_APP,
            Command::RenewSigner => RENEW_SIGNER,
            Command::StreamLocalAggregate { .. } => STREAM_LOCAL_AGGREGATE,
        }
    }

    /// Every command except the local aggregate stream is administrative.
    pub fn requires_admin(&self) -> bool {
        !matches!(self, Command::StreamLocalAggregate { .. })
    }

    /// Reject commands the sender is not allowed to issue
    pub fn authorize(&self, from: Component) -> Result<()> {
        if self.requires_admin() && from != Component::Admin {
            return Err(BusError::UnauthorizedSender {
                command: self.name().to_string(),
                from,
            });
        }
        Ok(())
    }

    /// Decode a raw command into its typed form
    pub fn decode(raw: &RawCommand) -> Result<Self> {
        let name = raw.command.as_str();
        match name {
            ACTIVATE_AGGREGATOR => Ok(Command::ActivateAggregator {
                id: parse_id(name, &raw.args, "id")?,
            }),
            DEACTIVATE_AGGREGATOR => Ok(Command::DeactivateAggregator {
                id: parse_id(name, &raw.args, "id")?,
            }),
            START_AGGREGATOR_APP => Ok(Command::StartAggregatorApp),
            STOP_AGGREGATOR_APP => Ok(Command::StopAggregatorApp),
            REFRESH_AGGREGATOR_APP => Ok(Command::RefreshAggregatorApp),
            RENEW_SIGNER => Ok(Command::RenewSigner),
            STREAM_LOCAL_AGGREGATE => {
                let value = raw
                    .args
                    .get("value")
                    .ok_or_else(|| BusError::malformed(name, "value", "missing"))?;
                let value = serde_json::from_value(value.clone())
                    .map_err(|e| BusError::malformed(name, "value", e.to_string()))?;
                Ok(Command::StreamLocalAggregate { value })
            }
            other => Err(BusError::UnknownCommand(other.to_string())),
        }
    }
}

fn parse_id(command: &str, args: &Map<String, Value>, param: &str) -> Result<ConfigId> {
    match args.get(param) {
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|v| ConfigId::try_from(v).ok())
            .ok_or_else(|| BusError::malformed(command, param, format!("{} is out of range", n))),
        Some(Value::String(s)) => s
            .trim()
            .parse::<ConfigId>()
            .map_err(|e| BusError::malformed(command, param, e.to_string())),
        Some(other) => Err(BusError::malformed(
            command,
            param,
            format!("expected integer, got {}", other),
        )),
        None => Err(BusError::malformed(command, param, "missing")),
    }
}

/// Untyped command as sent by the control surface
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawCommand {
    pub command: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl RawCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Map::new(),
        }
    }

    pub fn with_arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.args.insert(key.to_string(), value.into());
        self
    }
}

/// Answer to a request-response command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl CommandResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            args: Map::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        let mut args = Map::new();
        args.insert("error".to_string(), Value::String(message.into()));
        Self {
            success: false,
            args,
        }
    }

    /// Error message carried by a failed response
    pub fn error_message(&self) -> Option<&str> {
        self.args.get("error").and_then(Value::as_str)
    }
}

/// Envelope routed by the bus
#[derive(Debug)]
pub struct BusMessage {
    pub from: Component,
    pub to: Component,
    pub command: Command,
    response: Option<oneshot::Sender<CommandResponse>>,
}

impl BusMessage {
    /// Fire-and-forget message
    pub fn new(from: Component, to: Component, command: Command) -> Self {
        Self {
            from,
            to,
            command,
            response: None,
        }
    }

    /// Message whose handler answers on the returned receiver
    pub fn with_response(
        from: Component,
        to: Component,
        command: Command,
    ) -> (Self, oneshot::Receiver<CommandResponse>) {
        let (tx, rx) = oneshot::channel();
        let msg = Self {
            from,
            to,
            command,
            response: Some(tx),
        };
        (msg, rx)
    }

    pub fn expects_response(&self) -> bool {
        self.response.is_some()
    }

    /// Send the response, at most once
    pub fn respond(&mut self, response: CommandResponse) {
        if let Some(tx) = self.response.take() {
            if tx.send(response).is_err() {
                debug!(command = self.command.name(), "Requester dropped response channel");
            }
        }
    }
}

struct BusInner {
    senders: HashMap<Component, mpsc::Sender<BusMessage>>,
    receivers: Mutex<HashMap<Component, mpsc::Receiver<BusMessage>>>,
}

/// Bounded in-process bus with one channel per component
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    pub fn new(capacity: usize) -> Self {
        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();
        for component in Component::ALL {
            let (tx, rx) = mpsc::channel(capacity);
            senders.insert(component, tx);
            receivers.insert(component, rx);
        }
        Self {
            inner: Arc::new(BusInner {
                senders,
                receivers: Mutex::new(receivers),
            }),
        }
    }

    /// Take the receiving end for a component. Only the first call succeeds.
    pub fn subscribe(&self, component: Component) -> Option<mpsc::Receiver<BusMessage>> {
        self.inner.receivers.lock().remove(&component)
    }

    /// Publish without waiting for capacity
    pub fn publish(&self, msg: BusMessage) -> Result<()> {
        let to = msg.to;
        let tx = self
            .inner
            .senders
            .get(&to)
            .ok_or(BusError::NoSubscriber(to))?;
        tx.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => BusError::ChannelFull(to),
            TrySendError::Closed(_) => BusError::NoSubscriber(to),
        })
    }

    /// Publish and wait for the handler's response
    pub async fn request(
        &self,
        from: Component,
        to: Component,
        command: Command,
    ) -> Result<CommandResponse> {
        let (msg, rx) = BusMessage::with_response(from, to, command);
        self.publish(msg)?;
        rx.await.map_err(|_| BusError::ResponseDropped)
    }
}
