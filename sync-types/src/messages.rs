//! Protocol messages for logsync.
//!
//! On the wire every message is an array whose first element is the
//! message type and whose remaining elements are positional arguments:
//!
//! ```text
//! ["connect",   [major, minor], nodeId, credentials?, options?]
//! ["connected", [major, minor], nodeId, options?]
//! ["error",     kind, description?]
//! ["ping",      cursor]
//! ["pong",      cursor]
//! ["sync",      sinceCursor, [entry, ...]]
//! ["synced",    cursor]
//! ["debug",     topic, data]
//! ```
//!
//! Trailing elements beyond the documented ones are ignored so newer
//! peers can extend messages without breaking older ones.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::{Cursor, ErrorKind, NodeId, ProtocolVersion, SyncError, WireError};

/// An opaque log entry. The protocol never looks inside it.
pub type Entry = Value;

/// All possible protocol messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Handshake request from the initiator
    Connect(Connect),
    /// Handshake acceptance from the responder
    Connected(Connected),
    /// Error report
    Error(ErrorReport),
    /// Liveness check
    Ping(Ping),
    /// Liveness reply
    Pong(Pong),
    /// Batch of log entries
    Sync(SyncBatch),
    /// Acknowledgement of a batch
    Synced(Synced),
    /// Free-form diagnostics
    Debug(DebugInfo),
}

/// Handshake request sent by the initiator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    /// Protocol version spoken by the sender
    pub version: ProtocolVersion,
    /// Sender identity
    pub node_id: NodeId,
    /// Opaque credentials for the responder's authenticator
    pub credentials: Option<Value>,
    /// Optional handshake extensions
    pub options: HandshakeOptions,
}

/// Handshake acceptance sent by the responder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connected {
    /// Protocol version spoken by the sender
    pub version: ProtocolVersion,
    /// Sender identity
    pub node_id: NodeId,
    /// Optional handshake extensions
    pub options: HandshakeOptions,
}

/// Optional handshake extensions, carried as a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeOptions {
    /// Application-level protocol spoken on top of logsync.
    pub subprotocol: Option<String>,
}

impl HandshakeOptions {
    fn is_empty(&self) -> bool {
        self.subprotocol.is_none()
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        if let Some(subprotocol) = &self.subprotocol {
            map.insert("subprotocol".into(), Value::String(subprotocol.clone()));
        }
        Value::Object(map)
    }

    fn from_value(kind: &'static str, value: Option<&Value>) -> Result<Self, WireError> {
        match value {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(Value::Object(map)) => {
                let subprotocol = match map.get("subprotocol") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(s)) => Some(s.clone()),
                    Some(_) => return Err(malformed(kind, "subprotocol must be a string")),
                };
                Ok(Self { subprotocol })
            }
            Some(_) => Err(malformed(kind, "options must be an object")),
        }
    }
}

/// An error reported to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    /// Error kind
    pub kind: ErrorKind,
    /// Human-readable detail (may be empty)
    pub description: String,
}

impl ErrorReport {
    /// Convert a received report into a [`SyncError`] flagged as coming from the peer.
    pub fn into_sync_error(self) -> SyncError {
        SyncError::from_peer(self.kind, self.description)
    }
}

impl From<&SyncError> for ErrorReport {
    fn from(err: &SyncError) -> Self {
        Self {
            kind: err.kind,
            description: err.description.clone(),
        }
    }
}

/// Liveness check. Carries the sender's `received` cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    /// Highest position the sender has applied
    pub received: Cursor,
}

/// Liveness reply. Carries the sender's `received` cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pong {
    /// Highest position the sender has applied
    pub received: Cursor,
}

/// A batch of log entries starting at `since`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncBatch {
    /// Position of the first entry in the batch
    pub since: Cursor,
    /// Entries in log order
    pub entries: Vec<Entry>,
}

impl SyncBatch {
    /// Position just after the last entry of this batch.
    ///
    /// `None` when the batch would run past the end of the cursor range.
    pub fn end(&self) -> Option<Cursor> {
        self.since.checked_advance(self.entries.len())
    }
}

/// Acknowledgement that everything before `cursor` has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Synced {
    /// Acknowledged position
    pub cursor: Cursor,
}

/// Free-form diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugInfo {
    /// What the data is about
    pub topic: String,
    /// Arbitrary payload
    pub data: Value,
}

impl Message {
    /// The type discriminator used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Connect(_) => "connect",
            Message::Connected(_) => "connected",
            Message::Error(_) => "error",
            Message::Ping(_) => "ping",
            Message::Pong(_) => "pong",
            Message::Sync(_) => "sync",
            Message::Synced(_) => "synced",
            Message::Debug(_) => "debug",
        }
    }

    /// Build the wire array.
    pub fn to_value(&self) -> Value {
        let mut items = vec![Value::String(self.kind().into())];
        match self {
            Message::Connect(connect) => {
                items.push(version_to_value(connect.version));
                items.push(Value::String(connect.node_id.to_string()));
                if connect.credentials.is_some() || !connect.options.is_empty() {
                    items.push(connect.credentials.clone().unwrap_or(Value::Null));
                }
                if !connect.options.is_empty() {
                    items.push(connect.options.to_value());
                }
            }
            Message::Connected(connected) => {
                items.push(version_to_value(connected.version));
                items.push(Value::String(connected.node_id.to_string()));
                if !connected.options.is_empty() {
                    items.push(connected.options.to_value());
                }
            }
            Message::Error(report) => {
                items.push(Value::String(report.kind.as_str().into()));
                if !report.description.is_empty() {
                    items.push(Value::String(report.description.clone()));
                }
            }
            Message::Ping(ping) => items.push(Value::from(ping.received.value())),
            Message::Pong(pong) => items.push(Value::from(pong.received.value())),
            Message::Sync(batch) => {
                items.push(Value::from(batch.since.value()));
                items.push(Value::Array(batch.entries.clone()));
            }
            Message::Synced(synced) => items.push(Value::from(synced.cursor.value())),
            Message::Debug(debug) => {
                items.push(Value::String(debug.topic.clone()));
                items.push(debug.data.clone());
            }
        }
        Value::Array(items)
    }

    /// Parse a wire array.
    pub fn from_value(value: Value) -> Result<Self, WireError> {
        let Value::Array(items) = value else {
            return Err(WireError::UnknownType("<not an array>".into()));
        };
        let mut items = items.into_iter();
        let kind = match items.next() {
            Some(Value::String(kind)) => kind,
            _ => return Err(WireError::UnknownType("<missing type>".into())),
        };
        let args: Vec<Value> = items.collect();

        match kind.as_str() {
            "connect" => Ok(Message::Connect(Connect {
                version: version_from_value("connect", args.first())?,
                node_id: NodeId::new(string_arg("connect", args.get(1), "node id")?),
                credentials: args.get(2).filter(|v| !v.is_null()).cloned(),
                options: HandshakeOptions::from_value("connect", args.get(3))?,
            })),
            "connected" => Ok(Message::Connected(Connected {
                version: version_from_value("connected", args.first())?,
                node_id: NodeId::new(string_arg("connected", args.get(1), "node id")?),
                options: HandshakeOptions::from_value("connected", args.get(2))?,
            })),
            "error" => {
                let raw = string_arg("error", args.first(), "error kind")?;
                let description = match args.get(1) {
                    None | Some(Value::Null) => String::new(),
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                };
                let report = match ErrorKind::from_wire(&raw) {
                    Some(kind) => ErrorReport { kind, description },
                    None => ErrorReport {
                        kind: ErrorKind::UnknownMessage,
                        description: format!("unknown error kind `{}` {}", raw, description)
                            .trim_end()
                            .to_string(),
                    },
                };
                Ok(Message::Error(report))
            }
            "ping" => Ok(Message::Ping(Ping {
                received: cursor_arg("ping", args.first())?,
            })),
            "pong" => Ok(Message::Pong(Pong {
                received: cursor_arg("pong", args.first())?,
            })),
            "sync" => {
                let since = cursor_arg("sync", args.first())?;
                let entries = match args.into_iter().nth(1) {
                    Some(Value::Array(entries)) => entries,
                    _ => return Err(malformed("sync", "entries must be an array")),
                };
                let batch = SyncBatch { since, entries };
                if batch.end().is_none() {
                    return Err(malformed("sync", "entries run past the cursor range"));
                }
                Ok(Message::Sync(batch))
            }
            "synced" => Ok(Message::Synced(Synced {
                cursor: cursor_arg("synced", args.first())?,
            })),
            "debug" => {
                let topic = string_arg("debug", args.first(), "topic")?;
                let data = args.into_iter().nth(1).unwrap_or(Value::Null);
                Ok(Message::Debug(DebugInfo { topic, data }))
            }
            _ => Err(WireError::UnknownType(kind)),
        }
    }

    /// Serialize to a JSON array string.
    pub fn to_json(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(&self.to_value())?)
    }

    /// Parse a JSON array string.
    pub fn from_json(text: &str) -> Result<Self, WireError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        rmp_serde::to_vec(&self.to_value()).map_err(WireError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let value: Value = rmp_serde::from_slice(bytes).map_err(WireError::Deserialization)?;
        Self::from_value(value)
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Message::from_value(value).map_err(D::Error::custom)
    }
}

fn malformed(kind: &'static str, reason: impl Into<String>) -> WireError {
    WireError::Malformed {
        kind,
        reason: reason.into(),
    }
}

fn version_to_value(version: ProtocolVersion) -> Value {
    Value::Array(vec![Value::from(version.major), Value::from(version.minor)])
}

fn version_from_value(kind: &'static str, value: Option<&Value>) -> Result<ProtocolVersion, WireError> {
    let pair = match value {
        Some(Value::Array(pair)) if pair.len() == 2 => pair,
        _ => return Err(malformed(kind, "version must be [major, minor]")),
    };
    let part = |v: &Value| {
        v.as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| malformed(kind, "version parts must be unsigned integers"))
    };
    Ok(ProtocolVersion::new(part(&pair[0])?, part(&pair[1])?))
}

fn string_arg(kind: &'static str, value: Option<&Value>, what: &str) -> Result<String, WireError> {
    match value {
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(malformed(kind, format!("{} must be a string", what))),
    }
}

fn cursor_arg(kind: &'static str, value: Option<&Value>) -> Result<Cursor, WireError> {
    value
        .and_then(Value::as_u64)
        .map(Cursor::new)
        .ok_or_else(|| malformed(kind, "cursor must be an unsigned integer"))
}
