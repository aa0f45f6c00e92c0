//! Decoding of pending-queue change events
//!
//! A subscription delivers diffs relative to the subscribed node. The path
//! decides the shape of `data`, not the other way round: a single command body
//! and a mapping of many commands are both JSON objects.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Errors raised by malformed events; the event is dropped, the stream continues
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed event JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Pending snapshot is not an object: {0}")]
    UnexpectedShape(String),

    #[error("Malformed command {id}: {reason}")]
    MalformedCommand { id: String, reason: String },
}

/// The `data:` payload of a `put` or `patch` event
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamPayload {
    pub path: String,
    #[serde(default)]
    pub data: Value,
}

/// A pending command key with its undecoded body
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub id: String,
    pub body: Value,
}

/// What a payload means for the pending queue
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Commands to apply, in key order
    Commands(Vec<PendingEntry>),
    /// One command was removed (usually our own acknowledgment)
    Removed(String),
    /// The whole queue is empty
    Cleared,
    /// Some fields of a command changed; the rest of it is not in the event
    FieldEdit { id: String, fields: Vec<String> },
}

/// SSE event type of a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// `data` replaces the node at `path`
    Put,
    /// Each child of `data` replaces that child of the node at `path`
    Patch,
}

impl EventKind {
    /// Payload-carrying kind for an `event:` name; unnamed events are puts
    pub fn from_name(name: Option<&str>) -> Option<Self> {
        match name {
            None | Some("put") => Some(EventKind::Put),
            Some("patch") => Some(EventKind::Patch),
            Some(_) => None,
        }
    }
}

/// Decode the JSON after `data:`; `null` is a no-op and yields `None`
pub fn decode_payload(json: &str) -> Result<Option<StreamPayload>, ProtocolError> {
    let value: Value = serde_json::from_str(json)?;
    if value.is_null() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_value(value)?))
}

/// Expand a full snapshot of the pending node into entries
///
/// Null children are skipped. Keys are visited in sorted order, which for
/// push ids is creation order.
pub fn snapshot_entries(snapshot: &Value) -> Result<Vec<PendingEntry>, ProtocolError> {
    match snapshot {
        Value::Null => Ok(Vec::new()),
        Value::Object(map) => {
            let mut entries: Vec<PendingEntry> = map
                .iter()
                .filter(|(_, body)| !body.is_null())
                .map(|(id, body)| PendingEntry {
                    id: id.clone(),
                    body: body.clone(),
                })
                .collect();
            entries.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(entries)
        }
        other => Err(ProtocolError::UnexpectedShape(other.to_string())),
    }
}

/// Route a payload by its kind and its path relative to the subscription root
///
/// A patch on a single command that carries both `target` and `action`
/// yields the whole command; any other patch on it is a partial edit.
pub fn dispatch(kind: EventKind, payload: &StreamPayload) -> Result<Dispatch, ProtocolError> {
    let segments: Vec<&str> = payload
        .path
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    match (kind, segments.as_slice()) {
        (EventKind::Put, []) if payload.data.is_null() => Ok(Dispatch::Cleared),
        (_, []) => Ok(Dispatch::Commands(snapshot_entries(&payload.data)?)),
        (EventKind::Put, [id]) => {
            if payload.data.is_null() {
                return Ok(Dispatch::Removed(id.to_string()));
            }
            Ok(Dispatch::Commands(vec![PendingEntry {
                id: id.to_string(),
                body: payload.data.clone(),
            }]))
        }
        (EventKind::Patch, [id]) => {
            let Value::Object(fields) = &payload.data else {
                return Err(ProtocolError::UnexpectedShape(payload.data.to_string()));
            };
            if fields.contains_key("target") && fields.contains_key("action") {
                return Ok(Dispatch::Commands(vec![PendingEntry {
                    id: id.to_string(),
                    body: payload.data.clone(),
                }]));
            }
            let mut names: Vec<String> = fields.keys().cloned().collect();
            names.sort();
            Ok(Dispatch::FieldEdit {
                id: id.to_string(),
                fields: names,
            })
        }
        (_, [id, rest @ ..]) => Ok(Dispatch::FieldEdit {
            id: id.to_string(),
            fields: vec![rest.join("/")],
        }),
    }
}
