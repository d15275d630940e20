//! Push-channel frame decoding and classification.
//!
//! Two envelope shapes share the channel: the structured
//! `{"type": <topic>, "data": <payload>}` form and the legacy
//! `{"type": <category>, "message": <text>, "time"?: <ts>}` broadcast form.
//! A frame carrying a `message` key is always treated as legacy.

use crate::log_grammar::{self, LogSignal};
use crate::{AgentStatus, LogEntry, LogLevel, SystemState, TaskEvent};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;
pub const LEGACY_SOURCE: &str = "backend";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Topic {
    Log,
    Event,
    StateUpdate,
    AgentStatus,
    Signal,
}

impl Topic {
    pub const ALL: [Topic; 5] = [
        Topic::Log,
        Topic::Event,
        Topic::StateUpdate,
        Topic::AgentStatus,
        Topic::Signal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Log => "log",
            Topic::Event => "event",
            Topic::StateUpdate => "state_update",
            Topic::AgentStatus => "agent_status",
            Topic::Signal => "signal",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StructuredMessage {
    Log(LogEntry),
    Event(TaskEvent),
    StateUpdate(SystemState),
    AgentStatus(AgentStatus),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LegacyMessage {
    pub category: String,
    pub message: String,
    pub time: Option<String>,
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IncomingFrame {
    Structured(StructuredMessage),
    Legacy(LegacyMessage),
}

/// A typed event produced by classification, ready for topic dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    Log(LogEntry),
    Event(TaskEvent),
    StateUpdate(SystemState),
    AgentStatus(AgentStatus),
    Signal(LogSignal),
}

impl PushEvent {
    pub fn topic(&self) -> Topic {
        match self {
            PushEvent::Log(_) => Topic::Log,
            PushEvent::Event(_) => Topic::Event,
            PushEvent::StateUpdate(_) => Topic::StateUpdate,
            PushEvent::AgentStatus(_) => Topic::AgentStatus,
            PushEvent::Signal(_) => Topic::Signal,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame has no type tag")]
    MissingType,
    #[error("unknown structured type: {0}")]
    UnknownType(String),
    #[error("decode error: {0}")]
    Decode(String),
}

pub fn decode_frame(text: &str, max_frame_bytes: usize) -> Result<IncomingFrame, FrameError> {
    let raw = text.trim_end_matches(['\r', '\n']);
    if raw.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    let value: Value = serde_json::from_str(raw).map_err(|err| FrameError::Decode(err.to_string()))?;
    let Value::Object(mut object) = value else {
        return Err(FrameError::NotAnObject);
    };

    if object.contains_key("message") {
        return legacy_from_object(object).map(IncomingFrame::Legacy);
    }

    let kind = match object.get("type") {
        Some(Value::String(kind)) => kind.clone(),
        _ => return Err(FrameError::MissingType),
    };
    if !matches!(
        kind.as_str(),
        "log" | "event" | "state_update" | "agent_status"
    ) {
        return Err(FrameError::UnknownType(kind));
    }
    object.retain(|key, _| key == "type" || key == "data");
    serde_json::from_value(Value::Object(object))
        .map(IncomingFrame::Structured)
        .map_err(|err| FrameError::Decode(err.to_string()))
}

fn legacy_from_object(mut object: Map<String, Value>) -> Result<LegacyMessage, FrameError> {
    let category = match object.remove("type") {
        Some(Value::String(category)) => category,
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    let message = match object.remove("message") {
        Some(Value::String(message)) => message,
        Some(Value::Null) | None => String::new(),
        Some(_) => return Err(FrameError::Decode("legacy message is not a string".to_string())),
    };
    let time = match object.remove("time") {
        Some(Value::String(time)) if !time.is_empty() => Some(time),
        _ => None,
    };
    Ok(LegacyMessage {
        category,
        message,
        time,
        extra: object,
    })
}

/// Convert a legacy broadcast into a log entry. Empty messages carry nothing.
pub fn legacy_log_entry(legacy: &LegacyMessage) -> Option<LogEntry> {
    if legacy.message.is_empty() {
        return None;
    }
    let metadata = if legacy.extra.is_empty() {
        None
    } else {
        Some(legacy.extra.clone())
    };
    Some(LogEntry {
        id: uuid::Uuid::new_v4().to_string(),
        timestamp: legacy
            .time
            .clone()
            .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        level: LogLevel::from_category(&legacy.category),
        message: legacy.message.clone(),
        source: LEGACY_SOURCE.to_string(),
        metadata,
    })
}

/// Expand a decoded frame into the events it implies. Log lines, structured
/// or legacy, are followed by whatever the pattern grammar derives from them.
pub fn classify(frame: IncomingFrame) -> Vec<PushEvent> {
    match frame {
        IncomingFrame::Structured(StructuredMessage::Log(entry)) => with_signals(entry),
        IncomingFrame::Structured(StructuredMessage::Event(event)) => vec![PushEvent::Event(event)],
        IncomingFrame::Structured(StructuredMessage::StateUpdate(state)) => {
            vec![PushEvent::StateUpdate(state)]
        }
        IncomingFrame::Structured(StructuredMessage::AgentStatus(status)) => {
            vec![PushEvent::AgentStatus(status)]
        }
        IncomingFrame::Legacy(legacy) => match legacy_log_entry(&legacy) {
            Some(entry) => with_signals(entry),
            None => Vec::new(),
        },
    }
}

pub fn classify_frame(text: &str, max_frame_bytes: usize) -> Result<Vec<PushEvent>, FrameError> {
    decode_frame(text, max_frame_bytes).map(classify)
}

fn with_signals(entry: LogEntry) -> Vec<PushEvent> {
    let signals = log_grammar::scan(&entry.message);
    let mut events = Vec::with_capacity(signals.len() + 1);
    events.push(PushEvent::Log(entry));
    events.extend(signals.into_iter().map(PushEvent::Signal));
    events
}
