use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

pub mod log_grammar;
pub mod wire;

pub type AgentId = i64;

pub const DEFAULT_QUEUE_NAME: &str = "pokemon_tasks";
pub const LOG_CAPACITY: usize = 1000;
pub const RECENT_EVENTS_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Healthy,
    Warning,
    Critical,
}

impl Default for HealthLevel {
    fn default() -> Self {
        Self::Critical
    }
}

impl HealthLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthLevel::Healthy => "healthy",
            HealthLevel::Warning => "warning",
            HealthLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Connected,
    Disconnected,
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl Connectivity {
    pub fn from_open(open: bool) -> Self {
        if open {
            Connectivity::Connected
        } else {
            Connectivity::Disconnected
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Connectivity::Connected => "connected",
            Connectivity::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    /// Level for a legacy broadcast category. Unknown categories are `info`.
    pub fn from_category(category: &str) -> Self {
        match category {
            "system log" => LogLevel::Info,
            "headquarter dispatch" => LogLevel::Warn,
            "pokemon escape" => LogLevel::Error,
            "agent log" => LogLevel::Debug,
            _ => LogLevel::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Debug => "debug",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "debug" => Ok(LogLevel::Debug),
            other => Err(format!("Unknown log level: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Processing,
    Started,
    Captured,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Processing => "processing",
            TaskStatus::Started => "started",
            TaskStatus::Captured => "captured",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Captured | TaskStatus::Failed)
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, TaskStatus::Processing | TaskStatus::Started)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskRecord {
    pub pokemon: String,
    pub location: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,
}

/// One rocket agent as tracked locally. `last_log` and `task` are only ever
/// derived from the push channel; the roster poll never blanks them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentRecord {
    #[serde(deserialize_with = "deserialize_agent_id")]
    pub id: AgentId,
    pub name: String,
    #[serde(default, rename = "imageNum")]
    pub image_num: u32,
    #[serde(default, rename = "lastLog", skip_serializing_if = "Option::is_none")]
    pub last_log: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskRecord>,
}

impl AgentRecord {
    pub fn new(id: AgentId, name: impl Into<String>, image_num: u32) -> Self {
        Self {
            id,
            name: name.into(),
            image_num,
            last_log: None,
            task: None,
        }
    }
}

/// Entry of the authoritative agent roster returned by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RosterEntry {
    #[serde(deserialize_with = "deserialize_agent_id")]
    pub id: AgentId,
    pub name: String,
    #[serde(default, rename = "imageNum", skip_serializing_if = "Option::is_none")]
    pub image_num: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub name: String,
    #[serde(default)]
    pub messages: u64,
    #[serde(default)]
    pub consumers: u64,
    #[serde(default = "default_queue_status")]
    pub status: HealthLevel,
}

impl QueueSnapshot {
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            messages: 0,
            consumers: 0,
            status: HealthLevel::Healthy,
        }
    }
}

fn default_queue_status() -> HealthLevel {
    HealthLevel::Healthy
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchRecord {
    pub id: String,
    pub pokemon: String,
    pub location: String,
    pub element: String,
}

impl DispatchRecord {
    pub fn new(
        pokemon: impl Into<String>,
        location: impl Into<String>,
        element: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            pokemon: pokemon.into(),
            location: location.into(),
            element: element.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SystemHealthView {
    #[serde(default)]
    pub overall: HealthLevel,
    #[serde(default)]
    pub rabbitmq: HealthLevel,
    #[serde(default)]
    pub websocket: Connectivity,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentPresence {
    Online,
    Offline,
    Busy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// External-facing agent status delivered on the `agent_status` topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentStatus {
    #[serde(deserialize_with = "deserialize_string_id")]
    pub id: String,
    pub name: String,
    pub status: AgentPresence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    #[serde(default)]
    pub last_seen: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    #[serde(default, rename = "imageNum", skip_serializing_if = "Option::is_none")]
    pub image_num: Option<u32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskEventKind {
    Dispatch,
    Success,
    Failure,
    Retry,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TaskEventKind,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub task_type: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SystemState {
    #[serde(default)]
    pub queues: Vec<QueueSnapshot>,
    #[serde(default)]
    pub agents: Vec<AgentStatus>,
    #[serde(default)]
    pub recent_events: Vec<TaskEvent>,
    #[serde(default)]
    pub system_health: SystemHealthView,
}

/// Accept an agent id as either a JSON number or a numeric string.
fn deserialize_agent_id<'de, D>(deserializer: D) -> Result<AgentId, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom("agent id out of range")),
        Value::String(s) => s.trim().parse::<AgentId>().map_err(serde::de::Error::custom),
        _ => Err(serde::de::Error::custom(
            "expected string or number for agent id",
        )),
    }
}

fn deserialize_string_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(serde::de::Error::custom("expected string or number for id")),
    }
}
