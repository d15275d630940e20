use crate::connection::{
    ReconnectPolicy, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_MAX_RECONNECT_ATTEMPTS,
};
use crate::reducer::{ModelLimits, TOAST_CAPACITY};
use clap::Parser;
use ptrack_core::{DEFAULT_QUEUE_NAME, LOG_CAPACITY, RECENT_EVENTS_CAPACITY};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "http://localhost:3000";
pub const DEFAULT_WS_URL: &str = "ws://localhost:3000/state/events";

#[derive(Debug, Clone, Parser)]
#[command(name = "ptrack-mission-control", about = "Live sync core for the pokemon task backend")]
pub struct Args {
    #[arg(long, env = "PTRACK_API_BASE")]
    pub api_base: Option<String>,
    #[arg(long, env = "PTRACK_WS_URL")]
    pub ws_url: Option<String>,
    #[arg(long = "session", env = "PTRACK_SESSION_ID")]
    pub session_id: Option<String>,
    #[arg(long)]
    pub state_dir: Option<PathBuf>,
    /// Keep the persisted session instead of starting fresh.
    #[arg(long)]
    pub resume: bool,
    #[arg(long, env = "PTRACK_LOG_DIR")]
    pub log_dir: Option<String>,
    #[arg(long = "queue")]
    pub queue_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTimings {
    pub heartbeat: Duration,
    pub queue_poll: Duration,
    pub roster_poll: Duration,
    pub live_user_poll: Duration,
    pub reconnect_base: Duration,
    pub max_reconnect_attempts: u32,
    pub handshake_timeout: Duration,
    pub task_grace: Duration,
    pub toast_lifetime: Duration,
    pub log_capacity: usize,
    pub recent_events_capacity: usize,
    pub toast_capacity: usize,
}

impl Default for SyncTimings {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(2),
            queue_poll: Duration::from_secs(2),
            roster_poll: Duration::from_secs(5),
            live_user_poll: Duration::from_secs(5),
            reconnect_base: Duration::from_millis(1000),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            task_grace: Duration::from_millis(3000),
            toast_lifetime: Duration::from_millis(1000),
            log_capacity: LOG_CAPACITY,
            recent_events_capacity: RECENT_EVENTS_CAPACITY,
            toast_capacity: TOAST_CAPACITY,
        }
    }
}

impl SyncTimings {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: self.reconnect_base,
            max_attempts: self.max_reconnect_attempts,
            handshake_timeout: self.handshake_timeout,
        }
    }

    pub fn model_limits(&self) -> ModelLimits {
        ModelLimits {
            log_capacity: self.log_capacity,
            recent_events_capacity: self.recent_events_capacity,
            toast_capacity: self.toast_capacity,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_base: String,
    pub ws_url: String,
    pub session_id: String,
    pub state_dir: PathBuf,
    pub resume: bool,
    pub log_dir: String,
    pub log_stdout: bool,
    pub queue_name: String,
    pub timings: SyncTimings,
}

impl Config {
    pub fn session_db_path(&self) -> PathBuf {
        self.state_dir.join("sessions.sqlite")
    }
}

pub fn load_config(args: Args) -> Config {
    Config {
        api_base: non_empty(args.api_base).unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        ws_url: non_empty(args.ws_url).unwrap_or_else(|| DEFAULT_WS_URL.to_string()),
        session_id: non_empty(args.session_id)
            .unwrap_or_else(|| format!("pid-{}", std::process::id())),
        state_dir: args.state_dir.unwrap_or_else(resolve_state_dir),
        resume: args.resume,
        log_dir: args.log_dir.unwrap_or_default(),
        log_stdout: resolve_log_stdout(),
        queue_name: non_empty(args.queue_name).unwrap_or_else(|| DEFAULT_QUEUE_NAME.to_string()),
        timings: SyncTimings::default(),
    }
}

pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn resolve_log_stdout() -> bool {
    std::env::var("PTRACK_LOG_STDOUT")
        .ok()
        .and_then(|value| parse_bool_flag(&value))
        .unwrap_or(false)
}

fn resolve_state_dir() -> PathBuf {
    if let Ok(value) = std::env::var("XDG_STATE_HOME") {
        if !value.trim().is_empty() {
            return PathBuf::from(value).join("ptrack");
        }
    }
    dirs::home_dir()
        .map(|home| home.join(".local").join("state").join("ptrack"))
        .unwrap_or_else(|| PathBuf::from(".ptrack"))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}
