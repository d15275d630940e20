use clap::Parser;
use ptrack_mission_control::api::DEFAULT_REQUEST_TIMEOUT;
use ptrack_mission_control::{
    load_config, ApiClient, Args, Config, DashboardModel, PersistenceAdapter, SyncCommand,
    SyncConfig, SyncCore,
};
use ptrack_storage::SqliteSessionStore;
use std::{
    error::Error,
    fs::{File, OpenOptions},
    io,
    path::Path,
    sync::Arc,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::{mpsc, watch},
};
use tracing::{info, warn};
use tracing_subscriber::{
    fmt::writer::{BoxMakeWriter, MakeWriterExt},
    EnvFilter,
};

const COMMAND_QUEUE_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = load_config(Args::parse());
    init_logging(&config);

    std::fs::create_dir_all(&config.state_dir)?;
    let store = SqliteSessionStore::open(config.session_db_path(), &config.session_id)?;
    let mut persistence = PersistenceAdapter::new(Box::new(store));
    if !config.resume {
        persistence.clear();
    }
    let api = ApiClient::new(&config.api_base, DEFAULT_REQUEST_TIMEOUT)?;
    info!(
        event = "sync_starting",
        session_id = %config.session_id,
        api_base = %config.api_base,
        ws_url = %config.ws_url,
        resume = config.resume
    );

    let core = SyncCore::new(SyncConfig::from(&config), persistence, api);
    let model_rx = core.subscribe_model();
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);

    tokio::spawn(read_commands(cmd_tx.clone()));
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cmd_tx.send(SyncCommand::Shutdown).await;
        }
    });
    tokio::spawn(report_changes(model_rx));

    core.run(cmd_rx).await;
    Ok(())
}

async fn read_commands(tx: mpsc::Sender<SyncCommand>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!(event = "stdin_read_error", error = %err);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match parse_command(&line) {
            Ok(command) => {
                let quit = command == SyncCommand::Shutdown;
                if tx.send(command).await.is_err() || quit {
                    break;
                }
            }
            Err(err) => eprintln!("{err}"),
        }
    }
}

async fn report_changes(mut rx: watch::Receiver<DashboardModel>) {
    while rx.changed().await.is_ok() {
        let line = summarize(&rx.borrow_and_update());
        println!("{line}");
    }
}

/// `sighting <pokemon> <element> <location...>`, `spawn <imageNum> <name...>`,
/// `reset`, `reconnect`, `quit`.
fn parse_command(line: &str) -> Result<SyncCommand, String> {
    let mut parts = line.split_whitespace();
    let verb = parts.next().unwrap_or_default().to_ascii_lowercase();
    let rest: Vec<&str> = parts.collect();
    match verb.as_str() {
        "sighting" => {
            if rest.len() < 3 {
                return Err("usage: sighting <pokemon> <element> <location...>".to_string());
            }
            Ok(SyncCommand::AddSighting {
                pokemon: rest[0].to_string(),
                element: rest[1].to_string(),
                location: rest[2..].join(" "),
            })
        }
        "spawn" => {
            if rest.len() < 2 {
                return Err("usage: spawn <imageNum> <name...>".to_string());
            }
            let image_num = rest[0]
                .parse::<u32>()
                .map_err(|_| format!("invalid imageNum: {}", rest[0]))?;
            Ok(SyncCommand::SpawnAgent {
                name: rest[1..].join(" "),
                image_num,
            })
        }
        "reset" => Ok(SyncCommand::Reset),
        "reconnect" => Ok(SyncCommand::Reconnect),
        "quit" | "exit" => Ok(SyncCommand::Shutdown),
        other => Err(format!("unknown command: {other}")),
    }
}

fn summarize(model: &DashboardModel) -> String {
    let queue = model
        .system
        .queues
        .first()
        .map(|queue| format!("{}={}/{}", queue.name, queue.messages, queue.consumers))
        .unwrap_or_else(|| "queue=-".to_string());
    let busy = model.agents.iter().filter(|agent| agent.task.is_some()).count();
    let dispatch = model
        .dispatch
        .as_ref()
        .map(|dispatch| format!("{}@{}", dispatch.pokemon, dispatch.location))
        .unwrap_or_else(|| "-".to_string());
    let mut line = format!(
        "ws={} {} agents={} busy={} dispatch={} escapes={} live={} logs={}",
        model.connectivity(),
        queue,
        model.agents.len(),
        busy,
        dispatch,
        model.escape_count,
        model.live_users,
        model.logs.len(),
    );
    if let Some(toast) = model.toasts.back() {
        line.push_str(" | ");
        line.push_str(&toast.message);
    }
    line
}

/// Where tracing output goes. The file is opened before the subscriber is built.
#[derive(Debug)]
enum LogTarget {
    Off,
    Stdout,
    File(Arc<File>),
    Both(Arc<File>),
}

impl LogTarget {
    fn resolve(log_dir: &str, session_id: &str, stdout: bool) -> io::Result<Self> {
        let file = if log_dir.trim().is_empty() {
            None
        } else {
            let dir = Path::new(log_dir);
            std::fs::create_dir_all(dir)?;
            let path = dir.join(format!("ptrack-{}.log", session_slug(session_id)));
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(Arc::new(file))
        };
        Ok(match (file, stdout) {
            (Some(file), true) => Self::Both(file),
            (Some(file), false) => Self::File(file),
            (None, true) => Self::Stdout,
            (None, false) => Self::Off,
        })
    }

    fn writer(self) -> (BoxMakeWriter, bool) {
        match self {
            Self::Off => (BoxMakeWriter::new(io::sink), false),
            Self::Stdout => (BoxMakeWriter::new(io::stdout), true),
            Self::File(file) => (BoxMakeWriter::new(file), false),
            Self::Both(file) => (BoxMakeWriter::new(file.and(io::stdout)), false),
        }
    }
}

fn init_logging(config: &Config) {
    let level = std::env::var("PTRACK_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let target = LogTarget::resolve(&config.log_dir, &config.session_id, config.log_stdout)
        .unwrap_or_else(|err| {
            eprintln!("log_file_error: {err}");
            if config.log_stdout {
                LogTarget::Stdout
            } else {
                LogTarget::Off
            }
        });
    let (writer, ansi) = target.writer();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .try_init();
}

fn session_slug(session_id: &str) -> String {
    let slug: String = session_id
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if slug.is_empty() {
        "session".to_string()
    } else {
        slug
    }
}
