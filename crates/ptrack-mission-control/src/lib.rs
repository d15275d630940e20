pub mod api;
pub mod config;
pub mod connection;
pub mod effects;
pub mod persistence;
pub mod poller;
pub mod reducer;
pub mod registry;
pub mod sync;

pub use api::{ApiBody, ApiClient, ApiError};
pub use config::{load_config, Args, Config, SyncTimings};
pub use connection::{ConnectError, ConnectionManager, ConnectionPhase, ReconnectPolicy};
pub use persistence::PersistenceAdapter;
pub use reducer::{DashboardModel, ModelEvent};
pub use registry::{Subscription, TopicRegistry};
pub use sync::{SyncCommand, SyncConfig, SyncCore, SyncState};
