pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod events;
pub mod fetcher;
pub mod matcher;
pub mod metrics;
pub mod session;

pub use catalog::{Catalog, CatalogError, NewShow, Show, ShowStore, SqliteShowStore};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, PipelineConfig,
    SanitizedConfig,
};
pub use coordinator::{AcceptedRelease, Coordinator, CoordinatorError, LineDecision};
pub use events::{Component, EventHub, PipelineEvent, PipelineStatus};
pub use fetcher::{FetchError, FetchQueue, FetchQueueConfig, FetchRequest};
pub use matcher::{EpisodeIdentity, PatternError, PatternSet};
pub use metrics::{FetchMetrics, FetchStats, FetchSummary};
pub use session::{ConnectionSession, SessionError, SessionState};
