//! Per-user tool-provider orchestration: connector registry with encrypted
//! credentials, two-tier message routing, tool dispatch, and a durable
//! asynchronous job queue.

pub mod completion;
pub mod config;
pub mod connectors;
pub mod dispatch;
pub mod engine;
pub mod queue;
pub mod registry;
pub mod routing;
pub mod store;
pub mod vault;
pub mod worker;

pub use completion::{CompletionClient, OpenAiCompletion};
pub use config::EngineConfig;
pub use connectors::{Connector, ConnectorCatalog};
pub use dispatch::Dispatcher;
pub use engine::Engine;
pub use queue::{JobQueue, JobResult, JobStatus};
pub use registry::{ConnectorRegistry, ConnectorSummary, LoadedConnector};
pub use routing::{ChatTurn, ResolvedAction, RoutingEngine, RoutingMode};
pub use store::{ConnectorConfig, ConnectorStore, ConnectorUpdate, UserPreferences};
pub use vault::{CredentialVault, VaultError};
pub use worker::QueueWorker;
