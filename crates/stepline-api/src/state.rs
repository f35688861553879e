//! Application state wiring all services together.
//!
//! AppState holds the concrete service instances used by both CLI and REST API.
//! Core services are generic over repository traits; AppState pins them to the
//! SQLite implementations.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use stepline_core::repository::user::BoxUserRepository;
use stepline_core::workflow::context::StepServices;
use stepline_core::workflow::definition::WorkflowRegistry;
use stepline_core::workflow::dispatcher::WorkflowDispatcher;
use stepline_core::workflow::engine::{DurableEngine, EngineConfig};
use stepline_core::workflow::example::example_workflow;
use stepline_core::workflow::status::StatusService;
use stepline_infra::config::{load_global_config, resolve_data_dir};
use stepline_infra::sqlite::instance::SqliteInstanceRepository;
use stepline_infra::sqlite::pool::DatabasePool;
use stepline_infra::sqlite::user::SqliteUserRepository;
use stepline_types::config::GlobalConfig;

/// Concrete type aliases for the generics pinned to infra implementations.
pub type ConcreteEngine = DurableEngine<SqliteInstanceRepository>;
pub type ConcreteDispatcher = WorkflowDispatcher<SqliteInstanceRepository>;
pub type ConcreteStatusService = StatusService<SqliteInstanceRepository>;

/// Shared application state.
///
/// Used by both CLI commands and REST API handlers. The engine is constructed
/// here but only started by `serve`.
#[derive(Clone)]
pub struct AppState {
    pub engine: ConcreteEngine,
    pub dispatcher: Arc<ConcreteDispatcher>,
    pub status_service: Arc<ConcreteStatusService>,
    pub user_repo: SqliteUserRepository,
    pub config: Arc<GlobalConfig>,
    pub data_dir: PathBuf,
    pub db_pool: DatabasePool,
}

impl AppState {
    /// Initialize the application state: load config, connect to DB, wire services.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();

        // Ensure data directory exists
        tokio::fs::create_dir_all(&data_dir).await?;

        let config = load_global_config(&data_dir).await;
        let db_pool = DatabasePool::open_in(&data_dir).await?;

        Self::from_pool(db_pool, config, data_dir)
    }

    /// Wire services on top of an already-open pool.
    pub fn from_pool(
        db_pool: DatabasePool,
        config: GlobalConfig,
        data_dir: PathBuf,
    ) -> anyhow::Result<Self> {
        let mut registry = WorkflowRegistry::new();
        registry.register(example_workflow(
            Duration::from_secs(config.example.sleep_secs),
            config.example.user_id,
        )?)?;

        let user_repo = SqliteUserRepository::new(db_pool.clone());
        let services = StepServices::new(BoxUserRepository::new(user_repo.clone()));

        let engine = DurableEngine::new(
            SqliteInstanceRepository::new(db_pool.clone()),
            Arc::new(registry),
            services,
            EngineConfig::from(&config.engine),
        );
        let dispatcher = WorkflowDispatcher::new(engine.clone());
        let status_service = StatusService::new(SqliteInstanceRepository::new(db_pool.clone()));

        Ok(Self {
            engine,
            dispatcher: Arc::new(dispatcher),
            status_service: Arc::new(status_service),
            user_repo,
            config: Arc::new(config),
            data_dir,
            db_pool,
        })
    }
}
