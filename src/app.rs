//! Application wiring: storage, connection manager and tool orchestrator.

use std::sync::Arc;

use data_connector::{create_storage, ConnectionStorage, OAuthSessionStorage};
use toolbridge_mcp::{
    ConnectionManager, LlmBackend, RecoveryOutcome, RmcpSessionFactory, SessionFactory,
    ToolOrchestrator,
};
use tracing::{info, warn};

use crate::{config::AppConfig, llm::OpenAiBackend};

pub struct App {
    pub config: AppConfig,
    pub manager: Arc<ConnectionManager>,
    pub sessions: Arc<dyn OAuthSessionStorage>,
    pub connections: Arc<dyn ConnectionStorage>,
}

impl App {
    /// Build with the rmcp-backed session factory.
    pub async fn build(config: AppConfig) -> anyhow::Result<Self> {
        let factory = Arc::new(RmcpSessionFactory::new()?);
        Self::with_factory(config, factory).await
    }

    pub async fn with_factory(
        config: AppConfig,
        factory: Arc<dyn SessionFactory>,
    ) -> anyhow::Result<Self> {
        let (sessions, connections) = create_storage(&config.storage).await?;
        let manager = ConnectionManager::new(
            config.mcp.clone(),
            factory,
            sessions.clone(),
            connections.clone(),
        )?;
        Ok(Self {
            config,
            manager: Arc::new(manager),
            sessions,
            connections,
        })
    }

    /// Reconnect persisted connections. Per-row failures are logged and
    /// reported, never returned as an error.
    pub async fn recover(&self) -> anyhow::Result<Vec<RecoveryOutcome>> {
        let outcomes = self.manager.reconnect_saved_connections().await?;
        for outcome in outcomes.iter().filter(|o| o.error.is_some()) {
            warn!(
                connection_id = %outcome.id,
                name = %outcome.name,
                error = outcome.error.as_deref().unwrap_or_default(),
                "Saved connection unavailable"
            );
        }
        info!(
            connections = outcomes.len(),
            tools = self.manager.get_all_tools().len(),
            "Startup recovery complete"
        );
        Ok(outcomes)
    }

    pub fn orchestrator(&self) -> anyhow::Result<ToolOrchestrator> {
        let llm: Arc<dyn LlmBackend> = Arc::new(OpenAiBackend::new(&self.config.llm)?);
        Ok(self.orchestrator_with(llm))
    }

    pub fn orchestrator_with(&self, llm: Arc<dyn LlmBackend>) -> ToolOrchestrator {
        ToolOrchestrator::new(self.manager.clone(), llm)
    }

    /// The state nonce stored when the authorization URL was built.
    pub async fn expected_state(&self, connection_id: &str) -> anyhow::Result<Option<String>> {
        Ok(self
            .sessions
            .get_session(connection_id)
            .await?
            .and_then(|record| record.state))
    }

    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }
}
