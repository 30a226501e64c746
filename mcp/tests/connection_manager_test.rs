//! Connection lifecycle against scripted providers.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{
    harness, harness_with_store, test_config, tokens, Behavior, FakeFactory, ProviderScript,
    AUTH_URL,
};
use data_connector::{
    ConnectionRecord, ConnectionStatus, ConnectionStorage, ConnectionUpsert, MemoryStorage,
    OAuthSessionStorage, OAuthSessionUpdate, StorageError, StorageResult,
};
use serde_json::json;
use toolbridge_mcp::{ConnectOutcome, ConnectionManager, McpError, TransportKind};

const DOCS: &str = "https://docs.example.com/mcp";
const CALENDAR: &str = "https://calendar.example.com/mcp";
const DOWN: &str = "https://down.example.com/mcp";

#[tokio::test]
async fn test_connect_ready_provider() {
    let h = harness(FakeFactory::default().with_provider(DOCS, ProviderScript::ready(&["search", "fetch"])));

    let outcome = h.manager.connect(DOCS, Some("Docs")).await.unwrap();
    let ConnectOutcome::Connected(info) = outcome else {
        panic!("expected a connected outcome");
    };

    assert_eq!(info.name, "Docs");
    assert_eq!(info.status, ConnectionStatus::Connected);
    assert_eq!(info.tools.len(), 2);
    assert!(!info.id.contains("__"));

    let row = h.store.get_connection(&info.id).await.unwrap().unwrap();
    assert_eq!(row.status, ConnectionStatus::Connected);
    assert_eq!(row.url, DOCS);

    let names: Vec<String> = h
        .manager
        .get_all_tools()
        .iter()
        .map(|entry| entry.name.to_string())
        .collect();
    assert_eq!(
        names,
        vec![format!("{}__search", info.id), format!("{}__fetch", info.id)]
    );
}

#[tokio::test]
async fn test_connect_defaults_name_to_host() {
    let h = harness(FakeFactory::default().with_provider(DOCS, ProviderScript::ready(&["search"])));

    let outcome = h.manager.connect(DOCS, None).await.unwrap();
    let ConnectOutcome::Connected(info) = outcome else {
        panic!("expected a connected outcome");
    };
    assert_eq!(info.name, "docs.example.com");
}

#[tokio::test]
async fn test_connect_requiring_auth_parks_pending() {
    let h = harness(FakeFactory::default().with_provider(CALENDAR, ProviderScript::needs_auth(&["events"])));

    let outcome = h.manager.connect(CALENDAR, Some("Calendar")).await.unwrap();
    let ConnectOutcome::NeedsAuth {
        connection_id,
        authorization_url,
    } = outcome
    else {
        panic!("expected a needs-auth outcome");
    };

    assert_eq!(authorization_url, AUTH_URL);
    assert!(h.manager.is_pending(&connection_id));
    assert!(h.manager.get_all_tools().is_empty());

    let row = h.store.get_connection(&connection_id).await.unwrap().unwrap();
    assert_eq!(row.status, ConnectionStatus::PendingAuth);

    // Handed out once, then cleared from the credential record
    let record = h.store.get_session(&connection_id).await.unwrap().unwrap();
    assert!(record.authorization_url.is_none());
    assert_eq!(record.code_verifier.as_deref(), Some("test-verifier"));

    let pending = h.manager.get_connection(&connection_id).unwrap();
    assert_eq!(pending.status, ConnectionStatus::PendingAuth);
}

#[tokio::test]
async fn test_complete_oauth_promotes_pending() {
    let h = harness(FakeFactory::default().with_provider(CALENDAR, ProviderScript::needs_auth(&["events"])));
    let outcome = h.manager.connect(CALENDAR, Some("Calendar")).await.unwrap();
    let id = outcome.connection_id().to_string();

    let info = h
        .manager
        .complete_oauth_connection(&id, "good-code")
        .await
        .unwrap();

    assert_eq!(info.id, id);
    assert_eq!(info.status, ConnectionStatus::Connected);
    assert_eq!(info.tools.len(), 1);
    assert!(!h.manager.is_pending(&id));

    let row = h.store.get_connection(&id).await.unwrap().unwrap();
    assert_eq!(row.status, ConnectionStatus::Connected);
    let record = h.store.get_session(&id).await.unwrap().unwrap();
    assert_eq!(
        record.tokens.unwrap().access_token,
        "token-for-good-code"
    );
    assert_eq!(h.manager.get_all_tools().len(), 1);
}

#[tokio::test]
async fn test_complete_oauth_unknown_id() {
    let h = harness(FakeFactory::default());
    let err = h
        .manager
        .complete_oauth_connection("missing", "code")
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::PendingConnectionNotFound(id) if id == "missing"));
}

#[tokio::test]
async fn test_failed_completion_purges_everything() {
    let h = harness(FakeFactory::default().with_provider(CALENDAR, ProviderScript::needs_auth(&["events"])));
    let outcome = h.manager.connect(CALENDAR, None).await.unwrap();
    let id = outcome.connection_id().to_string();

    let err = h
        .manager
        .complete_oauth_connection(&id, "bad-code")
        .await
        .unwrap_err();

    assert!(matches!(err, McpError::OAuth(_)));
    assert!(!h.manager.is_pending(&id));
    assert!(h.manager.get_connection(&id).is_none());
    assert!(h.store.get_connection(&id).await.unwrap().is_none());
    assert!(h.store.get_session(&id).await.unwrap().is_none());

    // The pending entry is gone, so a retry is rejected
    assert!(matches!(
        h.manager.complete_oauth_connection(&id, "good-code").await,
        Err(McpError::PendingConnectionNotFound(_))
    ));
}

#[tokio::test]
async fn test_auth_without_captured_url_is_fatal() {
    let script = ProviderScript::needs_auth(&["events"])
        .with_behavior(Behavior::NeedsAuth { capture_url: false });
    let h = harness(FakeFactory::default().with_provider(CALENDAR, script));

    let err = h.manager.connect(CALENDAR, None).await.unwrap_err();

    assert!(matches!(err, McpError::AuthorizationUnavailable(_)));
    assert!(h.store.list_connections().await.unwrap().is_empty());
    assert_eq!(h.factory.close_count(), 1);
}

#[tokio::test]
async fn test_unreachable_provider_leaves_no_trace() {
    let h = harness(FakeFactory::default().with_provider(
        DOWN,
        ProviderScript::ready(&[]).with_behavior(Behavior::Unreachable),
    ));

    let err = h.manager.connect(DOWN, None).await.unwrap_err();

    assert!(matches!(err, McpError::ProviderUnreachable(_)));
    assert!(h.store.list_connections().await.unwrap().is_empty());
    assert!(h.manager.get_all_tools().is_empty());
}

#[tokio::test]
async fn test_transport_falls_back_to_sse() {
    let h = harness(
        FakeFactory::default()
            .with_provider(DOCS, ProviderScript::ready(&["search"]))
            .without_transport(TransportKind::Streamable),
    );

    let outcome = h.manager.connect(DOCS, None).await.unwrap();

    assert!(!outcome.needs_auth());
    let kinds: Vec<TransportKind> = h.factory.attempts().into_iter().map(|(k, _)| k).collect();
    assert_eq!(kinds, vec![TransportKind::Streamable, TransportKind::Sse]);
}

#[tokio::test]
async fn test_no_transport_available() {
    let h = harness(
        FakeFactory::default()
            .with_provider(DOCS, ProviderScript::ready(&["search"]))
            .without_transport(TransportKind::Streamable)
            .without_transport(TransportKind::Sse),
    );

    let err = h.manager.connect(DOCS, None).await.unwrap_err();

    assert!(matches!(err, McpError::TransportConstruction(_)));
    assert!(h.store.list_connections().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let h = harness(FakeFactory::default().with_provider(DOCS, ProviderScript::ready(&["search"])));
    let id = h
        .manager
        .connect(DOCS, None)
        .await
        .unwrap()
        .connection_id()
        .to_string();

    assert!(h.manager.disconnect(&id).await.unwrap());
    assert!(!h.manager.disconnect(&id).await.unwrap());

    assert_eq!(h.factory.close_count(), 1);
    assert!(h.manager.get_connection(&id).is_none());
    assert!(h.store.get_connection(&id).await.unwrap().is_none());
    assert!(h.store.get_session(&id).await.unwrap().is_none());
    assert!(h.manager.get_all_tools().is_empty());
}

#[tokio::test]
async fn test_disconnect_unknown_has_no_side_effects() {
    let h = harness(FakeFactory::default().with_provider(DOCS, ProviderScript::ready(&["search"])));
    let id = h
        .manager
        .connect(DOCS, None)
        .await
        .unwrap()
        .connection_id()
        .to_string();

    assert!(!h.manager.disconnect("unknown").await.unwrap());

    assert_eq!(h.factory.close_count(), 0);
    assert_eq!(h.store.list_connections().await.unwrap().len(), 1);
    assert!(h.manager.get_connection(&id).is_some());
}

#[tokio::test]
async fn test_disconnect_pending_connection() {
    let h = harness(FakeFactory::default().with_provider(CALENDAR, ProviderScript::needs_auth(&["events"])));
    let id = h
        .manager
        .connect(CALENDAR, None)
        .await
        .unwrap()
        .connection_id()
        .to_string();

    assert!(h.manager.disconnect(&id).await.unwrap());
    assert!(!h.manager.is_pending(&id));
    assert!(h.store.get_connection(&id).await.unwrap().is_none());
    assert!(h.store.get_session(&id).await.unwrap().is_none());
}

/// Row store whose point reads fail; everything else goes to memory.
struct UnreadableRows {
    inner: Arc<MemoryStorage>,
}

#[async_trait]
impl ConnectionStorage for UnreadableRows {
    async fn list_connections(&self) -> StorageResult<Vec<ConnectionRecord>> {
        self.inner.list_connections().await
    }

    async fn get_connection(&self, _id: &str) -> StorageResult<Option<ConnectionRecord>> {
        Err(StorageError::StorageError("disk unavailable".to_string()))
    }

    async fn upsert_connection(&self, upsert: ConnectionUpsert) -> StorageResult<ConnectionRecord> {
        self.inner.upsert_connection(upsert).await
    }

    async fn update_connection_status(
        &self,
        id: &str,
        status: ConnectionStatus,
    ) -> StorageResult<bool> {
        self.inner.update_connection_status(id, status).await
    }

    async fn delete_connection(&self, id: &str) -> StorageResult<bool> {
        self.inner.delete_connection(id).await
    }
}

#[tokio::test]
async fn test_disconnect_closes_session_when_row_read_fails() {
    let store = Arc::new(MemoryStorage::new());
    let factory =
        Arc::new(FakeFactory::default().with_provider(DOCS, ProviderScript::ready(&["search"])));
    let rows = Arc::new(UnreadableRows {
        inner: store.clone(),
    });
    let manager =
        ConnectionManager::new(test_config(), factory.clone(), store.clone(), rows).unwrap();

    let id = manager
        .connect(DOCS, None)
        .await
        .unwrap()
        .connection_id()
        .to_string();

    assert!(manager.disconnect(&id).await.unwrap());

    assert_eq!(factory.close_count(), 1);
    assert!(manager.get_connection(&id).is_none());
    assert!(manager.get_all_tools().is_empty());
    assert!(store.get_connection(&id).await.unwrap().is_none());
}

async fn seed_row(store: &MemoryStorage, id: &str, url: &str, with_tokens: bool) {
    store
        .upsert_connection(ConnectionUpsert::new(
            id,
            url,
            id,
            ConnectionStatus::Connected,
        ))
        .await
        .unwrap();
    if with_tokens {
        store
            .upsert_session(id, OAuthSessionUpdate::tokens(tokens("saved")))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_recovery_isolates_failures() {
    let store = Arc::new(MemoryStorage::new());
    seed_row(&store, "docs", DOCS, true).await;
    seed_row(&store, "calendar", CALENDAR, false).await;
    seed_row(&store, "down", DOWN, true).await;

    let h = harness_with_store(
        FakeFactory::default()
            .with_provider(DOCS, ProviderScript::ready(&["search"]))
            .with_provider(CALENDAR, ProviderScript::needs_auth(&["events"]))
            .with_provider(
                DOWN,
                ProviderScript::ready(&["ping"]).with_behavior(Behavior::Unreachable),
            ),
        store.clone(),
    );

    let outcomes = h.manager.reconnect_saved_connections().await.unwrap();

    let status_of = |id: &str| {
        outcomes
            .iter()
            .find(|o| o.id == id)
            .map(|o| o.status)
            .unwrap()
    };
    assert_eq!(outcomes.len(), 3);
    assert_eq!(status_of("docs"), ConnectionStatus::Connected);
    assert_eq!(status_of("calendar"), ConnectionStatus::Disconnected);
    assert_eq!(status_of("down"), ConnectionStatus::Disconnected);

    // No tokens: the provider is never contacted
    assert!(!h.factory.attempted_urls().contains(&CALENDAR.to_string()));

    for (id, expected) in [
        ("docs", ConnectionStatus::Connected),
        ("calendar", ConnectionStatus::Disconnected),
        ("down", ConnectionStatus::Disconnected),
    ] {
        let row = store.get_connection(id).await.unwrap().unwrap();
        assert_eq!(row.status, expected, "row {}", id);
    }

    let names: Vec<String> = h
        .manager
        .get_all_tools()
        .iter()
        .map(|e| e.name.to_string())
        .collect();
    assert_eq!(names, vec!["docs__search".to_string()]);

    // An unreachable provider invalidates what was stored for it
    assert!(store.get_session("down").await.unwrap().is_none());
    assert!(store.get_session("docs").await.unwrap().is_some());
}

#[tokio::test]
async fn test_recovery_purges_credentials_on_protocol_error() {
    const BROKEN: &str = "https://broken.example.com/mcp";
    let store = Arc::new(MemoryStorage::new());
    seed_row(&store, "broken", BROKEN, true).await;

    let h = harness_with_store(
        FakeFactory::default().with_provider(
            BROKEN,
            ProviderScript::ready(&["ping"]).with_behavior(Behavior::Broken),
        ),
        store.clone(),
    );

    let outcomes = h.manager.reconnect_saved_connections().await.unwrap();

    assert_eq!(outcomes[0].status, ConnectionStatus::Disconnected);
    assert!(store.get_session("broken").await.unwrap().is_none());
    // The row survives so the user can re-authorize it
    let row = store.get_connection("broken").await.unwrap().unwrap();
    assert_eq!(row.status, ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_recovery_keeps_credentials_when_no_transport_builds() {
    let store = Arc::new(MemoryStorage::new());
    seed_row(&store, "docs", DOCS, true).await;

    let h = harness_with_store(
        FakeFactory::default()
            .without_transport(TransportKind::Streamable)
            .without_transport(TransportKind::Sse),
        store.clone(),
    );

    let outcomes = h.manager.reconnect_saved_connections().await.unwrap();

    assert_eq!(outcomes[0].status, ConnectionStatus::Disconnected);
    assert!(store.get_session("docs").await.unwrap().is_some());
}

#[tokio::test]
async fn test_recovery_skips_live_connections() {
    let h = harness(FakeFactory::default().with_provider(DOCS, ProviderScript::ready(&["search"])));
    let id = h
        .manager
        .connect(DOCS, None)
        .await
        .unwrap()
        .connection_id()
        .to_string();

    let outcomes = h.manager.reconnect_saved_connections().await.unwrap();

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].id, id);
    assert_eq!(outcomes[0].status, ConnectionStatus::Connected);
    assert_eq!(h.factory.attempts().len(), 1);
}

#[tokio::test]
async fn test_call_tool_routing() {
    let h = harness(FakeFactory::default().with_provider(DOCS, ProviderScript::ready(&["search"])));
    let id = h
        .manager
        .connect(DOCS, None)
        .await
        .unwrap()
        .connection_id()
        .to_string();

    let args = json!({"query": "rust"}).as_object().cloned();
    let result = h
        .manager
        .call_tool(&format!("{}__search", id), args)
        .await
        .unwrap();
    assert_eq!(result.is_error, Some(false));

    let calls = h.factory.log.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, "search");
    assert_eq!(calls[0].2, json!({"query": "rust"}));

    assert!(matches!(
        h.manager.call_tool("search", None).await,
        Err(McpError::InvalidToolName(_))
    ));
    assert!(matches!(
        h.manager.call_tool(&format!("{}__missing", id), None).await,
        Err(McpError::ToolNotFound(_))
    ));
    assert!(matches!(
        h.manager.call_tool("other__search", None).await,
        Err(McpError::ConnectionNotFound(_))
    ));
}

#[tokio::test]
async fn test_list_connections_reports_tool_counts() {
    let h = harness(
        FakeFactory::default()
            .with_provider(DOCS, ProviderScript::ready(&["search", "fetch"]))
            .with_provider(CALENDAR, ProviderScript::needs_auth(&["events"])),
    );
    let docs = h.manager.connect(DOCS, Some("Docs")).await.unwrap();
    let calendar = h.manager.connect(CALENDAR, Some("Calendar")).await.unwrap();

    let summaries = h.manager.list_connections().await.unwrap();

    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].id, docs.connection_id());
    assert_eq!(summaries[0].tool_count, 2);
    assert_eq!(summaries[1].id, calendar.connection_id());
    assert_eq!(summaries[1].status, ConnectionStatus::PendingAuth);
    assert_eq!(summaries[1].tool_count, 0);
}

#[tokio::test]
async fn test_refresh_tools() {
    let h = harness(FakeFactory::default().with_provider(DOCS, ProviderScript::ready(&["search"])));
    let id = h
        .manager
        .connect(DOCS, None)
        .await
        .unwrap()
        .connection_id()
        .to_string();

    let tools = h.manager.refresh_tools(&id).await.unwrap();
    assert_eq!(tools.len(), 1);
    assert!(matches!(
        h.manager.refresh_tools("missing").await,
        Err(McpError::ConnectionNotFound(_))
    ));
}

#[tokio::test]
async fn test_shutdown_keeps_rows() {
    let h = harness(FakeFactory::default().with_provider(DOCS, ProviderScript::ready(&["search"])));
    let id = h
        .manager
        .connect(DOCS, None)
        .await
        .unwrap()
        .connection_id()
        .to_string();

    h.manager.shutdown().await;

    assert_eq!(h.factory.close_count(), 1);
    assert!(h.manager.get_all_tools().is_empty());
    assert!(h.store.get_connection(&id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_concurrent_connects_get_distinct_ids() {
    let h = harness(FakeFactory::default().with_provider(DOCS, ProviderScript::ready(&["search"])));

    let (a, b) = tokio::join!(h.manager.connect(DOCS, None), h.manager.connect(DOCS, None));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_ne!(a.connection_id(), b.connection_id());
    assert_eq!(h.manager.get_all_tools().len(), 2);
}
