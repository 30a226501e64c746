//! Scripted providers, session factory and chat model for integration tests.

#![allow(dead_code)]

use std::{
    borrow::Cow,
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use data_connector::{MemoryStorage, OAuthTokens};
use rmcp::model::Content;
use serde_json::{json, Value};
use toolbridge_mcp::{
    AuthMode, CallToolResult, ConnectionManager, JsonObject, LlmBackend, McpConfig, McpError,
    McpResult, McpSession, OAuthClientProvider, RetryConfig, SessionFactory, Tool, TransportKind,
};
use toolbridge_protocol::{ChatCompletionRequest, ChatMessage, ToolCall};

pub const AUTH_URL: &str = "https://auth.example.com/authorize?client_id=test";

pub fn create_test_tool(name: &str) -> Tool {
    let schema = json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "properties": {"query": {"type": "string"}},
        "required": ["query"]
    });
    Tool {
        name: Cow::Owned(name.to_string()),
        title: None,
        description: Some(Cow::Owned(format!("Test tool: {}", name))),
        input_schema: Arc::new(schema.as_object().cloned().unwrap_or_default()),
        output_schema: None,
        annotations: None,
        icons: None,
    }
}

pub fn tokens(access: &str) -> OAuthTokens {
    OAuthTokens {
        access_token: access.to_string(),
        token_type: "Bearer".to_string(),
        expires_in: Some(3600),
        refresh_token: None,
        scope: None,
    }
}

/// How a scripted provider answers `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Ready,
    /// Needs tokens; captures an authorization URL when asked interactively.
    NeedsAuth { capture_url: bool },
    Unreachable,
    /// Answers the handshake with garbage.
    Broken,
}

#[derive(Debug, Clone)]
pub struct ProviderScript {
    pub behavior: Behavior,
    pub tools: Vec<Tool>,
    /// Tool name -> transport-level failure message.
    pub failing_tools: HashMap<String, String>,
    /// Tools whose result is flagged `is_error` by the provider.
    pub error_result_tools: Vec<String>,
}

impl ProviderScript {
    pub fn ready(tools: &[&str]) -> Self {
        Self {
            behavior: Behavior::Ready,
            tools: tools.iter().map(|t| create_test_tool(t)).collect(),
            failing_tools: HashMap::new(),
            error_result_tools: Vec::new(),
        }
    }

    pub fn needs_auth(tools: &[&str]) -> Self {
        Self {
            behavior: Behavior::NeedsAuth { capture_url: true },
            ..Self::ready(tools)
        }
    }

    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn with_failing_tool(mut self, tool: &str, message: &str) -> Self {
        self.failing_tools
            .insert(tool.to_string(), message.to_string());
        self
    }

    pub fn with_error_result_tool(mut self, tool: &str) -> Self {
        self.error_result_tools.push(tool.to_string());
        self
    }
}

/// Every call a provider received, across sessions.
#[derive(Default)]
pub struct CallLog {
    pub calls: Mutex<Vec<(String, String, Value)>>,
}

impl CallLog {
    pub fn calls(&self) -> Vec<(String, String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

pub struct FakeSession {
    kind: TransportKind,
    url: String,
    script: ProviderScript,
    provider: Arc<dyn OAuthClientProvider>,
    open: Mutex<bool>,
    closes: Arc<AtomicUsize>,
    log: Arc<CallLog>,
}

#[async_trait]
impl McpSession for FakeSession {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn open(&self, mode: AuthMode) -> McpResult<()> {
        match self.script.behavior {
            Behavior::Ready => {}
            Behavior::Unreachable => {
                return Err(McpError::ProviderUnreachable(format!(
                    "connection refused: {}",
                    self.url
                )))
            }
            Behavior::Broken => {
                return Err(McpError::ProviderProtocol(format!(
                    "unexpected handshake reply from {}",
                    self.url
                )))
            }
            Behavior::NeedsAuth { capture_url } => {
                if self.provider.tokens().await?.is_none() {
                    if mode == AuthMode::Interactive && capture_url {
                        self.provider.save_code_verifier("test-verifier").await?;
                        self.provider.redirect_to_authorization(AUTH_URL).await?;
                    }
                    return Err(McpError::AuthorizationRequired(self.url.clone()));
                }
            }
        }
        *self.open.lock().unwrap() = true;
        Ok(())
    }

    async fn finish_auth(&self, authorization_code: &str) -> McpResult<()> {
        self.provider.code_verifier().await?;
        if authorization_code == "bad-code" {
            return Err(McpError::OAuth("invalid_grant".to_string()));
        }
        self.provider
            .save_tokens(tokens(&format!("token-for-{}", authorization_code)))
            .await
    }

    async fn list_tools(&self) -> McpResult<Vec<Tool>> {
        if !*self.open.lock().unwrap() {
            return Err(McpError::ProviderProtocol("session is not open".to_string()));
        }
        Ok(self.script.tools.clone())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> McpResult<CallToolResult> {
        let args = Value::Object(arguments.unwrap_or_default());
        self.log
            .calls
            .lock()
            .unwrap()
            .push((self.url.clone(), name.to_string(), args.clone()));

        if let Some(message) = self.script.failing_tools.get(name) {
            return Err(McpError::ToolExecution(message.clone()));
        }
        if self.script.error_result_tools.iter().any(|t| t == name) {
            return Ok(CallToolResult::error(vec![Content::text(format!(
                "{} rejected the request",
                name
            ))]));
        }
        Ok(CallToolResult::success(vec![Content::text(format!(
            "{} result for {}",
            name, args
        ))]))
    }

    async fn close(&self) -> McpResult<()> {
        *self.open.lock().unwrap() = false;
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Session factory over scripted providers keyed by URL.
#[derive(Default)]
pub struct FakeFactory {
    scripts: Mutex<HashMap<String, ProviderScript>>,
    unsupported: Mutex<Vec<TransportKind>>,
    attempts: Mutex<Vec<(TransportKind, String)>>,
    pub closes: Arc<AtomicUsize>,
    pub log: Arc<CallLog>,
}

impl FakeFactory {
    pub fn with_provider(self, url: &str, script: ProviderScript) -> Self {
        self.scripts.lock().unwrap().insert(url.to_string(), script);
        self
    }

    pub fn without_transport(self, kind: TransportKind) -> Self {
        self.unsupported.lock().unwrap().push(kind);
        self
    }

    pub fn attempts(&self) -> Vec<(TransportKind, String)> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempted_urls(&self) -> Vec<String> {
        self.attempts().into_iter().map(|(_, url)| url).collect()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl SessionFactory for FakeFactory {
    fn create(
        &self,
        kind: TransportKind,
        url: &str,
        provider: Arc<dyn OAuthClientProvider>,
    ) -> McpResult<Arc<dyn McpSession>> {
        self.attempts.lock().unwrap().push((kind, url.to_string()));
        if self.unsupported.lock().unwrap().contains(&kind) {
            return Err(McpError::TransportConstruction(format!(
                "{} not supported",
                kind
            )));
        }
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| McpError::TransportConstruction(format!("unknown url {}", url)))?;
        Ok(Arc::new(FakeSession {
            kind,
            url: url.to_string(),
            script,
            provider,
            open: Mutex::new(false),
            closes: self.closes.clone(),
            log: self.log.clone(),
        }))
    }
}

pub struct Harness {
    pub manager: Arc<ConnectionManager>,
    pub factory: Arc<FakeFactory>,
    pub store: Arc<MemoryStorage>,
}

pub fn test_config() -> McpConfig {
    McpConfig {
        retry: RetryConfig::disabled(),
        ..Default::default()
    }
}

pub fn harness(factory: FakeFactory) -> Harness {
    harness_with_store(factory, Arc::new(MemoryStorage::new()))
}

pub fn harness_with_store(factory: FakeFactory, store: Arc<MemoryStorage>) -> Harness {
    let factory = Arc::new(factory);
    let manager = ConnectionManager::new(
        test_config(),
        factory.clone(),
        store.clone(),
        store.clone(),
    )
    .unwrap();
    Harness {
        manager: Arc::new(manager),
        factory,
        store,
    }
}

/// Chat model that replays queued replies and records every request.
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<McpResult<ChatMessage>>>,
    /// Returned once the queue is empty.
    repeat: Mutex<Option<ChatMessage>>,
    requests: Mutex<Vec<ChatCompletionRequest>>,
}

impl ScriptedLlm {
    pub fn replying(replies: Vec<ChatMessage>) -> Self {
        let llm = Self::default();
        llm.replies
            .lock()
            .unwrap()
            .extend(replies.into_iter().map(Ok));
        llm
    }

    pub fn repeating(reply: ChatMessage) -> Self {
        let llm = Self::default();
        *llm.repeat.lock().unwrap() = Some(reply);
        llm
    }

    pub fn failing(message: &str) -> Self {
        let llm = Self::default();
        llm.replies
            .lock()
            .unwrap()
            .push_back(Err(McpError::Llm(message.to_string())));
        llm
    }

    pub fn requests(&self) -> Vec<ChatCompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmBackend for ScriptedLlm {
    async fn complete(&self, request: ChatCompletionRequest) -> McpResult<ChatMessage> {
        self.requests.lock().unwrap().push(request);
        if let Some(reply) = self.replies.lock().unwrap().pop_front() {
            return reply;
        }
        self.repeat
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| McpError::Llm("script exhausted".to_string()))
    }
}

pub fn tool_call_reply(calls: &[(&str, &str, Value)]) -> ChatMessage {
    ChatMessage::assistant_tool_calls(
        None,
        calls
            .iter()
            .map(|(id, name, args)| ToolCall::function(*id, *name, args.to_string()))
            .collect(),
    )
}
