//! OAuth client provider bound to one connection identifier.
//!
//! Every read and write goes straight to the credential store, so a restarted
//! process resumes a half-finished authorization without in-memory state.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use data_connector::{
    OAuthClientInformation, OAuthField, OAuthSessionStorage, OAuthSessionUpdate, OAuthTokens,
};
use rand::RngCore;
use serde::Serialize;
use tracing::debug;

use crate::error::{McpError, McpResult};

/// Which part of the stored credentials to discard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialScope {
    /// Delete the whole record.
    All,
    Tokens,
    Client,
    Verifier,
}

/// Metadata sent during dynamic client registration.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OAuthClientMetadata {
    pub client_name: String,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: String,
}

/// Storage-facing half of an OAuth 2.1 client.
///
/// The protocol steps live in [`super::OAuthFlow`]; this trait only says where
/// credentials come from and where they go.
#[async_trait]
pub trait OAuthClientProvider: Send + Sync {
    fn connection_id(&self) -> &str;

    fn redirect_url(&self) -> &str;

    fn client_metadata(&self) -> OAuthClientMetadata;

    /// Issue a fresh state nonce and remember it.
    async fn state(&self) -> McpResult<String>;

    async fn client_information(&self) -> McpResult<Option<OAuthClientInformation>>;

    async fn save_client_information(&self, info: OAuthClientInformation) -> McpResult<()>;

    async fn tokens(&self) -> McpResult<Option<OAuthTokens>>;

    async fn save_tokens(&self, tokens: OAuthTokens) -> McpResult<()>;

    async fn save_code_verifier(&self, verifier: &str) -> McpResult<()>;

    /// Fails with [`McpError::CodeVerifierMissing`] when none is stored.
    async fn code_verifier(&self) -> McpResult<String>;

    /// Capture the authorization URL instead of navigating to it.
    async fn redirect_to_authorization(&self, authorization_url: &str) -> McpResult<()>;

    /// Read the captured authorization URL and clear it. Read-once.
    async fn take_authorization_url(&self) -> McpResult<Option<String>>;

    async fn invalidate_credentials(&self, scope: CredentialScope) -> McpResult<()>;
}

/// [`OAuthClientProvider`] backed by an [`OAuthSessionStorage`].
pub struct StoreOAuthProvider {
    connection_id: String,
    redirect_url: String,
    client_name: String,
    store: Arc<dyn OAuthSessionStorage>,
}

impl StoreOAuthProvider {
    pub fn new(
        connection_id: impl Into<String>,
        redirect_url: impl Into<String>,
        client_name: impl Into<String>,
        store: Arc<dyn OAuthSessionStorage>,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            redirect_url: redirect_url.into(),
            client_name: client_name.into(),
            store,
        }
    }

    async fn update(&self, update: OAuthSessionUpdate) -> McpResult<()> {
        self.store
            .upsert_session(&self.connection_id, update)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl OAuthClientProvider for StoreOAuthProvider {
    fn connection_id(&self) -> &str {
        &self.connection_id
    }

    fn redirect_url(&self) -> &str {
        &self.redirect_url
    }

    fn client_metadata(&self) -> OAuthClientMetadata {
        OAuthClientMetadata {
            client_name: self.client_name.clone(),
            redirect_uris: vec![self.redirect_url.clone()],
            grant_types: vec![
                "authorization_code".to_string(),
                "refresh_token".to_string(),
            ],
            response_types: vec!["code".to_string()],
            // Public client, PKCE only
            token_endpoint_auth_method: "none".to_string(),
        }
    }

    async fn state(&self) -> McpResult<String> {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        let state = URL_SAFE_NO_PAD.encode(bytes);
        self.update(OAuthSessionUpdate::state(state.clone())).await?;
        Ok(state)
    }

    async fn client_information(&self) -> McpResult<Option<OAuthClientInformation>> {
        Ok(self
            .store
            .get_session(&self.connection_id)
            .await?
            .and_then(|record| record.client_info))
    }

    async fn save_client_information(&self, info: OAuthClientInformation) -> McpResult<()> {
        self.update(OAuthSessionUpdate::client_info(info)).await
    }

    async fn tokens(&self) -> McpResult<Option<OAuthTokens>> {
        Ok(self
            .store
            .get_session(&self.connection_id)
            .await?
            .and_then(|record| record.tokens))
    }

    async fn save_tokens(&self, tokens: OAuthTokens) -> McpResult<()> {
        self.update(OAuthSessionUpdate::tokens(tokens)).await
    }

    async fn save_code_verifier(&self, verifier: &str) -> McpResult<()> {
        self.update(OAuthSessionUpdate::code_verifier(verifier))
            .await
    }

    async fn code_verifier(&self) -> McpResult<String> {
        self.store
            .get_session(&self.connection_id)
            .await?
            .and_then(|record| record.code_verifier)
            .ok_or_else(|| McpError::CodeVerifierMissing(self.connection_id.clone()))
    }

    async fn redirect_to_authorization(&self, authorization_url: &str) -> McpResult<()> {
        debug!(
            connection_id = %self.connection_id,
            "Captured authorization URL"
        );
        self.update(OAuthSessionUpdate::authorization_url(authorization_url))
            .await
    }

    async fn take_authorization_url(&self) -> McpResult<Option<String>> {
        let url = self
            .store
            .get_session(&self.connection_id)
            .await?
            .and_then(|record| record.authorization_url);
        if url.is_some() {
            self.store
                .clear_session_field(&self.connection_id, OAuthField::AuthorizationUrl)
                .await?;
        }
        Ok(url)
    }

    async fn invalidate_credentials(&self, scope: CredentialScope) -> McpResult<()> {
        debug!(connection_id = %self.connection_id, ?scope, "Invalidating credentials");
        let field = match scope {
            CredentialScope::All => {
                self.store.delete_session(&self.connection_id).await?;
                return Ok(());
            }
            CredentialScope::Tokens => OAuthField::Tokens,
            CredentialScope::Client => OAuthField::ClientInfo,
            CredentialScope::Verifier => OAuthField::CodeVerifier,
        };
        self.store
            .clear_session_field(&self.connection_id, field)
            .await?;
        Ok(())
    }
}
