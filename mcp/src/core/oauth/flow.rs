//! OAuth 2.1 authorization code flow with PKCE for remote MCP providers.
//!
//! Discovery follows the MCP authorization profile:
//! `/.well-known/oauth-protected-resource` names the authorization server,
//! whose `/.well-known/oauth-authorization-server` document names the
//! endpoints. Servers that publish neither get the default endpoint layout
//! at the provider origin.

use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use data_connector::{OAuthClientInformation, OAuthTokens};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use super::provider::{CredentialScope, OAuthClientProvider};
use crate::error::{McpError, McpResult};

/// Discovered from /.well-known/oauth-protected-resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub authorization_servers: Vec<String>,
    #[serde(default)]
    pub scopes_supported: Vec<String>,
}

/// Discovered from /.well-known/oauth-authorization-server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthorizationServerMetadata {
    #[serde(default)]
    pub issuer: Option<String>,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub registration_endpoint: Option<String>,
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,
    #[serde(default)]
    pub scopes_supported: Vec<String>,
}

impl AuthorizationServerMetadata {
    /// Default endpoint layout when the server publishes no metadata.
    pub fn fallback(origin: &str) -> Self {
        let origin = origin.trim_end_matches('/');
        Self {
            issuer: Some(origin.to_string()),
            authorization_endpoint: format!("{}/authorize", origin),
            token_endpoint: format!("{}/token", origin),
            registration_endpoint: Some(format!("{}/register", origin)),
            code_challenge_methods_supported: vec!["S256".to_string()],
            scopes_supported: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClientRegistrationResponse {
    client_id: String,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    client_id_issued_at: Option<u64>,
    #[serde(default)]
    client_secret_expires_at: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    fn into_tokens(self, previous_refresh: Option<String>) -> OAuthTokens {
        OAuthTokens {
            access_token: self.access_token,
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expires_in: self.expires_in,
            // Servers may omit the refresh token on refresh; keep the old one.
            refresh_token: self.refresh_token.or(previous_refresh),
            scope: self.scope,
        }
    }
}

/// PKCE verifier and S256 challenge.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
}

impl PkceChallenge {
    pub fn generate() -> Self {
        let mut verifier_bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut verifier_bytes);
        let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);
        let challenge = Self::challenge_for(&verifier);
        Self {
            verifier,
            challenge,
        }
    }

    pub fn challenge_for(verifier: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }
}

/// Build the authorization URL with all required parameters.
pub fn build_authorization_url(
    metadata: &AuthorizationServerMetadata,
    client_id: &str,
    redirect_uri: &str,
    pkce: &PkceChallenge,
    state: &str,
    resource: &str,
) -> McpResult<Url> {
    let mut url = Url::parse(&metadata.authorization_endpoint)
        .map_err(|e| McpError::OAuth(format!("invalid authorization endpoint: {}", e)))?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("response_type", "code")
            .append_pair("client_id", client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("state", state)
            .append_pair("resource", resource);
        if !metadata.scopes_supported.is_empty() {
            query.append_pair("scope", &metadata.scopes_supported.join(" "));
        }
    }
    Ok(url)
}

fn origin_of(server_url: &str) -> McpResult<String> {
    let parsed = Url::parse(server_url)
        .map_err(|e| McpError::OAuth(format!("invalid server URL '{}': {}", server_url, e)))?;
    Ok(parsed.origin().ascii_serialization())
}

/// Protocol half of the OAuth client. Credentials go through an
/// [`OAuthClientProvider`]; this type only talks HTTP.
pub struct OAuthFlow {
    http: reqwest::Client,
    metadata: RwLock<Option<AuthorizationServerMetadata>>,
}

impl OAuthFlow {
    pub fn new() -> McpResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| McpError::OAuth(format!("build HTTP client: {}", e)))?;
        Ok(Self::with_client(http))
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self {
            http,
            metadata: RwLock::new(None),
        }
    }

    /// Authorization server metadata for `server_url`, cached after first use.
    pub async fn discover(&self, server_url: &str) -> McpResult<AuthorizationServerMetadata> {
        if let Some(metadata) = self.metadata.read().await.clone() {
            return Ok(metadata);
        }

        let origin = origin_of(server_url)?;
        let auth_server = match self.discover_protected_resource(&origin).await {
            Some(resource) => resource
                .authorization_servers
                .into_iter()
                .next()
                .unwrap_or_else(|| origin.clone()),
            None => origin.clone(),
        };

        let metadata = match self.discover_authorization_server(&auth_server).await {
            Some(metadata) => metadata,
            None => {
                debug!(%auth_server, "No authorization server metadata, using default endpoints");
                AuthorizationServerMetadata::fallback(&auth_server)
            }
        };

        *self.metadata.write().await = Some(metadata.clone());
        Ok(metadata)
    }

    async fn discover_protected_resource(&self, origin: &str) -> Option<ProtectedResourceMetadata> {
        let url = format!("{}/.well-known/oauth-protected-resource", origin);
        let response = self.http.get(&url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.json().await.ok()
    }

    async fn discover_authorization_server(
        &self,
        auth_server: &str,
    ) -> Option<AuthorizationServerMetadata> {
        let url = format!(
            "{}/.well-known/oauth-authorization-server",
            auth_server.trim_end_matches('/')
        );
        let response = self.http.get(&url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        match response.json().await {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                warn!(%url, error = %e, "Invalid authorization server metadata");
                None
            }
        }
    }

    /// Stored client registration, or a new one via dynamic client registration.
    async fn ensure_client(
        &self,
        metadata: &AuthorizationServerMetadata,
        provider: &dyn OAuthClientProvider,
    ) -> McpResult<OAuthClientInformation> {
        if let Some(info) = provider.client_information().await? {
            return Ok(info);
        }

        let endpoint = metadata.registration_endpoint.as_deref().ok_or_else(|| {
            McpError::OAuth(
                "authorization server does not support dynamic client registration".to_string(),
            )
        })?;

        let response = self
            .http
            .post(endpoint)
            .json(&provider.client_metadata())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::OAuth(format!(
                "client registration failed: HTTP {} - {}",
                status, body
            )));
        }

        let registered: ClientRegistrationResponse = response
            .json()
            .await
            .map_err(|e| McpError::OAuth(format!("invalid registration response: {}", e)))?;

        let info = OAuthClientInformation {
            client_id: registered.client_id,
            client_secret: registered.client_secret,
            client_id_issued_at: registered.client_id_issued_at,
            client_secret_expires_at: registered.client_secret_expires_at,
        };
        info!(
            connection_id = %provider.connection_id(),
            client_id = %info.client_id,
            "Registered OAuth client"
        );
        provider.save_client_information(info.clone()).await?;
        Ok(info)
    }

    /// Prepare an authorization request and hand its URL to the provider.
    pub async fn start_authorization(
        &self,
        server_url: &str,
        provider: &dyn OAuthClientProvider,
    ) -> McpResult<Url> {
        let metadata = self.discover(server_url).await?;
        let client = self.ensure_client(&metadata, provider).await?;

        let pkce = PkceChallenge::generate();
        provider.save_code_verifier(&pkce.verifier).await?;
        let state = provider.state().await?;

        let url = build_authorization_url(
            &metadata,
            &client.client_id,
            provider.redirect_url(),
            &pkce,
            &state,
            server_url,
        )?;
        provider.redirect_to_authorization(url.as_str()).await?;
        Ok(url)
    }

    /// Exchange an authorization code for tokens and store them.
    pub async fn exchange_code(
        &self,
        server_url: &str,
        provider: &dyn OAuthClientProvider,
        code: &str,
    ) -> McpResult<OAuthTokens> {
        let metadata = self.discover(server_url).await?;
        let client = provider.client_information().await?.ok_or_else(|| {
            McpError::OAuth(format!(
                "no client registration stored for connection {}",
                provider.connection_id()
            ))
        })?;
        let verifier = provider.code_verifier().await?;

        let mut params = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
            ("redirect_uri", provider.redirect_url().to_string()),
            ("client_id", client.client_id.clone()),
            ("code_verifier", verifier),
            ("resource", server_url.to_string()),
        ];
        if let Some(secret) = client.client_secret {
            params.push(("client_secret", secret));
        }

        let tokens = self.token_request(&metadata.token_endpoint, &params, None).await?;
        provider.save_tokens(tokens.clone()).await?;
        provider
            .invalidate_credentials(CredentialScope::Verifier)
            .await?;
        info!(connection_id = %provider.connection_id(), "Exchanged authorization code for tokens");
        Ok(tokens)
    }

    /// Refresh the stored access token.
    ///
    /// Returns `Ok(None)` when there is nothing to refresh. A rejected refresh
    /// discards the stored tokens and nothing else.
    pub async fn refresh(
        &self,
        server_url: &str,
        provider: &dyn OAuthClientProvider,
    ) -> McpResult<Option<OAuthTokens>> {
        let Some(refresh_token) = provider.tokens().await?.and_then(|t| t.refresh_token) else {
            return Ok(None);
        };
        let Some(client) = provider.client_information().await? else {
            return Ok(None);
        };
        let metadata = self.discover(server_url).await?;

        let mut params = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.clone()),
            ("client_id", client.client_id.clone()),
            ("resource", server_url.to_string()),
        ];
        if let Some(secret) = client.client_secret {
            params.push(("client_secret", secret));
        }

        match self
            .token_request(&metadata.token_endpoint, &params, Some(refresh_token))
            .await
        {
            Ok(tokens) => {
                provider.save_tokens(tokens.clone()).await?;
                debug!(connection_id = %provider.connection_id(), "Refreshed access token");
                Ok(Some(tokens))
            }
            Err(e) => {
                warn!(
                    connection_id = %provider.connection_id(),
                    error = %e,
                    "Token refresh rejected, discarding tokens"
                );
                provider
                    .invalidate_credentials(CredentialScope::Tokens)
                    .await?;
                Err(e)
            }
        }
    }

    async fn token_request(
        &self,
        token_endpoint: &str,
        params: &[(&str, String)],
        previous_refresh: Option<String>,
    ) -> McpResult<OAuthTokens> {
        let response = self.http.post(token_endpoint).form(params).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::OAuth(format!(
                "token request failed: HTTP {} - {}",
                status, body
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| McpError::OAuth(format!("invalid token response: {}", e)))?;
        Ok(token_response.into_tokens(previous_refresh))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pkce_challenge_matches_verifier() {
        let pkce = PkceChallenge::generate();
        assert_eq!(pkce.verifier.len(), 43);
        assert_eq!(pkce.challenge, PkceChallenge::challenge_for(&pkce.verifier));
        assert!(!pkce.challenge.contains('='));
    }

    #[test]
    fn test_rfc7636_challenge() {
        // Appendix B of RFC 7636
        assert_eq!(
            PkceChallenge::challenge_for("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_fallback_endpoints() {
        let metadata = AuthorizationServerMetadata::fallback("https://tools.example.com/");
        assert_eq!(
            metadata.authorization_endpoint,
            "https://tools.example.com/authorize"
        );
        assert_eq!(metadata.token_endpoint, "https://tools.example.com/token");
        assert_eq!(
            metadata.registration_endpoint.as_deref(),
            Some("https://tools.example.com/register")
        );
    }

    #[test]
    fn test_build_authorization_url() {
        let metadata = AuthorizationServerMetadata::fallback("https://auth.example.com");
        let pkce = PkceChallenge {
            verifier: "v".to_string(),
            challenge: "c".to_string(),
        };
        let url = build_authorization_url(
            &metadata,
            "client 1",
            "http://localhost:3000/callback",
            &pkce,
            "nonce",
            "https://tools.example.com/mcp",
        )
        .unwrap();

        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(url.path(), "/authorize");
        assert_eq!(pairs["client_id"], "client 1");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["code_challenge"], "c");
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["state"], "nonce");
        assert_eq!(pairs["redirect_uri"], "http://localhost:3000/callback");
        assert!(!pairs.contains_key("scope"));
    }

    #[test]
    fn test_refresh_keeps_previous_refresh_token() {
        let response = TokenResponse {
            access_token: "new".to_string(),
            token_type: None,
            expires_in: Some(60),
            refresh_token: None,
            scope: None,
        };
        let tokens = response.into_tokens(Some("old-refresh".to_string()));
        assert_eq!(tokens.token_type, "Bearer");
        assert_eq!(tokens.refresh_token.as_deref(), Some("old-refresh"));
    }

    #[test]
    fn test_origin_strips_path() {
        assert_eq!(
            origin_of("https://tools.example.com:8443/v1/mcp").unwrap(),
            "https://tools.example.com:8443"
        );
        assert!(origin_of("not a url").is_err());
    }
}
