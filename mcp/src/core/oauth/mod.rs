//! OAuth client for remote MCP providers.

mod flow;
mod provider;

pub use flow::{
    build_authorization_url, AuthorizationServerMetadata, OAuthFlow, PkceChallenge,
    ProtectedResourceMetadata,
};
pub use provider::{
    CredentialScope, OAuthClientMetadata, OAuthClientProvider, StoreOAuthProvider,
};
