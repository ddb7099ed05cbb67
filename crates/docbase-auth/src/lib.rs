//! Credential provider interface (spec §6).
//!
//! `docbase-transport` and `docbase-client` depend only on the
//! [`TokenSource`] trait; concrete providers (a local credential file,
//! a refresh-token exchange, a metadata-server client) live outside this
//! crate and are free to consult whatever the host environment offers.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;

/// Options recognized by [`TokenSource`] implementations, attached to a
/// call rather than to process-global state (spec §6).
#[derive(Debug, Clone, Default)]
pub struct TokenSourceOptions {
    /// Overrides the metadata server URL consulted by ADC-style
    /// providers.
    pub metadata_url: Option<String>,
    /// Skips application-default-credential discovery entirely.
    pub skip_adc: bool,
}

/// Supplies bearer tokens and the bound project id to the request
/// engine and client.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Returns a bearer token valid for the current request.
    async fn access_token(&self, opts: &TokenSourceOptions) -> docbase_error::Result<String>;

    /// Returns the project id this source is bound to.
    async fn project_id(&self, opts: &TokenSourceOptions) -> docbase_error::Result<String>;
}

/// A [`TokenSource`] that always returns the same token and project id.
///
/// Intended for tests and for environments (emulators, service accounts
/// fronted by a sidecar) where no token refresh is needed.
#[derive(Debug, Clone)]
pub struct StaticTokenSource {
    token: String,
    project_id: String,
}

impl StaticTokenSource {
    /// Build a source that always returns `token` and `project_id`.
    pub fn new(token: impl Into<String>, project_id: impl Into<String>) -> Self {
        StaticTokenSource {
            token: token.into(),
            project_id: project_id.into(),
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn access_token(&self, _opts: &TokenSourceOptions) -> docbase_error::Result<String> {
        Ok(self.token.clone())
    }

    async fn project_id(&self, _opts: &TokenSourceOptions) -> docbase_error::Result<String> {
        Ok(self.project_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_source_returns_configured_token_and_project() {
        let source = StaticTokenSource::new("tok-123", "proj-a");
        let opts = TokenSourceOptions::default();
        assert_eq!(source.access_token(&opts).await.unwrap(), "tok-123");
        assert_eq!(source.project_id(&opts).await.unwrap(), "proj-a");
    }
}
