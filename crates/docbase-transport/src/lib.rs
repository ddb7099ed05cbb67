//! Authenticated request engine (spec §4.4 / C4).
//!
//! This is the single primitive every client operation and the
//! transaction protocol are built on: one authenticated, retrying POST,
//! with the status classification and bounded-read rules spec §4.4
//! mandates.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cancel;
pub mod endpoints;
mod retry;

use std::time::Duration;

use docbase_error::{DocbaseError, ErrorKind};
use futures::TryStreamExt;
use thiserror::Error;
use tracing::{debug, warn};

pub use cancel::CancellationToken;
pub use endpoints::{Endpoints, routing_header_value};
pub use retry::{RetryConfig, compute_delay};

/// Narrow, crate-local failure modes of issuing and reading one HTTP
/// request, kept separate from [`DocbaseError`]'s broader taxonomy and
/// converted into it at this crate's boundary (mirroring
/// `abp-config::ConfigError` converting into `abp-error::AbpError`).
#[derive(Debug, Error)]
enum TransportError {
    #[error("http request failed")]
    Http(#[from] reqwest::Error),
    #[error("response exceeded the bounded read cap of {cap_bytes} bytes")]
    ResponseTooLarge { cap_bytes: usize },
}

impl From<TransportError> for DocbaseError {
    fn from(err: TransportError) -> Self {
        match &err {
            TransportError::Http(_) => {
                let message = err.to_string();
                DocbaseError::new(ErrorKind::ServerError, message).with_source(err)
            }
            TransportError::ResponseTooLarge { cap_bytes } => {
                DocbaseError::new(ErrorKind::ServerError, "response exceeded the bounded read cap")
                    .with_context("cap_bytes", *cap_bytes)
            }
        }
    }
}

/// A single authenticated POST to one of docbase's service endpoints,
/// with retry/backoff, status classification, and bounded reads.
#[derive(Debug, Clone)]
pub struct RequestEngine {
    http: reqwest::Client,
    config: RetryConfig,
}

impl RequestEngine {
    /// Build an engine from a retry/timing policy.
    pub fn new(config: RetryConfig) -> Self {
        RequestEngine {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// This engine's retry/timing policy.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Issue `body` as an authenticated POST to `url`, retrying
    /// transient failures per the configured policy.
    ///
    /// When `database_id` is non-empty, the routing header
    /// `X-Goog-Request-Params` is attached (spec §6).
    pub async fn do_request(
        &self,
        cancel: &CancellationToken,
        url: &url::Url,
        body: &serde_json::Value,
        token: &str,
        project_id: &str,
        database_id: Option<&str>,
    ) -> docbase_error::Result<Vec<u8>> {
        let mut failed_count = 0u32;
        let mut last_err: Option<DocbaseError> = None;

        for attempt in 0..self.config.max_attempts {
            if cancel.is_cancelled() {
                return Err(cancelled_error());
            }

            debug!(target: "docbase.transport", attempt, url = %url, "issuing request");

            match self
                .attempt_once(cancel, url, body, token, project_id, database_id)
                .await
            {
                Ok(bytes) => return Ok(bytes),
                Err(err) if err.kind() == ErrorKind::Cancelled => return Err(err),
                Err(err) if !err.request_retriable() => return Err(err),
                Err(err) => {
                    failed_count += 1;
                    let is_last = attempt + 1 >= self.config.max_attempts;
                    if is_last {
                        warn!(
                            target: "docbase.transport",
                            error = %err,
                            attempt,
                            "retries exhausted"
                        );
                        return Err(DocbaseError::new(
                            ErrorKind::ServerError,
                            "all retry attempts exhausted",
                        )
                        .with_context("attempts", self.config.max_attempts)
                        .with_context("last_error", err.to_string())
                        .with_source(err));
                    }

                    let delay = compute_delay(&self.config, failed_count);
                    warn!(
                        target: "docbase.transport",
                        error = %err,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retryable error, backing off"
                    );
                    last_err = Some(err);

                    if !sleep_cancellable(delay, cancel).await {
                        return Err(cancelled_error());
                    }
                }
            }
        }

        // Unreachable given max_attempts >= 1, but keep the type honest.
        Err(last_err.unwrap_or_else(|| {
            DocbaseError::new(ErrorKind::ServerError, "no attempts were made")
        })
        .with_context("project_id", project_id))
    }

    async fn attempt_once(
        &self,
        cancel: &CancellationToken,
        url: &url::Url,
        body: &serde_json::Value,
        token: &str,
        project_id: &str,
        database_id: Option<&str>,
    ) -> docbase_error::Result<Vec<u8>> {
        let mut request = self.http.post(url.clone()).bearer_auth(token).json(body);
        if let Some(db) = database_id {
            if !db.is_empty() {
                request = request.header("X-Goog-Request-Params", routing_header_value(project_id, db));
            }
        }

        let send = request.send();
        tokio::pin!(send);

        let response = tokio::select! {
            result = &mut send => result.map_err(TransportError::from)?,
            _ = cancel.cancelled() => return Err(cancelled_error()),
        };

        let status = response.status();

        if status.as_u16() == 200 {
            return self.read_bounded(response, cancel).await;
        }

        if status.is_success() {
            return Err(DocbaseError::new(
                ErrorKind::UnexpectedSuccess,
                "server returned an unexpected 2xx status",
            )
            .with_context("status", status.as_u16()));
        }

        // 409/ABORTED is a conflict only from the transaction loop's point
        // of view (spec §4.8); the request engine itself classifies it
        // the same as any other 4xx: no retry, client-error.
        if status.is_client_error() {
            let text = response.text().await.unwrap_or_default();
            if status.as_u16() == 404 {
                debug!(target: "docbase.transport", status = 404, "not found");
            } else {
                warn!(target: "docbase.transport", status = status.as_u16(), "client error");
            }
            let kind = if status.as_u16() == 404 {
                ErrorKind::NotFound
            } else {
                ErrorKind::ClientError
            };
            return Err(DocbaseError::new(kind, "request rejected")
                .with_context("status", status.as_u16())
                .with_context("body", truncate(&text)));
        }

        // 5xx.
        let text = response.text().await.unwrap_or_default();
        warn!(target: "docbase.transport", status = status.as_u16(), "server error");
        Err(DocbaseError::new(ErrorKind::ServerError, "server error")
            .with_context("status", status.as_u16())
            .with_context("body", truncate(&text)))
    }

    async fn read_bounded(
        &self,
        response: reqwest::Response,
        cancel: &CancellationToken,
    ) -> docbase_error::Result<Vec<u8>> {
        let cap = self.config.response_cap_bytes;
        let mut buf = Vec::new();
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::select! {
                chunk = stream.try_next() => chunk,
                _ = cancel.cancelled() => return Err(cancelled_error()),
            };

            match next.map_err(TransportError::from)? {
                Some(chunk) => {
                    if buf.len() + chunk.len() > cap {
                        return Err(TransportError::ResponseTooLarge { cap_bytes: cap }.into());
                    }
                    buf.extend_from_slice(&chunk);
                }
                None => return Ok(buf),
            }
        }
    }
}

fn cancelled_error() -> DocbaseError {
    DocbaseError::new(ErrorKind::Cancelled, "request was cancelled")
}

fn truncate(s: &str) -> String {
    const MAX: usize = 2048;
    if s.len() > MAX {
        format!("{}... ({} bytes total)", &s[..MAX], s.len())
    } else {
        s.to_string()
    }
}

async fn sleep_cancellable(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancel.cancelled() => false,
    }
}
