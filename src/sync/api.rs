//! Server API boundary.
//!
//! One call per [`OperationKind`]. Only success or failure is interpreted;
//! response bodies are ignored.

use std::future::Future;
use std::time::Duration;

use crate::error::SyncError;
use crate::model::OperationKind;

/// Remote endpoint that applies queued operations.
///
/// Implemented by [`HttpSyncApi`] and by scripted fakes in tests.
pub trait SyncApi: Send + Sync {
    /// Apply one operation remotely.
    fn dispatch(
        &self,
        operation: OperationKind,
        payload: &serde_json::Value,
    ) -> impl Future<Output = Result<(), SyncError>> + Send;
}

/// JSON-over-HTTP implementation.
#[derive(Debug, Clone)]
pub struct HttpSyncApi {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpSyncApi {
    /// Create a client for `base_url` with a per-request timeout.
    #[must_use]
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    /// Full URL an operation is sent to.
    #[must_use]
    pub fn url_for(&self, operation: OperationKind) -> String {
        format!("{}{}", self.base_url, operation.endpoint())
    }
}

/// Map an HTTP status to the dispatch outcome.
///
/// # Errors
///
/// Returns `ServerRejected` for anything outside 2xx.
pub fn check_status(status: u16) -> Result<(), SyncError> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(SyncError::ServerRejected(status))
    }
}

impl SyncApi for HttpSyncApi {
    async fn dispatch(
        &self,
        operation: OperationKind,
        payload: &serde_json::Value,
    ) -> Result<(), SyncError> {
        let body = serde_json::to_vec(payload)?;

        let response = self
            .client
            .post(self.url_for(operation))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;

        check_status(response.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_check_status() {
        assert!(check_status(200).is_ok());
        assert!(check_status(204).is_ok());
        assert_eq!(check_status(422), Err(SyncError::ServerRejected(422)));
        assert_eq!(check_status(503), Err(SyncError::ServerRejected(503)));
        assert_eq!(check_status(302), Err(SyncError::ServerRejected(302)));
    }

    #[test]
    fn test_url_for_joins_endpoint() {
        let api = HttpSyncApi::new("http://localhost:8000/", Duration::from_secs(5));
        assert_eq!(
            api.url_for(OperationKind::TrackAnalytics),
            "http://localhost:8000/api/v1/analytics/events"
        );
        assert_eq!(
            api.url_for(OperationKind::CreateAlert),
            "http://localhost:8000/api/v1/alerts"
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_error() {
        // Port 9 (discard) on loopback refuses connections on test hosts.
        let api = HttpSyncApi::new("http://127.0.0.1:9", Duration::from_secs(2));
        let err = api
            .dispatch(OperationKind::CreateAlert, &json!({"name": "Price Drop"}))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Network(_)));
    }
}
