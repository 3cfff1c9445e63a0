//! Webhook message adapter
//!
//! POSTs `{session_id, text}` JSON to the chat platform's push endpoint.
//! The platform side resolves the session identifier to an actual chat
//! context; this adapter only cares that the endpoint accepts the message.

use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use tracing::debug;

use crate::{AdapterError, MessageAdapter, Result};

/// Outbound message payload.
#[derive(Debug, Serialize)]
struct PushPayload<'a> {
    session_id: &'a str,
    text: &'a str,
}

/// Delivers messages via a single configured webhook URL.
pub struct WebhookAdapter {
    client: reqwest::Client,
    url: String,
}

impl WebhookAdapter {
    pub fn new(client: reqwest::Client, url: String) -> Self {
        Self { client, url }
    }

    async fn push(&self, session: &str, text: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&PushPayload {
                session_id: session,
                text,
            })
            .send()
            .await
            .map_err(|e| AdapterError::Http(format!("webhook request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(AdapterError::Rejected(format!(
                "webhook returned {status}: {body}"
            )));
        }

        debug!(session, "message delivered");
        Ok(())
    }
}

impl MessageAdapter for WebhookAdapter {
    fn id(&self) -> &str {
        "webhook"
    }

    fn send<'a>(
        &'a self,
        session: &'a str,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(self.push(session, text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Start a mock push endpoint that records received payloads.
    async fn start_sink(
        status: u16,
    ) -> (String, Arc<AtomicUsize>, Arc<std::sync::Mutex<Vec<serde_json::Value>>>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(std::sync::Mutex::new(Vec::new()));

        let hits_clone = hits.clone();
        let received_clone = received.clone();
        tokio::spawn(async move {
            let app = axum::Router::new().fallback(
                move |axum::Json(body): axum::Json<serde_json::Value>| {
                    let hits = hits_clone.clone();
                    let received = received_clone.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        received.lock().unwrap().push(body);
                        axum::http::StatusCode::from_u16(status).unwrap()
                    }
                },
            );
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}/push"), hits, received)
    }

    #[tokio::test]
    async fn send_posts_session_and_text() {
        let (url, hits, received) = start_sink(200).await;
        let adapter = WebhookAdapter::new(reqwest::Client::new(), url);

        adapter.send("chat:123", "balance low").await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let payloads = received.lock().unwrap();
        assert_eq!(payloads[0]["session_id"], "chat:123");
        assert_eq!(payloads[0]["text"], "balance low");
    }

    #[tokio::test]
    async fn non_success_status_is_rejected() {
        let (url, _, _) = start_sink(500).await;
        let adapter = WebhookAdapter::new(reqwest::Client::new(), url);

        let result = adapter.send("chat:123", "hello").await;
        assert!(matches!(result, Err(AdapterError::Rejected(_))));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_http_error() {
        let adapter =
            WebhookAdapter::new(reqwest::Client::new(), "http://127.0.0.1:1/push".into());

        let result = adapter.send("chat:123", "hello").await;
        assert!(matches!(result, Err(AdapterError::Http(_))));
    }

    #[test]
    fn id_returns_webhook() {
        let adapter = WebhookAdapter::new(reqwest::Client::new(), "http://unused".into());
        assert_eq!(adapter.id(), "webhook");
    }
}
