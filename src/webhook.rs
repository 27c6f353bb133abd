//! Webhook client (spec §4.7, C8).
//!
//! POSTs a single event to a Google-Apps-Script-style webhook, signed via a
//! `__secret` query parameter. Unlike a typical REST client, success is
//! determined by the *body*'s `data.ok` flag, not the HTTP status — the
//! remote endpoint returns 200 even when it rejected the write.

use std::time::Duration;

use serde_json::Value;

pub struct WebhookClient {
    client: reqwest::Client,
    url: Option<String>,
    secret: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct WebhookResult {
    pub ok: bool,
    pub status: Option<u16>,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WebhookClient {
    pub fn new(url: Option<String>, secret: Option<String>, timeout_ms: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self {
            client,
            url,
            secret,
            timeout: Duration::from_millis(timeout_ms),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some() && self.secret.is_some()
    }

    /// POST `event` as JSON. Never returns an `Err` — every failure mode is
    /// folded into `WebhookResult::error` so callers (C12 ingest path, C11
    /// replay worker) can decide what to do without matching on transport
    /// errors.
    pub async fn post(&self, event: &Value) -> WebhookResult {
        let started = std::time::Instant::now();

        let (Some(url), Some(secret)) = (self.url.as_ref(), self.secret.as_ref()) else {
            return WebhookResult {
                ok: false,
                status: None,
                latency_ms: started.elapsed().as_millis() as u64,
                data: None,
                error: Some("missing_GAS_WEBAPP_URL_or_ITPLAYLAB_SECRET".to_string()),
            };
        };

        let full_url = format!(
            "{}{}__secret={}",
            url,
            if url.contains('?') { "&" } else { "?" },
            urlencoding::encode(secret)
        );

        let send = self.client.post(&full_url).json(event).send();
        let response = match tokio::time::timeout(self.timeout, send).await {
            Err(_) => {
                return WebhookResult {
                    ok: false,
                    status: None,
                    latency_ms: started.elapsed().as_millis() as u64,
                    data: None,
                    error: Some("gas_timeout".to_string()),
                }
            }
            Ok(Err(e)) => {
                return WebhookResult {
                    ok: false,
                    status: None,
                    latency_ms: started.elapsed().as_millis() as u64,
                    data: None,
                    error: Some(e.to_string()),
                }
            }
            Ok(Ok(resp)) => resp,
        };

        let status = response.status().as_u16();
        let text = match response.text().await {
            Ok(t) => t,
            Err(e) => {
                return WebhookResult {
                    ok: false,
                    status: Some(status),
                    latency_ms: started.elapsed().as_millis() as u64,
                    data: None,
                    error: Some(format!("body_read_failed: {e}")),
                }
            }
        };

        let latency_ms = started.elapsed().as_millis() as u64;
        let parsed: Result<Value, _> = serde_json::from_str(&text);
        match parsed {
            Ok(data) => {
                let ok = data.get("ok").and_then(Value::as_bool).unwrap_or(false);
                WebhookResult {
                    ok,
                    status: Some(status),
                    latency_ms,
                    data: Some(data),
                    error: None,
                }
            }
            Err(_) => WebhookResult {
                ok: false,
                status: Some(status),
                latency_ms,
                data: Some(Value::String(text)),
                error: Some("invalid_json_from_gas".to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn missing_config_returns_without_call() {
        let client = WebhookClient::new(None, None, 1000).unwrap();
        let result = client.post(&json!({"a": 1})).await;
        assert!(!result.ok);
        assert_eq!(
            result.error.as_deref(),
            Some("missing_GAS_WEBAPP_URL_or_ITPLAYLAB_SECRET")
        );
    }

    #[tokio::test]
    async fn remote_ok_false_with_200_status_is_not_ok() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"ok":false,"error":"sheet_locked"}"#)
            .create_async()
            .await;

        let client = WebhookClient::new(Some(server.url()), Some("shh".to_string()), 1000).unwrap();
        let result = client.post(&json!({"a": 1})).await;
        assert!(!result.ok);
        assert_eq!(result.status, Some(200));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn remote_ok_true_is_ok() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        let client = WebhookClient::new(Some(server.url()), Some("shh".to_string()), 1000).unwrap();
        let result = client.post(&json!({"a": 1})).await;
        assert!(result.ok);
    }

    #[tokio::test]
    async fn invalid_json_body_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", mockito::Matcher::Any)
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let client = WebhookClient::new(Some(server.url()), Some("shh".to_string()), 1000).unwrap();
        let result = client.post(&json!({"a": 1})).await;
        assert!(!result.ok);
        assert_eq!(result.error.as_deref(), Some("invalid_json_from_gas"));
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"ok":true}"#)
            .with_chunked_body(|_| {
                std::thread::sleep(Duration::from_millis(200));
                Ok(())
            })
            .create_async()
            .await;

        let client = WebhookClient::new(Some(server.url()), Some("shh".to_string()), 10).unwrap();
        let result = client.post(&json!({"a": 1})).await;
        assert!(!result.ok);
        assert_eq!(result.error.as_deref(), Some("gas_timeout"));
    }
}
