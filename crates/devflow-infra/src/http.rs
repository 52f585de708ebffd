//! `reqwest`-backed [`HttpClient`] for `http` steps and notification webhooks.

use std::collections::HashMap;
use std::time::Duration;

use devflow_core::workflow::providers::{HttpClient, HttpRequest, HttpResponse};
use futures_util::future::BoxFuture;
use serde_json::Value;

const USER_AGENT: &str = concat!("devflow/", env!("CARGO_PKG_VERSION"));

/// Shared `reqwest::Client`; each request carries its own timeout.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        let method: reqwest::Method = request
            .method
            .parse()
            .map_err(|_| format!("invalid HTTP method: {}", request.method))?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout);
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        builder = match request.body {
            None | Some(Value::Null) => builder,
            Some(Value::String(text)) => builder.body(text),
            Some(json) => builder.json(&json),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| format!("HTTP request to '{}' failed: {e}", request.url))?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or("<binary>").to_string()))
            .collect();
        let text = response
            .text()
            .await
            .map_err(|e| format!("failed to read HTTP response body: {e}"))?;

        tracing::debug!(url = %request.url, status, body_len = text.len(), "HTTP request completed");

        Ok(HttpResponse {
            status,
            headers,
            body: parse_body(text),
        })
    }
}

impl HttpClient for ReqwestHttpClient {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, String>> {
        Box::pin(self.execute(request))
    }
}

/// JSON when the body parses as JSON, the raw text otherwise.
fn parse_body(text: String) -> Value {
    if text.is_empty() {
        return Value::String(text);
    }
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP/1.1 response and return the raw request.
    async fn one_shot_server(body: &'static str, content_type: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let n = socket.read(&mut buf).await.unwrap();
            let response = format!(
                "HTTP/1.1 201 Created\r\ncontent-type: {content_type}\r\nx-trace: abc\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });
        (format!("http://{addr}/hook"), task)
    }

    fn request(url: String, body: Option<Value>) -> HttpRequest {
        HttpRequest {
            method: "POST".into(),
            url,
            headers: HashMap::from([("x-token".to_string(), "secret".to_string())]),
            body,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn json_response_is_parsed() {
        let (url, server) = one_shot_server(r#"{"id":7}"#, "application/json").await;
        let client = ReqwestHttpClient::new().unwrap();
        let response = client
            .send(request(url, Some(json!({ "ref": "main" }))))
            .await
            .unwrap();

        assert_eq!(response.status, 201);
        assert_eq!(response.body, json!({ "id": 7 }));
        assert_eq!(response.headers["x-trace"], "abc");

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /hook"));
        assert!(raw.to_lowercase().contains("x-token: secret"));
        assert!(raw.contains(r#"{"ref":"main"}"#));
    }

    #[tokio::test]
    async fn text_response_stays_a_string() {
        let (url, _server) = one_shot_server("pong", "text/plain").await;
        let client = ReqwestHttpClient::new().unwrap();
        let response = client.send(request(url, None)).await.unwrap();
        assert_eq!(response.body, json!("pong"));
    }

    #[tokio::test]
    async fn invalid_method_is_rejected() {
        let client = ReqwestHttpClient::new().unwrap();
        let mut req = request("http://127.0.0.1:9/".into(), None);
        req.method = "NOT A METHOD".into();
        let err = client.send(req).await.unwrap_err();
        assert!(err.contains("invalid HTTP method"));
    }

    #[test]
    fn parse_body_falls_back_to_text() {
        assert_eq!(parse_body("[1,2]".into()), json!([1, 2]));
        assert_eq!(parse_body("ok".into()), json!("ok"));
        assert_eq!(parse_body(String::new()), json!(""));
    }
}
