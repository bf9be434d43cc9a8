/// Headless-browser rendering client for protected domains.
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::Client;
use serde_json::json;

pub(crate) struct BrowserClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl BrowserClient {
    pub(crate) fn new(base_url: &str, token: Option<&str>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build browser client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(ToString::to_string),
        })
    }

    /// Fetch fully-rendered HTML for a URL.
    pub(crate) async fn content(&self, url: &str) -> Result<String> {
        let mut endpoint = format!("{}/content", self.base_url);
        if let Some(token) = &self.token {
            endpoint.push_str(&format!("?token={token}"));
        }

        let response = self
            .client
            .post(&endpoint)
            .header("Content-Type", "application/json")
            .json(&json!({ "url": url }))
            .send()
            .await
            .context("browser content request failed")?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(anyhow!("browser content error ({}): {}", status, message));
        }

        response
            .text()
            .await
            .context("failed to read rendered content")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn content_returns_rendered_html() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/content"))
            .and(body_partial_json(json!({"url": "https://example.com"})))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>rendered</html>"))
            .mount(&server)
            .await;

        let client = BrowserClient::new(&server.uri(), None).expect("client should build");
        let html = client
            .content("https://example.com")
            .await
            .expect("content should succeed");

        assert_eq!(html, "<html>rendered</html>");
    }

    #[tokio::test]
    async fn content_surfaces_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/content"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let client = BrowserClient::new(&server.uri(), None).expect("client should build");
        let error = client
            .content("https://example.com")
            .await
            .expect_err("429 should fail");

        assert!(error.to_string().contains("429"));
    }
}
