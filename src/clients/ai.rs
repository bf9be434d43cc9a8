/// AI provider client: chat completions with a strict JSON contract.
///
/// Structured calls are validated against a JSON Schema before
/// deserialization, so malformed model output surfaces as an error instead
/// of propagating half-parsed data.
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ChatMessage {
    pub(crate) role: String,
    pub(crate) content: String,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ChatRequest {
    pub(crate) model: String,
    pub(crate) messages: Vec<ChatMessage>,
    pub(crate) temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) response_format: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponse {
    pub(crate) choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatChoice {
    pub(crate) message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponseMessage {
    pub(crate) content: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct AiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f64,
}

impl AiClient {
    pub(crate) fn new(
        base_url: &str,
        api_key: Option<&str>,
        model: &str,
        temperature: f64,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build AI client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(ToString::to_string),
            model: model.to_string(),
            temperature,
        })
    }

    /// Whether an API key is configured; callers fall back to rule-based
    /// behavior when it is not.
    pub(crate) fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("AI provider API key not configured"))?;
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {key}")).context("invalid AI API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    pub(crate) async fn chat(&self, request: &ChatRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        debug!(model = %request.model, "AI chat request");

        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(request)
            .send()
            .await
            .context("AI chat request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("AI provider error ({}): {}", status, body));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .context("failed to decode AI chat response")?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("AI provider returned no content"))
    }

    /// Chat completion that must return JSON matching `schema`.
    pub(crate) async fn structured_json(
        &self,
        system: &str,
        user: &str,
        schema: &Value,
        max_tokens: Option<u32>,
    ) -> Result<Value> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            temperature: self.temperature,
            max_tokens,
            response_format: Some(json!({"type": "json_object"})),
        };

        let content = self.chat(&request).await?;
        let parsed = parse_json_content(&content)?;

        let validator =
            jsonschema::validator_for(schema).context("invalid AI response schema")?;
        if let Err(error) = validator.validate(&parsed) {
            warn!(error = %error, "AI response failed schema validation");
            return Err(anyhow!("AI response failed schema validation: {error}"));
        }

        Ok(parsed)
    }
}

/// Tolerates markdown code fences around the JSON body.
pub(crate) fn parse_json_content(content: &str) -> Result<Value> {
    let trimmed = content.trim();
    let candidate = if trimmed.starts_with("```") {
        let start = trimmed.find('{');
        let end = trimmed.rfind('}');
        match (start, end) {
            (Some(start), Some(end)) if end > start => &trimmed[start..=end],
            _ => trimmed,
        }
    } else {
        trimmed
    };

    serde_json::from_str(candidate).context("AI response is not valid JSON")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn chat_body(content: &str) -> Value {
        json!({"choices": [{"message": {"content": content}}]})
    }

    #[tokio::test]
    async fn structured_json_validates_against_schema() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(chat_body(r#"{"score": 7, "reason": "clear fit"}"#)),
            )
            .mount(&server)
            .await;

        let client = AiClient::new(&server.uri(), Some("key"), "test-model", 0.1)
            .expect("client should build");

        let schema = json!({
            "type": "object",
            "required": ["score"],
            "properties": {"score": {"type": "number"}, "reason": {"type": "string"}}
        });

        let value = client
            .structured_json("system", "user", &schema, Some(100))
            .await
            .expect("valid response should pass");

        assert_eq!(value["score"], 7);
    }

    #[tokio::test]
    async fn structured_json_rejects_schema_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(chat_body(r#"{"reason": "no score"}"#)),
            )
            .mount(&server)
            .await;

        let client = AiClient::new(&server.uri(), Some("key"), "test-model", 0.1)
            .expect("client should build");

        let schema = json!({"type": "object", "required": ["score"]});

        let error = client
            .structured_json("system", "user", &schema, None)
            .await
            .expect_err("schema mismatch should fail");

        assert!(error.to_string().contains("schema validation"));
    }

    #[tokio::test]
    async fn chat_surfaces_provider_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let client = AiClient::new(&server.uri(), Some("key"), "test-model", 0.1)
            .expect("client should build");

        let request = ChatRequest {
            model: "test-model".to_string(),
            messages: vec![],
            temperature: 0.1,
            max_tokens: None,
            response_format: None,
        };

        let error = client.chat(&request).await.expect_err("500 should fail");
        assert!(error.to_string().contains("AI provider error"));
    }

    #[test]
    fn parse_json_content_strips_code_fences() {
        let fenced = "```json\n{\"a\": 1}\n```";
        assert_eq!(parse_json_content(fenced).unwrap()["a"], 1);

        let plain = r#"{"a": 2}"#;
        assert_eq!(parse_json_content(plain).unwrap()["a"], 2);
    }

    #[test]
    fn unconfigured_client_reports_not_configured() {
        let client = AiClient::new("https://api.example.com/v1", None, "m", 0.1).unwrap();
        assert!(!client.is_configured());
    }
}
