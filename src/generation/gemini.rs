use super::{GenerationError, GenerationRequest, LanguageModel};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Generative model reached through the Gemini `generateContent` endpoint.
pub struct GeminiLanguageModel {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

impl GeminiLanguageModel {
    /// Construct a client for `model` using `api_key`.
    pub fn new(
        base_url: &str,
        api_key: String,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        if api_key.trim().is_empty() {
            return Err(GenerationError::Configuration(
                "Gemini API key is empty".into(),
            ));
        }
        let http = Client::builder()
            .user_agent("knowflow/generate")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.trim_start_matches("models/").to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

#[async_trait]
impl LanguageModel for GeminiLanguageModel {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part {
                    text: &request.prompt,
                }],
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            },
        };

        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::UnexpectedStatus { status, body });
        }

        let body: GenerateResponse = response.json().await.map_err(|error| {
            GenerationError::InvalidResponse(format!("failed to decode Gemini response: {error}"))
        })?;

        let text: String = body
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let text = text.trim();
        if text.is_empty() {
            return Err(GenerationError::InvalidResponse(
                "Gemini returned no candidate text".into(),
            ));
        }
        Ok(text.to_string())
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;

    fn model_for(server: &MockServer) -> GeminiLanguageModel {
        GeminiLanguageModel::new(
            &server.base_url(),
            "test-key".into(),
            "gemini-1.5-flash",
            Duration::from_secs(5),
        )
        .expect("model")
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            prompt: "What is the leave policy?".into(),
            temperature: 0.7,
            max_tokens: 1024,
        }
    }

    #[tokio::test]
    async fn joins_candidate_parts() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1beta/models/gemini-1.5-flash:generateContent")
                    .header("x-goog-api-key", "test-key")
                    .body_contains("\"maxOutputTokens\":1024");
                then.status(200).json_body(json!({
                    "candidates": [{
                        "content": { "parts": [{ "text": "Employees get " }, { "text": "20 days." }] }
                    }]
                }));
            })
            .await;

        let text = model_for(&server).generate(&request()).await.expect("text");
        mock.assert_async().await;
        assert_eq!(text, "Employees get 20 days.");
    }

    #[tokio::test]
    async fn blocked_response_without_text_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1beta/models/gemini-1.5-flash:generateContent");
                then.status(200)
                    .json_body(json!({ "candidates": [{ "finishReason": "SAFETY" }] }));
            })
            .await;

        let error = model_for(&server)
            .generate(&request())
            .await
            .expect_err("no text");
        assert!(matches!(error, GenerationError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn throttling_is_reported_as_status() {
        use crate::retry::RetryableError;

        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1beta/models/gemini-1.5-flash:generateContent");
                then.status(429).body("quota");
            })
            .await;

        let error = model_for(&server)
            .generate(&request())
            .await
            .expect_err("throttled");
        assert!(error.is_transient());
    }
}
