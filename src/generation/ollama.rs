use super::{GenerationError, GenerationRequest, LanguageModel};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Generative model served by a local Ollama runtime (`POST /api/generate`).
pub struct OllamaLanguageModel {
    http: Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    done: bool,
}

impl OllamaLanguageModel {
    /// Construct a client for `model` served at `base_url`.
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self, GenerationError> {
        let http = Client::builder()
            .user_agent("knowflow/generate")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }
}

#[async_trait]
impl LanguageModel for OllamaLanguageModel {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let payload = json!({
            "model": self.model,
            "prompt": request.prompt,
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            }
        });

        let response = self.http.post(self.endpoint()).json(&payload).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::UnexpectedStatus { status, body });
        }

        let body: OllamaResponse = response.json().await.map_err(|error| {
            GenerationError::InvalidResponse(format!("failed to decode Ollama response: {error}"))
        })?;

        if !body.done {
            return Err(GenerationError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        Ok(body.response.trim().to_string())
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn request() -> GenerationRequest {
        GenerationRequest {
            prompt: "Answer".into(),
            temperature: 0.2,
            max_tokens: 64,
        }
    }

    #[tokio::test]
    async fn handles_successful_response() {
        let server = MockServer::start_async().await;
        let model =
            OllamaLanguageModel::new(&server.base_url(), "llama3.1", Duration::from_secs(5))
                .expect("model");

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/generate")
                    .body_contains("\"stream\":false")
                    .body_contains("\"num_predict\":64");
                then.status(200).json_body(json!({
                    "response": "  Grounded answer \n",
                    "done": true
                }));
            })
            .await;

        let text = model.generate(&request()).await.expect("answer");
        mock.assert_async().await;
        assert_eq!(text, "Grounded answer");
    }

    #[tokio::test]
    async fn incomplete_response_is_rejected() {
        let server = MockServer::start_async().await;
        let model =
            OllamaLanguageModel::new(&server.base_url(), "llama3.1", Duration::from_secs(5))
                .expect("model");
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(200)
                    .json_body(json!({ "response": "partial", "done": false }));
            })
            .await;

        let error = model.generate(&request()).await.expect_err("incomplete");
        assert!(matches!(error, GenerationError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn error_status_carries_body() {
        let server = MockServer::start_async().await;
        let model =
            OllamaLanguageModel::new(&server.base_url(), "llama3.1", Duration::from_secs(5))
                .expect("model");
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(500).body("boom");
            })
            .await;

        let error = model.generate(&request()).await.expect_err("error response");
        assert!(
            matches!(error, GenerationError::UnexpectedStatus { ref body, .. } if body == "boom")
        );
    }
}
