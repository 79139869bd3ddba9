use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{CompletionError, CredentialError, StoreError};
use crate::provider::CompletionProvider;
use crate::store::KeyValueStore;

/// Store key the API key is persisted under.
pub const CREDENTIAL_KEY: &str = "gemini_api_key";

const TEMPERATURE: f32 = 0.7;
const TOP_K: u32 = 40;
const TOP_P: f32 = 0.95;
const MAX_OUTPUT_TOKENS: u32 = 1024;

const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];
const SAFETY_THRESHOLD: &str = "BLOCK_MEDIUM_AND_ABOVE";

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct RequestContent<'a> {
    parts: Vec<TextPart<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_k: u32,
    top_p: f32,
    max_output_tokens: u32,
}

#[derive(Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

impl<'a> GenerateRequest<'a> {
    fn new(prompt: &'a str) -> Self {
        Self {
            contents: vec![RequestContent {
                parts: vec![TextPart { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
                top_k: TOP_K,
                top_p: TOP_P,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
            safety_settings: SAFETY_CATEGORIES
                .into_iter()
                .map(|category| SafetySetting {
                    category,
                    threshold: SAFETY_THRESHOLD,
                })
                .collect(),
        }
    }
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

impl GenerateResponse {
    /// Text of the first part of the first candidate, if it has any.
    fn into_first_text(self) -> Option<String> {
        self.candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .next()?
            .text
            .filter(|text| !text.is_empty())
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

fn provider_error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorBody>(body)
        .ok()?
        .error
        .message
        .filter(|message| !message.trim().is_empty())
}

/// Client for the `generateContent` endpoint.
///
/// Holds at most one API key, hydrated from the store on construction and
/// written back to it whenever it changes.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    store: Arc<dyn KeyValueStore>,
}

impl GeminiClient {
    pub fn new(config: &Config, store: Arc<dyn KeyValueStore>) -> Result<Self, StoreError> {
        Self::with_endpoint(config.endpoint_url(), store)
    }

    pub fn with_endpoint(
        endpoint: impl Into<String>,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self, StoreError> {
        let api_key = store.get(CREDENTIAL_KEY)?;
        let endpoint = endpoint.into();

        tracing::debug!(%endpoint, has_key = api_key.is_some(), "created Gemini client");

        Ok(Self {
            client: Client::new(),
            endpoint,
            api_key,
            store,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn credential(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn set_credential(&mut self, key: &str) -> Result<(), CredentialError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(CredentialError::Empty);
        }

        self.store.set(CREDENTIAL_KEY, key)?;
        self.api_key = Some(key.to_string());
        tracing::info!("API key updated");
        Ok(())
    }

    pub fn clear_credential(&mut self) -> Result<(), StoreError> {
        self.store.remove(CREDENTIAL_KEY)?;
        self.api_key = None;
        tracing::info!("API key cleared");
        Ok(())
    }

    pub async fn generate(&self, prompt: &str) -> Result<String, CompletionError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(CompletionError::MissingCredential)?;

        let request = GenerateRequest::new(prompt);

        tracing::debug!(
            endpoint = %self.endpoint,
            prompt_chars = prompt.chars().count(),
            "sending generateContent request"
        );

        // The key travels in the query string, so strip URLs from transport
        // errors before they reach logs or the screen.
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", api_key)])
            .json(&request)
            .send()
            .await
            .map_err(|e| CompletionError::Transport(e.without_url()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = provider_error_message(&body)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            tracing::warn!(status = status.as_u16(), %message, "Gemini request rejected");
            return Err(CompletionError::Api { status, message });
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::Transport(e.without_url()))?;

        let text = body.into_first_text().ok_or(CompletionError::EmptyResponse)?;
        tracing::debug!(reply_chars = text.chars().count(), "received reply");
        Ok(text)
    }
}

#[async_trait]
impl CompletionProvider for GeminiClient {
    fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, prompt: &str) -> Result<String, CompletionError> {
        GeminiClient::generate(self, prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[test]
    fn request_body_carries_prompt_and_fixed_settings() {
        let body = serde_json::to_value(GenerateRequest::new("hello")).unwrap();

        assert_eq!(body["contents"], json!([{ "parts": [{ "text": "hello" }] }]));
        assert_eq!(body["generationConfig"]["topK"], json!(40));
        assert_eq!(body["generationConfig"]["maxOutputTokens"], json!(1024));
        assert!(body["generationConfig"]["temperature"].is_number());
        assert!(body["generationConfig"]["topP"].is_number());

        let settings = body["safetySettings"].as_array().unwrap();
        assert_eq!(settings.len(), 4);
        assert!(settings
            .iter()
            .all(|s| s["threshold"] == json!("BLOCK_MEDIUM_AND_ABOVE")));
        assert_eq!(settings[3]["category"], json!("HARM_CATEGORY_DANGEROUS_CONTENT"));
    }

    #[test]
    fn first_text_is_taken_from_first_candidate() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [
                { "content": { "parts": [{ "text": "first" }, { "text": "second" }] } },
                { "content": { "parts": [{ "text": "other" }] } }
            ]
        }))
        .unwrap();

        assert_eq!(response.into_first_text().as_deref(), Some("first"));
    }

    #[test]
    fn missing_candidates_or_parts_yield_nothing() {
        for body in [
            json!({}),
            json!({ "candidates": [] }),
            json!({ "candidates": [{}] }),
            json!({ "candidates": [{ "content": { "parts": [] } }] }),
            json!({ "candidates": [{ "content": { "parts": [{ "text": "" }] } }] }),
        ] {
            let response: GenerateResponse = serde_json::from_value(body).unwrap();
            assert!(response.into_first_text().is_none());
        }
    }

    #[test]
    fn provider_error_message_is_extracted() {
        let body = r#"{"error":{"code":400,"message":"API key not valid","status":"INVALID_ARGUMENT"}}"#;
        assert_eq!(provider_error_message(body).as_deref(), Some("API key not valid"));
        assert_eq!(provider_error_message("<html>bad gateway</html>"), None);
        assert_eq!(provider_error_message(r#"{"error":{"message":"  "}}"#), None);
    }

    #[test]
    fn credential_is_hydrated_and_trimmed() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        store.set(CREDENTIAL_KEY, "from-disk").unwrap();

        let mut client = GeminiClient::with_endpoint("http://localhost", store.clone()).unwrap();
        assert_eq!(client.credential(), Some("from-disk"));

        client.set_credential("  fresh  ").unwrap();
        assert_eq!(client.credential(), Some("fresh"));
        assert_eq!(store.get(CREDENTIAL_KEY).unwrap().as_deref(), Some("fresh"));
    }

    #[test]
    fn blank_credential_is_rejected_and_keeps_previous() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut client = GeminiClient::with_endpoint("http://localhost", store).unwrap();
        client.set_credential("abc").unwrap();

        assert!(matches!(client.set_credential("   "), Err(CredentialError::Empty)));
        assert_eq!(client.credential(), Some("abc"));
    }

    #[test]
    fn clearing_removes_from_store() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut client = GeminiClient::with_endpoint("http://localhost", store.clone()).unwrap();
        client.set_credential("abc").unwrap();
        client.clear_credential().unwrap();

        assert_eq!(client.credential(), None);
        assert!(!client.has_credential());
        assert_eq!(store.get(CREDENTIAL_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn generate_without_credential_fails_fast() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        // Unroutable endpoint: any request attempt would surface as Transport.
        let client = GeminiClient::with_endpoint("http://127.0.0.1:1/never", store).unwrap();

        assert!(matches!(
            client.generate("hello").await,
            Err(CompletionError::MissingCredential)
        ));
    }
}
