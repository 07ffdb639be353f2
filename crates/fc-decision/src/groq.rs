//! Groq-backed `Analyzer`: the one HTTP boundary this otherwise-pure crate
//! owns. Treats the classifier as adversarial — any response outside the
//! six-value intent enum, any malformed JSON, and any exhausted retry all
//! collapse to `Intent::Unclear` rather than propagating an error, so the
//! router always has something to decide on.

use crate::analyzer::Analyzer;
use crate::error::{AnalyzerError, Result};
use crate::phone::validate_e164;
use async_trait::async_trait;
use fc_common::{Analysis, Intent};
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(2)];

const SYSTEM_PROMPT: &str = "You classify a single email reply. Respond with JSON only: \
{\"intent\": one of INTERESTED, NOT_INTERESTED, CLARIFICATION, CONTACT_PROVIDED, \
CONTINUE_OVER_EMAIL, UNCLEAR, \"phone_numbers\": [string], \"has_address\": bool, \
\"address_text\": string or null}.";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum RawIntent {
    Interested,
    NotInterested,
    Clarification,
    ContactProvided,
    ContinueOverEmail,
    Unclear,
}

impl From<RawIntent> for Intent {
    fn from(raw: RawIntent) -> Self {
        match raw {
            RawIntent::Interested => Intent::Interested,
            RawIntent::NotInterested => Intent::NotInterested,
            RawIntent::Clarification => Intent::Clarification,
            RawIntent::ContactProvided => Intent::ContactProvided,
            RawIntent::ContinueOverEmail => Intent::ContinueOverEmail,
            RawIntent::Unclear => Intent::Unclear,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClassifierResponse {
    intent: RawIntent,
    #[serde(default)]
    phone_numbers: Vec<String>,
    #[serde(default)]
    has_address: bool,
    #[serde(default)]
    address_text: Option<String>,
}

#[derive(serde::Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(serde::Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat<'a>,
    temperature: f32,
}

#[derive(serde::Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

pub struct GroqAnalyzer {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GroqAnalyzer {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AnalyzerError::Request(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            model,
            base_url: "https://api.groq.com/openai/v1/chat/completions".to_string(),
        })
    }

    /// Point the client at a different endpoint — used by tests against a
    /// local mock server.
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    async fn request_once(&self, body: &str) -> Result<ClassifierResponse> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: body.to_string(),
                },
            ],
            response_format: ResponseFormat { kind: "json_object" },
            temperature: 0.0,
        };

        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AnalyzerError::Timeout
                } else {
                    AnalyzerError::Request(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(AnalyzerError::Request(format!(
                "classifier returned HTTP {}",
                response.status()
            )));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| AnalyzerError::Unparseable(e.to_string()))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AnalyzerError::Unparseable("empty choices array".into()))?;

        serde_json::from_str(&content).map_err(|e| AnalyzerError::Unparseable(e.to_string()))
    }
}

#[async_trait]
impl Analyzer for GroqAnalyzer {
    /// On total failure (timeout, transport error, or malformed output after
    /// all retries) returns `Ok(Analysis::unclear())` rather than an error —
    /// the caller never has to special-case a classifier outage, the
    /// pipeline just sees an UNCLEAR verdict and delegates to a human.
    async fn analyze(&self, body: &str) -> Result<Analysis> {
        let mut last_err = None;

        for (attempt, backoff) in std::iter::once(None)
            .chain(BACKOFF.into_iter().map(Some))
            .take(MAX_ATTEMPTS as usize)
            .enumerate()
        {
            if let Some(wait) = backoff {
                tokio::time::sleep(wait).await;
            }

            match self.request_once(body).await {
                Ok(raw) => {
                    let phone_numbers = validate_e164(&raw.phone_numbers);
                    return Ok(Analysis {
                        intent: raw.intent.into(),
                        has_phone: !phone_numbers.is_empty(),
                        has_address: raw.has_address,
                        phone_numbers,
                        address_text: raw.address_text,
                    });
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "classifier call failed");
                    last_err = Some(e);
                }
            }
        }

        warn!(error = ?last_err, "classifier exhausted retries, treating as unclear");
        Ok(Analysis::unclear())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completion_body(json_payload: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [
                { "message": { "content": json_payload } }
            ]
        })
    }

    #[tokio::test]
    async fn successful_response_maps_to_analysis() {
        let server = MockServer::start().await;
        let payload = serde_json::json!({
            "intent": "INTERESTED",
            "phone_numbers": [],
            "has_address": false,
            "address_text": null
        })
        .to_string();

        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(&payload)))
            .mount(&server)
            .await;

        let analyzer = GroqAnalyzer::new("test-key".into(), "llama-3.1-8b-instant".into())
            .unwrap()
            .with_base_url(format!("{}/", server.uri()));

        let analysis = analyzer.analyze("I'm interested, tell me more").await.unwrap();
        assert_eq!(analysis.intent, Intent::Interested);
        assert!(!analysis.has_phone);
    }

    #[tokio::test]
    async fn invalid_phone_numbers_are_discarded_not_trusted() {
        let server = MockServer::start().await;
        let payload = serde_json::json!({
            "intent": "CONTACT_PROVIDED",
            "phone_numbers": ["not-a-number", "+14155550100"],
            "has_address": false,
            "address_text": null
        })
        .to_string();

        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(&payload)))
            .mount(&server)
            .await;

        let analyzer = GroqAnalyzer::new("test-key".into(), "llama-3.1-8b-instant".into())
            .unwrap()
            .with_base_url(format!("{}/", server.uri()));

        let analysis = analyzer.analyze("call me at +1 415 555 0100").await.unwrap();
        assert_eq!(analysis.phone_numbers, vec!["+14155550100".to_string()]);
        assert!(analysis.has_phone);
    }

    #[tokio::test]
    async fn persistent_server_error_collapses_to_unclear() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let analyzer = GroqAnalyzer::new("test-key".into(), "llama-3.1-8b-instant".into())
            .unwrap()
            .with_base_url(format!("{}/", server.uri()));

        let analysis = analyzer.analyze("anything").await.unwrap();
        assert_eq!(analysis.intent, Intent::Unclear);
    }

    #[tokio::test]
    async fn malformed_json_collapses_to_unclear() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("not json")))
            .mount(&server)
            .await;

        let analyzer = GroqAnalyzer::new("test-key".into(), "llama-3.1-8b-instant".into())
            .unwrap()
            .with_base_url(format!("{}/", server.uri()));

        let analysis = analyzer.analyze("anything").await.unwrap();
        assert_eq!(analysis.intent, Intent::Unclear);
    }
}
