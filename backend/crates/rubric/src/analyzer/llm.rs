use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

use coach_common::error::{CoachError, CoachResult};
use coach_db::rubric::models::RubricConfigWithRelations;
use coach_db::sync::proposal::ProposedChanges;

use super::ChangeAnalyzer;

#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl AnalyzerConfig {
    /// Load the reasoning-service config from environment.
    ///
    /// Returns `Ok(None)` if the service is not configured (base URL or key
    /// missing). Returns `Err` if a numeric setting is present but unparseable.
    pub fn from_env() -> Result<Option<Self>, String> {
        let base_url = match std::env::var("ANALYZER_BASE_URL").ok() {
            Some(v) if !v.trim().is_empty() => v,
            _ => return Ok(None),
        };
        let api_key = match std::env::var("ANALYZER_API_KEY").ok() {
            Some(v) if !v.trim().is_empty() => v,
            _ => return Ok(None),
        };

        let model = std::env::var("ANALYZER_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let max_retries = parse_env("ANALYZER_MAX_RETRIES", 2)?;
        let timeout_secs = parse_env("ANALYZER_TIMEOUT_SECS", 60)?;

        Ok(Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            max_retries,
            timeout_secs,
        }))
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| format!("{key} must be a number, got '{raw}'")),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP {status}: {body}")]
    HttpError { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },

    #[error("malformed model output: {0}")]
    MalformedOutput(String),
}

impl From<LlmError> for CoachError {
    fn from(err: LlmError) -> Self {
        CoachError::Analysis(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

const SYSTEM_PROMPT: &str = "You maintain the scoring rubric used to grade sales calls. \
Compare the sales script with the current rubric and propose only the edits the script justifies. \
Answer with a single JSON object with the keys category_changes, criteria_changes, red_flag_changes and summary.\n\
Every change has change_type (add, modify or remove), a non-empty reason and a confidence between 0 and 1.\n\
category_changes entries: {\"slug\", \"change_type\", \"reason\", \"confidence\", \"before\", \"after\"}; \
for add, after is {\"name\", \"description\", \"weight\", \"criteria\": [{\"score\", \"description\"}]}; \
for modify, before and after list only the fields that change among name, description, weight, is_enabled, sort_order.\n\
criteria_changes entries: {\"category_slug\", \"score\", \"change_type\", \"reason\", \"confidence\", \"before\", \"after\"} \
where before and after are the criterion descriptions.\n\
red_flag_changes entries: {\"flag_key\", \"change_type\", \"reason\", \"confidence\", \"before\", \"after\"}; \
for add, after is {\"display_name\", \"description\", \"severity\" (critical, high or medium), \"threshold_type\" (boolean or percentage), \"threshold_value\"}.\n\
Use existing slugs and flag keys for modify and remove. Propose at most one change per slug and change type, \
one per category slug and score, and one per flag key and change type. \
Enabled category weights must still sum to 100 when all proposed changes are applied.";

/// Build the user message: rubric snapshot first, then the script.
pub fn build_prompt(script_content: &str, rubric: &RubricConfigWithRelations) -> String {
    let content = rubric.content();
    let snapshot = json!({
        "name": rubric.config.name,
        "version": rubric.config.version,
        "categories": content.categories,
        "red_flags": content.red_flags,
    });
    let snapshot = serde_json::to_string_pretty(&snapshot).unwrap_or_else(|_| snapshot.to_string());

    format!("Current rubric:\n{snapshot}\n\nSales script:\n{script_content}")
}

/// Models often wrap JSON in a Markdown fence despite instructions.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

pub fn parse_proposal(raw: &str) -> Result<ProposedChanges, LlmError> {
    serde_json::from_str(strip_code_fences(raw)).map_err(|e| LlmError::MalformedOutput(e.to_string()))
}

/// Chat-completions client for OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct LlmAnalyzer {
    client: Client,
    config: AnalyzerConfig,
}

impl LlmAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    /// For testing: point the client at a specific base URL (e.g., wiremock).
    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.to_string();
        self
    }

    async fn request_with_retry(&self, body: &serde_json::Value) -> Result<ChatResponse, LlmError> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let mut last_error = String::new();

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff_secs = std::cmp::min(1u64 << attempt, 30);
                tracing::warn!(attempt, backoff_secs, "retrying analyzer call after backoff");
                tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
            }

            let response = match self
                .client
                .post(&url)
                .bearer_auth(&self.config.api_key)
                .json(body)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = e.to_string();
                    if e.is_timeout() || e.is_connect() {
                        continue;
                    }
                    return Err(LlmError::RequestError(e));
                }
            };

            let status = response.status();

            if status.is_success() {
                return response
                    .json::<ChatResponse>()
                    .await
                    .map_err(|e| LlmError::MalformedOutput(e.to_string()));
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                if let Some(retry_after) = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                {
                    let wait = std::cmp::min(retry_after, 60);
                    tracing::warn!(wait, "analyzer rate-limited, waiting Retry-After");
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                }
                last_error = "429 Too Many Requests".to_string();
                continue;
            }

            if status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                last_error = format!("{status}: {body}");
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::HttpError { status, body });
        }

        Err(LlmError::MaxRetriesExceeded {
            attempts: self.config.max_retries + 1,
            last_error,
        })
    }
}

#[async_trait]
impl ChangeAnalyzer for LlmAnalyzer {
    async fn analyze(
        &self,
        script_content: &str,
        rubric: &RubricConfigWithRelations,
    ) -> CoachResult<ProposedChanges> {
        let start = Instant::now();
        let body = json!({
            "model": self.config.model,
            "temperature": 0.2,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": build_prompt(script_content, rubric) },
            ],
        });

        let response = self.request_with_retry(&body).await?;
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::MalformedOutput("response has no message content".into()))?;

        let proposal = parse_proposal(&content)?;

        let (prompt_tokens, completion_tokens) = response
            .usage
            .map_or((0, 0), |u| (u.prompt_tokens, u.completion_tokens));
        tracing::info!(
            model = %self.config.model,
            changes = proposal.len(),
            prompt_tokens,
            completion_tokens,
            latency_ms = start.elapsed().as_millis() as u64,
            "analyzer returned proposal"
        );

        Ok(proposal)
    }

    fn describe(&self) -> String {
        format!("llm:{}", self.config.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> AnalyzerConfig {
        AnalyzerConfig {
            base_url: "http://localhost".to_string(),
            api_key: "test-key".to_string(),
            model: "test-model".to_string(),
            max_retries: 1,
            timeout_secs: 5,
        }
    }

    fn chat_body(content: &str) -> serde_json::Value {
        json!({
            "id": "chatcmpl-1",
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }],
            "usage": { "prompt_tokens": 120, "completion_tokens": 40 }
        })
    }

    const PROPOSAL: &str = r#"{
        "category_changes": [{
            "slug": "closing",
            "change_type": "modify",
            "reason": "Script adds a second close attempt",
            "confidence": 0.8,
            "before": { "weight": 20 },
            "after": { "weight": 25 }
        }],
        "summary": "Closing gets more weight"
    }"#;

    async fn rubric() -> RubricConfigWithRelations {
        let store = coach_db::memory::MemoryStore::new();
        crate::testing::seed_active(&store, &[80.0, 20.0]).await
    }

    #[test]
    fn strips_markdown_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{}\n```  "), "{}");
        assert_eq!(strip_code_fences("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn parse_rejects_prose() {
        let err = parse_proposal("I think the rubric is fine.").unwrap_err();
        assert!(matches!(err, LlmError::MalformedOutput(_)));
    }

    #[tokio::test]
    async fn prompt_contains_rubric_and_script() {
        let rubric = rubric().await;
        let prompt = build_prompt("Hi, this is Sam from Acme.", &rubric);
        assert!(prompt.contains("\"slug\": \"discovery\""));
        assert!(prompt.contains("Hi, this is Sam from Acme."));
    }

    #[tokio::test]
    async fn analyze_parses_fenced_proposal() {
        let server = MockServer::start().await;
        let fenced = format!("```json\n{PROPOSAL}\n```");

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(&fenced)))
            .mount(&server)
            .await;

        let analyzer = LlmAnalyzer::new(test_config())
            .unwrap()
            .with_base_url(&server.uri());

        let proposal = analyzer.analyze("script", &rubric().await).await.unwrap();
        assert_eq!(proposal.category_changes.len(), 1);
        assert_eq!(proposal.category_changes[0].key(), "closing:modify");
        assert_eq!(proposal.summary.as_deref(), Some("Closing gets more weight"));
    }

    #[tokio::test]
    async fn retries_on_500() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(PROPOSAL)))
            .mount(&server)
            .await;

        let analyzer = LlmAnalyzer::new(test_config())
            .unwrap()
            .with_base_url(&server.uri());

        let proposal = analyzer.analyze("script", &rubric().await).await.unwrap();
        assert_eq!(proposal.len(), 1);
    }

    #[tokio::test]
    async fn fails_fast_on_401() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&server)
            .await;

        let analyzer = LlmAnalyzer::new(test_config())
            .unwrap()
            .with_base_url(&server.uri());

        let err = analyzer.analyze("script", &rubric().await).await.unwrap_err();
        match err {
            CoachError::Analysis(message) => assert!(message.contains("401")),
            other => panic!("expected analysis error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_json_content_is_an_analysis_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(chat_body("Sorry, I can't help with that.")),
            )
            .mount(&server)
            .await;

        let analyzer = LlmAnalyzer::new(test_config())
            .unwrap()
            .with_base_url(&server.uri());

        let err = analyzer.analyze("script", &rubric().await).await.unwrap_err();
        assert!(matches!(err, CoachError::Analysis(ref m) if m.contains("malformed")));
    }

    #[tokio::test]
    async fn empty_choices_is_an_analysis_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let analyzer = LlmAnalyzer::new(test_config())
            .unwrap()
            .with_base_url(&server.uri());

        assert!(analyzer.analyze("script", &rubric().await).await.is_err());
    }
}
