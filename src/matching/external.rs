// src/matching/external.rs
use async_trait::async_trait;
use log::{debug, info, warn};
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::{sleep, timeout, Duration, Instant};
use url::Url;

use crate::errors::JudgeError;
use crate::matching::fingerprint::tier_strategy;
use crate::matching::similarity::SimilarityBreakdown;
use crate::models::person::Person;

/// What the comparator already knows about a pair when it asks for a judgment.
#[derive(Debug, Clone)]
pub struct JudgeContext {
    pub tier: u8,
    pub tier_confidence: f64,
    pub similarity: SimilarityBreakdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgment {
    pub is_same_person: bool,
    /// Similarity in [0, 1].
    pub confidence_score: f64,
    #[serde(default)]
    pub reasoning: String,
}

/// A semantic comparison service consulted for ambiguous pairs.
#[async_trait]
pub trait ExternalJudge: Send + Sync {
    async fn judge(&self, a: &Person, b: &Person, context: &JudgeContext) -> Result<Judgment, JudgeError>;

    fn name(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct ExternalJudgeConfig {
    pub enabled: bool,
    pub ollama_url: String,
    pub ollama_model: String,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub max_concurrent_requests: usize,
    pub min_request_interval_ms: u64,
    pub temperature: f32,
    pub num_ctx: u32,
}

impl Default for ExternalJudgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ollama_url: "http://localhost:11434".to_string(),
            ollama_model: "llama3.1".to_string(),
            request_timeout_secs: 120,
            max_retries: 3,
            max_concurrent_requests: 4,
            min_request_interval_ms: 50,
            temperature: 0.1,
            num_ctx: 4096,
        }
    }
}

impl ExternalJudgeConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env::var("OLLAMA_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(defaults.enabled),
            ollama_url: env::var("OLLAMA_URL").unwrap_or(defaults.ollama_url),
            ollama_model: env::var("OLLAMA_MODEL").unwrap_or(defaults.ollama_model),
            request_timeout_secs: env::var("OLLAMA_TIMEOUT_SECS")
                .unwrap_or_else(|_| "120".to_string())
                .parse()
                .unwrap_or(defaults.request_timeout_secs),
            max_retries: env::var("OLLAMA_MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .unwrap_or(defaults.max_retries),
            max_concurrent_requests: env::var("OLLAMA_MAX_CONCURRENT")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .unwrap_or(defaults.max_concurrent_requests),
            min_request_interval_ms: env::var("OLLAMA_MIN_INTERVAL_MS")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .unwrap_or(defaults.min_request_interval_ms),
            temperature: env::var("OLLAMA_TEMPERATURE")
                .unwrap_or_else(|_| "0.1".to_string())
                .parse()
                .unwrap_or(defaults.temperature),
            num_ctx: env::var("OLLAMA_NUM_CTX")
                .unwrap_or_else(|_| "4096".to_string())
                .parse()
                .unwrap_or(defaults.num_ctx),
        }
    }

    pub fn log_config(&self) {
        if self.enabled {
            info!(
                "External judge: model={} url={} timeout={}s retries={} concurrency={} min_interval={}ms",
                self.ollama_model,
                self.ollama_url,
                self.request_timeout_secs,
                self.max_retries,
                self.max_concurrent_requests,
                self.min_request_interval_ms
            );
        } else {
            info!("External judge disabled; ambiguous pairs fall back to tier-only decisions");
        }
    }
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    format: serde_json::Value,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: i32,
    num_ctx: u32,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

/// Ollama-backed judge with bounded concurrency, request spacing, per-attempt timeout and retries.
pub struct OllamaJudge {
    config: ExternalJudgeConfig,
    client: Client,
    endpoint: Url,
    permits: Arc<Semaphore>,
    last_request: Mutex<Option<Instant>>,
}

impl OllamaJudge {
    pub fn new(config: ExternalJudgeConfig) -> anyhow::Result<Self> {
        use anyhow::Context;

        let endpoint = Url::parse(&config.ollama_url)
            .and_then(|base| base.join("/api/generate"))
            .with_context(|| format!("Invalid OLLAMA_URL '{}'", config.ollama_url))?;
        let client = Client::builder()
            .build()
            .context("Failed to build HTTP client for external judge")?;
        let permits = Arc::new(Semaphore::new(config.max_concurrent_requests.max(1)));

        Ok(Self {
            config,
            client,
            endpoint,
            permits,
            last_request: Mutex::new(None),
        })
    }

    /// Waits until at least `min_request_interval_ms` has passed since the previous request start.
    async fn pace(&self) {
        let interval = Duration::from_millis(self.config.min_request_interval_ms);
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < interval {
                sleep(interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn attempt(&self, request: &OllamaRequest) -> Result<Judgment, JudgeError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| JudgeError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(JudgeError::BadStatus(response.status().as_u16()));
        }

        let body: OllamaResponse = response
            .json()
            .await
            .map_err(|e| JudgeError::Unparseable(e.to_string()))?;
        debug!("Raw judge response: {}", body.response);
        parse_judgment(&body.response)
    }

    fn build_request(&self, a: &Person, b: &Person, context: &JudgeContext) -> OllamaRequest {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "is_same_person": {
                    "type": "boolean",
                    "description": "Whether both records describe the same real person"
                },
                "confidence_score": {
                    "type": "number",
                    "minimum": 0.0,
                    "maximum": 1.0,
                    "description": "Confidence from 0.0 to 1.0 that they are the same person"
                },
                "reasoning": {
                    "type": "string",
                    "description": "Short explanation of the decision"
                }
            },
            "required": ["is_same_person", "confidence_score", "reasoning"]
        });

        OllamaRequest {
            model: self.config.ollama_model.clone(),
            prompt: build_prompt(a, b, context),
            format: schema,
            stream: false,
            options: OllamaOptions {
                temperature: self.config.temperature,
                num_predict: 512,
                num_ctx: self.config.num_ctx,
            },
        }
    }
}

#[async_trait]
impl ExternalJudge for OllamaJudge {
    async fn judge(&self, a: &Person, b: &Person, context: &JudgeContext) -> Result<Judgment, JudgeError> {
        let request = self.build_request(a, b, context);
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| JudgeError::Transport(e.to_string()))?;

        let mut last_error = JudgeError::Transport("no attempt made".to_string());
        let max_retries = self.config.max_retries.max(1);
        for attempt in 1..=max_retries {
            self.pace().await;
            let outcome = timeout(
                Duration::from_secs(self.config.request_timeout_secs),
                self.attempt(&request),
            )
            .await;

            match outcome {
                Ok(Ok(judgment)) => return Ok(judgment),
                Ok(Err(e)) => last_error = e,
                Err(_) => last_error = JudgeError::Timeout(self.config.request_timeout_secs),
            }

            if attempt < max_retries {
                let jitter = rand::thread_rng().gen_range(0..250);
                debug!(
                    "Judge attempt {} for {} / {} failed ({}), retrying",
                    attempt, a.person_id, b.person_id, last_error
                );
                sleep(Duration::from_millis(1000 * attempt as u64 + jitter)).await;
            }
        }

        warn!(
            "Judge gave up on {} / {} after {} attempts: {}",
            a.person_id, b.person_id, max_retries, last_error
        );
        Err(last_error)
    }

    fn name(&self) -> &str {
        &self.config.ollama_model
    }
}

fn describe(person: &Person) -> String {
    let field = |v: &Option<String>| v.as_deref().filter(|s| !s.trim().is_empty()).unwrap_or("-").to_string();
    format!(
        "- Name: {}\n- Relative ({}): {}\n- Age: {}\n- Gender: {}\n- Phone: {}\n- District: {}\n- Locality/Village: {}\n- Linked crimes: {}",
        field(&person.full_name),
        field(&person.relation_type),
        field(&person.relative_name),
        person.age.map(|a| a.to_string()).unwrap_or_else(|| "-".to_string()),
        field(&person.gender),
        field(&person.phone_number),
        field(&person.present_district),
        field(&person.present_locality_village),
        person.crime_ids.len()
    )
}

fn build_prompt(a: &Person, b: &Person, context: &JudgeContext) -> String {
    format!(
        "You are reviewing police records for duplicate person entries. Names may be \
transliterated or misspelled, and fields are often missing.\n\n\
Record A:\n{}\n\nRecord B:\n{}\n\n\
Deterministic signals: both records agree on \"{}\" (tier {}, prior confidence {:.2}). \
Name similarity {:.2}, relative-name similarity {:.2}, age gap {}.\n\n\
Decide whether A and B are the same real person. Respond with JSON only.",
        describe(a),
        describe(b),
        tier_strategy(context.tier),
        context.tier,
        context.tier_confidence,
        context.similarity.full_name,
        context.similarity.relative_name,
        context.similarity
            .age_gap
            .map(|g| g.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
    )
}

/// Parses the model's text, trying the plain body, an embedded object, then a cleaned body.
pub fn parse_judgment(response: &str) -> Result<Judgment, JudgeError> {
    if let Ok(judgment) = serde_json::from_str::<Judgment>(response) {
        return Ok(clamp(judgment));
    }

    if let Some(json_str) = extract_json_from_text(response) {
        if let Ok(judgment) = serde_json::from_str::<Judgment>(&json_str) {
            return Ok(clamp(judgment));
        }
    }

    let cleaned = clean_json_response(response);
    serde_json::from_str::<Judgment>(&cleaned)
        .map(clamp)
        .map_err(|e| JudgeError::Unparseable(e.to_string()))
}

fn clamp(mut judgment: Judgment) -> Judgment {
    judgment.confidence_score = judgment.confidence_score.clamp(0.0, 1.0);
    judgment
}

/// Finds the first balanced `{...}` object in free text.
fn extract_json_from_text(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn clean_json_response(response: &str) -> String {
    response
        .trim()
        .replace("```json", "")
        .replace("```", "")
        .replace(",\n}", "\n}")
        .replace(",}", "}")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_direct_json() {
        let judgment =
            parse_judgment(r#"{"is_same_person": true, "confidence_score": 0.91, "reasoning": "same phone"}"#)
                .unwrap();
        assert!(judgment.is_same_person);
        assert!((judgment.confidence_score - 0.91).abs() < 1e-9);
    }

    #[test]
    fn test_parse_embedded_and_fenced_json() {
        let embedded = "Sure, here you go: {\"is_same_person\": false, \"confidence_score\": 0.2, \"reasoning\": \"ages {differ}\"} thanks";
        let judgment = parse_judgment(embedded).unwrap();
        assert!(!judgment.is_same_person);
        assert_eq!(judgment.reasoning, "ages {differ}");

        let fenced = "```json\n{\"is_same_person\": true, \"confidence_score\": 1.7,}\n```";
        let judgment = parse_judgment(fenced).unwrap();
        assert_eq!(judgment.confidence_score, 1.0);
        assert_eq!(judgment.reasoning, "");
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(matches!(parse_judgment("I cannot decide."), Err(JudgeError::Unparseable(_))));
    }

    #[test]
    fn test_judge_rejects_bad_url() {
        let config = ExternalJudgeConfig {
            ollama_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(OllamaJudge::new(config).is_err());
    }

    #[test]
    fn test_prompt_mentions_both_records() {
        let a = Person::new("A").with_name("Ravi Kumar").with_age(30);
        let b = Person::new("B").with_name("Ravi Kumaar").with_age(30);
        let context = JudgeContext {
            tier: 4,
            tier_confidence: 0.75,
            similarity: crate::matching::similarity::compare_persons(&a, &b),
        };
        let prompt = build_prompt(&a, &b, &context);
        assert!(prompt.contains("Ravi Kumar"));
        assert!(prompt.contains("Ravi Kumaar"));
        assert!(prompt.contains("Name + Phone + Age"));
    }
}
