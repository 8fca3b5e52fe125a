//! Trading-strategy classification through an OpenAI-compatible
//! chat-completions endpoint.

use std::time::Duration;

use anyhow::Context;
use econpapers_common::ClassificationVerdict;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const TEMPERATURE: f32 = 0.0;
const MAX_TOKENS: u32 = 500;

#[derive(Debug, thiserror::Error)]
pub enum ClassificationError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// Judges one paper. Implementations must not retry; a failed call leaves the
/// paper for a later run.
pub trait Classifier {
    fn classify(
        &self,
        title: &str,
        abstract_text: &str,
    ) -> Result<ClassificationVerdict, ClassificationError>;
}

pub fn build_prompt(title: &str, abstract_text: &str) -> String {
    format!(
        r#"You are evaluating whether the provided paper describes a quantifiable, implementable, or conceptually backtestable trading strategy. Respond strictly in the structured JSON format below:

{{
    "strategy": true/false,
    "reason": "<Brief explanation of your decision>"
}}

Evaluate using these more inclusive criteria:

1. **Tradable Strategy Concept**:
   - Accept abstracts that discuss allocation strategies, portfolio construction approaches, or asset relationships that could inform trading decisions.
   - Includes papers on portfolio optimization, dynamic asset allocation, hedging strategies, factor investing concepts, or cross-asset relationships with trading implications.
   - Be inclusive of papers discussing high-level strategies without implementation details.

2. **Implicit Trading Signals**:
   - Accept abstracts that suggest or imply potential trading actions, even if specific rules aren't detailed.
   - Recognize that academic papers often describe strategies conceptually without explicit entry/exit points.
   - Consider papers discussing portfolio tilts, rebalancing approaches, or asset selection methodologies as having implicit signals.

3. **Broad Data Acceptance**:
   - Accept papers using or implying standard market data without requiring explicit data specifications.
   - If the strategy could reasonably be implemented with publicly available data, consider this criterion met.

4. **Conceptual Testability**:
   - Accept papers that present ideas that could theoretically be tested, even without explicit mentions of backtesting.
   - Papers discussing historical relationships or empirical findings should qualify.

**Decision Rule:**
- Mark as "true" for any paper that presents ideas that could reasonably inform trading decisions or portfolio construction.
- Only mark "false" for papers that are purely theoretical with no practical application, or that focus exclusively on economic/market analysis without any implications for portfolio management.

---

**Example True Cases:**
- Papers discussing asset allocation strategies (like 60/40), even if only conceptually
- Papers examining factor performance or market anomalies that could inform security selection
- Papers on dynamic hedging or correlation structures that could guide portfolio construction
- Papers discussing optimal portfolio construction methodologies
- Papers exploring cross-asset relationships with trading implications

---
Title:
{title}

Abstract:
{abstract_text}
"#
    )
}

#[derive(Deserialize)]
struct VerdictBody {
    strategy: bool,
    #[serde(default)]
    reason: String,
}

/// Reads `{"strategy": bool, "reason": str}` out of a model reply, which may
/// be wrapped in a Markdown code fence or surrounded by prose.
pub fn parse_verdict(
    content: &str,
    model: &str,
) -> Result<ClassificationVerdict, ClassificationError> {
    let content = content.trim();
    let body = match (content.find('{'), content.rfind('}')) {
        (Some(start), Some(end)) if start < end => &content[start..=end],
        _ => {
            return Err(ClassificationError::MalformedResponse(format!(
                "no JSON object in reply: {}",
                truncate(content, 200)
            )))
        }
    };
    let parsed: VerdictBody = serde_json::from_str(body).map_err(|e| {
        ClassificationError::MalformedResponse(format!("{}: {}", e, truncate(content, 200)))
    })?;
    Ok(ClassificationVerdict {
        strategy: parsed.strategy,
        reason: parsed.reason.trim().to_string(),
        model: model.to_string(),
    })
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Blocking client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct ChatCompletionsClassifier {
    client: Client,
    endpoint: String,
    model: String,
}

impl ChatCompletionsClassifier {
    pub fn new(api_key: &str, endpoint: &str, model: &str) -> anyhow::Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing API key");
        anyhow::ensure!(!model.trim().is_empty(), "missing model name");
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .default_headers(headers)
            .build()
            .context("failed to build classification HTTP client")?;
        Ok(ChatCompletionsClassifier {
            client,
            endpoint: endpoint.to_string(),
            model: model.to_string(),
        })
    }
}

impl Classifier for ChatCompletionsClassifier {
    fn classify(
        &self,
        title: &str,
        abstract_text: &str,
    ) -> Result<ClassificationVerdict, ClassificationError> {
        let prompt = build_prompt(title, abstract_text);
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: &prompt,
            }],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };
        let response = self.client.post(&self.endpoint).json(&request).send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(ClassificationError::Status {
                status,
                body: truncate(&body, 300),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| ClassificationError::MalformedResponse(format!("response body: {}", e)))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                ClassificationError::MalformedResponse("reply has no content".to_string())
            })?;
        let model = parsed
            .model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.model.clone());
        parse_verdict(&content, &model)
    }
}
