//! Classification: summarize, ask the model, parse its answer, gate on
//! confidence.
//!
//! Every failure here is folded into a [`Classification`] with `error` set
//! and the category forced to [`Triage::Unknown`]; the pipeline records it
//! and moves on.

use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::llm::LanguageModel;
use crate::models::Triage;
use crate::prompt::PromptTemplates;

/// Outcome of one classification attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub triage: Triage,
    pub confidence: f64,
    pub reason: String,
    pub topics: Vec<String>,
    /// Set whenever no valid classification was obtained.
    pub error: Option<String>,
    /// Model output kept for debugging when it could not be parsed.
    pub raw_response: Option<String>,
}

impl Classification {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            triage: Triage::Unknown,
            confidence: 0.0,
            reason: String::new(),
            topics: Vec::new(),
            error: Some(error.into()),
            raw_response: None,
        }
    }
}

/// Summary text plus the failure that forced a fallback, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub text: String,
    pub error: Option<String>,
}

/// Compress `text` with one model call. On any failure the input comes
/// back unchanged together with the reason.
pub async fn summarize(
    llm: &dyn LanguageModel,
    templates: &PromptTemplates,
    text: &str,
    filename: &str,
) -> Summary {
    let prompt = templates.build_summary_prompt(filename, text);

    let raw = match llm.complete(&prompt, None).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!("summary call failed, classifying original text: {}", e);
            return Summary {
                text: text.to_string(),
                error: Some(e.to_string()),
            };
        }
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        warn!("summary response was empty, classifying original text");
        return Summary {
            text: text.to_string(),
            error: Some("empty summary response".to_string()),
        };
    }

    debug!("summary response: {}", trimmed);
    Summary {
        text: trimmed.to_string(),
        error: None,
    }
}

/// Build the prompt, call the model and parse the reply. Not gated; see
/// [`apply_threshold`].
pub async fn classify_document(
    llm: &dyn LanguageModel,
    templates: &PromptTemplates,
    filename: &str,
    file_extension: &str,
    text: &str,
    truncated: bool,
    file_reference: Option<&Path>,
) -> Classification {
    let prompt =
        templates.build_classify_prompt(filename, file_extension, text, truncated, file_reference);

    match llm.complete(&prompt, file_reference).await {
        Ok(raw) => parse_response(&raw),
        Err(e) => {
            warn!("classification call failed: {}", e);
            Classification::failed(e.to_string())
        }
    }
}

/// Keys may be absent or `null`; both read as the default.
#[derive(Debug, Deserialize)]
struct ResponsePayload {
    #[serde(default)]
    classification: Option<String>,
    #[serde(default, deserialize_with = "lenient_confidence")]
    confidence: f64,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    topics: Option<Vec<String>>,
}

/// A number, a numeric string such as `"0.85"`, or `null` (read as 0).
fn lenient_confidence<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => Ok(0.0),
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| D::Error::custom(format!("confidence {} is not a float", n))),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| D::Error::custom(format!("confidence '{}' is not a number", s))),
        other => Err(D::Error::custom(format!(
            "confidence must be a number, got {}",
            other
        ))),
    }
}

/// Turn free-form model output into a [`Classification`].
pub fn parse_response(raw: &str) -> Classification {
    let candidate = extract_json(raw);

    let payload = serde_json::from_str::<serde_json::Value>(candidate)
        .map_err(|e| e.to_string())
        .and_then(|value| {
            if !value.is_object() {
                return Err("expected a JSON object".to_string());
            }
            serde_json::from_value::<ResponsePayload>(value).map_err(|e| e.to_string())
        });

    let payload = match payload {
        Ok(p) => p,
        Err(detail) => {
            return Classification {
                raw_response: Some(raw.to_string()),
                ..Classification::failed(format!("parse failed: {}", detail))
            }
        }
    };

    let classification = payload
        .classification
        .unwrap_or_else(|| Triage::Unknown.to_string());
    let triage = match classification.parse::<Triage>() {
        Ok(triage) => triage,
        Err(_) => {
            return Classification {
                raw_response: Some(raw.to_string()),
                ..Classification::failed(format!(
                    "unrecognized classification '{}'",
                    classification
                ))
            }
        }
    };

    if !(0.0..=1.0).contains(&payload.confidence) {
        return Classification {
            raw_response: Some(raw.to_string()),
            ..Classification::failed(format!(
                "confidence out of range: {}",
                payload.confidence
            ))
        };
    }

    Classification {
        triage,
        confidence: payload.confidence,
        reason: payload.reason.unwrap_or_default(),
        topics: payload.topics.unwrap_or_default(),
        error: None,
        raw_response: None,
    }
}

/// Contents of the first ```` ``` ```` fenced block (an optional `json` tag
/// is dropped), or the whole trimmed text when there is no complete fence.
pub fn extract_json(raw: &str) -> &str {
    const FENCE: &str = "```";

    let Some(open) = raw.find(FENCE) else {
        return raw.trim();
    };
    let body = &raw[open + FENCE.len()..];
    let Some(close) = body.find(FENCE) else {
        return raw.trim();
    };
    let inner = &body[..close];
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.trim()
}

/// Demote a successful answer below `threshold` to unknown. Errored and
/// already-unknown results pass through. Confidence is kept as reported.
pub fn apply_threshold(classification: Classification, threshold: f64) -> Classification {
    if classification.error.is_some() || classification.triage == Triage::Unknown {
        return classification;
    }
    if classification.confidence < threshold {
        info!(
            "confidence {:.2} < threshold {:.2}: {} -> unknown",
            classification.confidence, threshold, classification.triage
        );
        return Classification {
            triage: Triage::Unknown,
            ..classification
        };
    }
    classification
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::CallError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Canned {
        reply: Result<String, CallError>,
        prompts: Mutex<Vec<String>>,
    }

    impl Canned {
        fn new(reply: Result<&str, CallError>) -> Self {
            Self {
                reply: reply.map(str::to_string),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for Canned {
        async fn complete(
            &self,
            prompt: &str,
            _file_reference: Option<&Path>,
        ) -> Result<String, CallError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone()
        }
    }

    fn ok(triage: Triage, confidence: f64) -> Classification {
        Classification {
            triage,
            confidence,
            reason: "r".to_string(),
            topics: vec![],
            error: None,
            raw_response: None,
        }
    }

    #[test]
    fn parses_plain_json() {
        let c = parse_response(
            r#"{"classification":"evergreen","confidence":0.9,"reason":"manual","topics":["ops","k8s"]}"#,
        );
        assert_eq!(c.triage, Triage::Evergreen);
        assert_eq!(c.confidence, 0.9);
        assert_eq!(c.reason, "manual");
        assert_eq!(c.topics, vec!["ops", "k8s"]);
        assert!(c.error.is_none());
    }

    #[test]
    fn unwraps_first_fence() {
        let raw = "Sure!\n```json\n{\"classification\": \"temporal\", \"confidence\": 0.8}\n```\nand\n```{}```";
        let c = parse_response(raw);
        assert_eq!(c.triage, Triage::Temporal);
        assert_eq!(c.confidence, 0.8);
        assert_eq!(c.reason, "");
        assert!(c.topics.is_empty());

        assert_eq!(extract_json("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(extract_json("  {\"a\":1} \n"), "{\"a\":1}");
    }

    #[test]
    fn missing_fields_take_defaults() {
        let c = parse_response("{}");
        assert_eq!(c.triage, Triage::Unknown);
        assert_eq!(c.confidence, 0.0);
        assert!(c.error.is_none());
    }

    #[test]
    fn garbage_keeps_raw_response() {
        let c = parse_response("I think it's evergreen");
        assert_eq!(c.triage, Triage::Unknown);
        assert_eq!(c.confidence, 0.0);
        assert!(c.error.as_deref().unwrap().starts_with("parse failed: "));
        assert_eq!(c.raw_response.as_deref(), Some("I think it's evergreen"));

        let c = parse_response("[1, 2]");
        assert!(c.error.as_deref().unwrap().starts_with("parse failed: "));
    }

    #[test]
    fn unknown_category_is_an_error() {
        let c = parse_response(r#"{"classification":"archive","confidence":0.99}"#);
        assert_eq!(c.triage, Triage::Unknown);
        assert_eq!(c.error.as_deref(), Some("unrecognized classification 'archive'"));
        assert!(c.raw_response.is_some());
    }

    #[test]
    fn null_fields_read_as_defaults() {
        let c = parse_response(
            r#"{"classification":"evergreen","confidence":0.9,"reason":null,"topics":null}"#,
        );
        assert_eq!(c.triage, Triage::Evergreen);
        assert_eq!(c.confidence, 0.9);
        assert_eq!(c.reason, "");
        assert!(c.topics.is_empty());
        assert!(c.error.is_none());

        let c = parse_response(r#"{"classification":null,"confidence":null}"#);
        assert_eq!(c.triage, Triage::Unknown);
        assert_eq!(c.confidence, 0.0);
        assert!(c.error.is_none());
    }

    #[test]
    fn numeric_string_confidence_is_accepted() {
        let c = parse_response(r#"{"classification":"temporal","confidence":" 0.85 "}"#);
        assert_eq!(c.triage, Triage::Temporal);
        assert_eq!(c.confidence, 0.85);
        assert!(c.error.is_none());

        let c = parse_response(r#"{"classification":"temporal","confidence":"high"}"#);
        assert_eq!(c.triage, Triage::Unknown);
        assert!(c.error.as_deref().unwrap().starts_with("parse failed: "));
        assert!(c.raw_response.is_some());
    }

    #[test]
    fn confidence_outside_unit_range_is_an_error() {
        let raw = r#"{"classification":"evergreen","confidence":95}"#;
        let c = apply_threshold(parse_response(raw), 0.7);
        assert_eq!(c.triage, Triage::Unknown);
        assert_eq!(c.confidence, 0.0);
        assert_eq!(c.error.as_deref(), Some("confidence out of range: 95"));
        assert_eq!(c.raw_response.as_deref(), Some(raw));

        let c = parse_response(r#"{"classification":"temporal","confidence":-3}"#);
        assert_eq!(c.triage, Triage::Unknown);
        assert_eq!(c.error.as_deref(), Some("confidence out of range: -3"));

        let c = parse_response(r#"{"classification":"temporal","confidence":"NaN"}"#);
        assert!(c.error.as_deref().unwrap().starts_with("confidence out of range"));

        assert!(parse_response(r#"{"classification":"temporal","confidence":1}"#).error.is_none());
        assert!(parse_response(r#"{"classification":"temporal","confidence":0}"#).error.is_none());
    }

    #[test]
    fn threshold_gate() {
        assert_eq!(apply_threshold(ok(Triage::Evergreen, 0.7), 0.7).triage, Triage::Evergreen);

        let gated = apply_threshold(ok(Triage::Temporal, 0.3), 0.7);
        assert_eq!(gated.triage, Triage::Unknown);
        assert_eq!(gated.confidence, 0.3);

        let failed = Classification {
            triage: Triage::Evergreen,
            ..Classification::failed("boom")
        };
        assert_eq!(apply_threshold(failed.clone(), 0.7), failed);

        let unknown = ok(Triage::Unknown, 0.1);
        assert_eq!(apply_threshold(unknown.clone(), 0.7), unknown);
    }

    #[tokio::test]
    async fn summary_falls_back_on_failure_or_blank() {
        let t = PromptTemplates::builtin();

        let llm = Canned::new(Ok("  short version \n"));
        let s = summarize(&llm, &t, "long text", "a.md").await;
        assert_eq!(s, Summary { text: "short version".into(), error: None });
        assert!(llm.prompts.lock().unwrap()[0].contains("long text"));

        let llm = Canned::new(Ok("   \n"));
        let s = summarize(&llm, &t, "long text", "a.md").await;
        assert_eq!(s.text, "long text");
        assert_eq!(s.error.as_deref(), Some("empty summary response"));

        let llm = Canned::new(Err(CallError::Timeout { seconds: 3 }));
        let s = summarize(&llm, &t, "long text", "a.md").await;
        assert_eq!(s.text, "long text");
        assert!(s.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn call_failures_become_failed_classifications() {
        let t = PromptTemplates::builtin();
        let llm = Canned::new(Err(CallError::NotFound { program: "claude".into() }));
        let c = classify_document(&llm, &t, "a.md", ".md", "body", false, None).await;
        assert_eq!(c.triage, Triage::Unknown);
        assert_eq!(c.confidence, 0.0);
        assert_eq!(c.error.as_deref(), Some("CLI command 'claude' not found"));
        assert!(c.raw_response.is_none());

        let llm = Canned::new(Err(CallError::NonZeroExit { code: 2, stderr: "bad flag".into() }));
        let c = classify_document(&llm, &t, "a.md", ".md", "body", false, None).await;
        assert!(c.error.unwrap().contains("code 2"));
    }
}
