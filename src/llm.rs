//! Language-model dispatch.
//!
//! Every classification and summarization request goes through
//! [`LanguageModel::complete`]. The production implementation,
//! [`LlmClient`], resolves the configured mode/provider into one of three
//! [`Backend`]s on each call:
//!
//! | Backend | Transport |
//! |---------|-----------|
//! | [`Backend::Api`] | HTTP chat-completions (OpenAI-compatible, or Anthropic messages) |
//! | [`Backend::ClaudeCli`] | `<bin> -p --output-format text [--model M]`, prompt on stdin |
//! | [`Backend::CodexCli`] | `<bin> exec - [-m M]`, prompt on stdin |
//!
//! Failures come back as a [`CallError`] whose variants callers match on;
//! nothing in this module swallows an error.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::config::{LlmConfig, LlmMode};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// The CLI executable could not be found.
    #[error("CLI command '{program}' not found")]
    NotFound { program: String },
    /// The call did not finish within the configured timeout.
    #[error("LLM call timed out ({seconds}s)")]
    Timeout { seconds: u64 },
    /// The CLI ran and exited unsuccessfully.
    #[error("CLI exited with code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },
    /// Network, HTTP status, or payload failure.
    #[error("LLM request failed: {detail}")]
    Transport { detail: String },
    /// `mode = "cli"` with a provider that has no command-line backend.
    #[error("unsupported CLI provider: '{0}' (expected claude or codex)")]
    UnsupportedProvider(String),
}

impl CallError {
    fn transport(detail: impl Into<String>) -> Self {
        CallError::Transport {
            detail: detail.into(),
        }
    }
}

/// Something that turns a prompt into raw model output.
///
/// `file_reference` is set in file-direct mode; the prompt already names
/// the file, implementations only need to run it.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str, file_reference: Option<&Path>)
        -> Result<String, CallError>;
}

/// Concrete transport for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Api,
    ClaudeCli,
    CodexCli,
}

impl Backend {
    pub fn resolve(mode: LlmMode, provider: &str) -> Result<Self, CallError> {
        match mode {
            LlmMode::Api => Ok(Backend::Api),
            LlmMode::Cli => match provider {
                "claude" => Ok(Backend::ClaudeCli),
                "codex" => Ok(Backend::CodexCli),
                other => Err(CallError::UnsupportedProvider(other.to_string())),
            },
        }
    }

    fn default_program(&self) -> &'static str {
        match self {
            Backend::Api => "",
            Backend::ClaudeCli => "claude",
            Backend::CodexCli => "codex",
        }
    }
}

/// Argument vector (after the program name) for the claude CLI.
pub fn claude_args(model: Option<&str>) -> Vec<String> {
    let mut args = vec![
        "-p".to_string(),
        "--output-format".to_string(),
        "text".to_string(),
    ];
    if let Some(model) = model {
        args.push("--model".to_string());
        args.push(model.to_string());
    }
    args
}

/// Argument vector (after the program name) for the codex CLI.
pub fn codex_args(model: Option<&str>) -> Vec<String> {
    let mut args = vec!["exec".to_string(), "-".to_string()];
    if let Some(model) = model {
        args.push("-m".to_string());
        args.push(model.to_string());
    }
    args
}

/// Dispatches to the backend selected by [`LlmConfig`].
pub struct LlmClient {
    mode: LlmMode,
    provider: String,
    /// `provider/model` in api mode, bare model name in cli mode.
    model: String,
    timeout_secs: u64,
    api_base: Option<String>,
    api_key_env: String,
    command: Option<String>,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let timeout_secs = config.rate_limit.request_timeout_sec;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            mode: config.mode,
            provider: config.provider.clone(),
            model: config.model_spec(),
            timeout_secs,
            api_base: config.base_url().map(str::to_string),
            api_key_env: config.api_key_env.clone(),
            command: config.command().map(str::to_string),
            http,
        })
    }

    /// Full argv (program first) for cli backends; `None` in api mode.
    pub fn command_line(&self) -> Result<Option<Vec<String>>, CallError> {
        let backend = Backend::resolve(self.mode, &self.provider)?;
        let model = Some(self.model.as_str()).filter(|m| !m.is_empty());
        let args = match backend {
            Backend::Api => return Ok(None),
            Backend::ClaudeCli => claude_args(model),
            Backend::CodexCli => codex_args(model),
        };
        let mut argv = vec![self.program(backend)];
        argv.extend(args);
        Ok(Some(argv))
    }

    fn program(&self, backend: Backend) -> String {
        self.command
            .clone()
            .unwrap_or_else(|| backend.default_program().to_string())
    }

    /// Route one prompt to the configured backend.
    pub async fn call(&self, prompt: &str) -> Result<String, CallError> {
        let backend = Backend::resolve(self.mode, &self.provider)?;
        let raw = match backend {
            Backend::Api => self.call_api(prompt).await?,
            Backend::ClaudeCli | Backend::CodexCli => {
                let argv = self.command_line()?.unwrap_or_default();
                let (program, args) = argv
                    .split_first()
                    .ok_or_else(|| CallError::transport("empty CLI command line"))?;
                run_cli(program, args, prompt, self.timeout_secs).await?
            }
        };
        debug!("LLM response: {}", raw);
        Ok(raw)
    }

    async fn call_api(&self, prompt: &str) -> Result<String, CallError> {
        let (provider, model) = split_model_spec(&self.model);
        let target = ApiTarget::resolve(provider, self.api_base.as_deref())?;
        let api_key = std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());

        let request = match target.flavor {
            ApiFlavor::ChatCompletions => {
                let body = serde_json::json!({
                    "model": model,
                    "messages": [{"role": "user", "content": prompt}],
                });
                let mut req = self
                    .http
                    .post(format!("{}/chat/completions", target.base))
                    .json(&body);
                if let Some(key) = &api_key {
                    req = req.bearer_auth(key);
                }
                req
            }
            ApiFlavor::AnthropicMessages => {
                let body = serde_json::json!({
                    "model": model,
                    "max_tokens": ANTHROPIC_MAX_TOKENS,
                    "messages": [{"role": "user", "content": prompt}],
                });
                let mut req = self
                    .http
                    .post(format!("{}/v1/messages", target.base))
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .json(&body);
                if let Some(key) = &api_key {
                    req = req.header("x-api-key", key);
                }
                req
            }
        };

        let response = request.send().await.map_err(|e| self.map_reqwest(e))?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(CallError::transport(format!(
                "{} API error {}: {}",
                provider, status, body_text
            )));
        }

        match target.flavor {
            ApiFlavor::ChatCompletions => {
                let parsed: ChatCompletionResponse =
                    response.json().await.map_err(|e| self.map_reqwest(e))?;
                let choice = parsed
                    .choices
                    .into_iter()
                    .next()
                    .ok_or_else(|| CallError::transport("response contained no choices"))?;
                Ok(choice.message.content.unwrap_or_default())
            }
            ApiFlavor::AnthropicMessages => {
                let parsed: MessagesResponse =
                    response.json().await.map_err(|e| self.map_reqwest(e))?;
                Ok(parsed
                    .content
                    .into_iter()
                    .filter_map(|block| block.text)
                    .collect::<Vec<_>>()
                    .join(""))
            }
        }
    }

    fn map_reqwest(&self, e: reqwest::Error) -> CallError {
        if e.is_timeout() {
            CallError::Timeout {
                seconds: self.timeout_secs,
            }
        } else {
            CallError::transport(e.to_string())
        }
    }
}

#[async_trait]
impl LanguageModel for LlmClient {
    async fn complete(
        &self,
        prompt: &str,
        _file_reference: Option<&Path>,
    ) -> Result<String, CallError> {
        self.call(prompt).await
    }
}

const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_MAX_TOKENS: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApiFlavor {
    ChatCompletions,
    AnthropicMessages,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ApiTarget {
    flavor: ApiFlavor,
    base: String,
}

impl ApiTarget {
    fn resolve(provider: &str, base_url: Option<&str>) -> Result<Self, CallError> {
        let flavor = if provider == "anthropic" {
            ApiFlavor::AnthropicMessages
        } else {
            ApiFlavor::ChatCompletions
        };
        let default_base = match provider {
            "openai" => Some("https://api.openai.com/v1"),
            "anthropic" => Some("https://api.anthropic.com"),
            "ollama" => Some("http://localhost:11434/v1"),
            "openrouter" => Some("https://openrouter.ai/api/v1"),
            "groq" => Some("https://api.groq.com/openai/v1"),
            _ => None,
        };
        let base = base_url.or(default_base).ok_or_else(|| {
            CallError::transport(format!(
                "no endpoint known for provider '{}'; set llm.base_url",
                provider
            ))
        })?;
        Ok(Self {
            flavor,
            base: base.trim_end_matches('/').to_string(),
        })
    }
}

/// `"openai/gpt-4o"` → `("openai", "gpt-4o")`. Only the first `/` splits,
/// so `"openrouter/meta-llama/llama-3"` keeps the vendor prefix in the model.
fn split_model_spec(spec: &str) -> (&str, &str) {
    spec.split_once('/').unwrap_or(("openai", spec))
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
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
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

/// Run `program args…` with `prompt` on stdin and return its stdout.
///
/// The child is killed if it outlives `timeout_secs`.
pub async fn run_cli(
    program: &str,
    args: &[String],
    prompt: &str,
    timeout_secs: u64,
) -> Result<String, CallError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CallError::NotFound {
                    program: program.to_string(),
                }
            } else {
                CallError::transport(format!("failed to start '{}': {}", program, e))
            }
        })?;

    // Feed stdin concurrently so a large prompt cannot deadlock against a
    // full stdout pipe.
    let writer = child.stdin.take().map(|mut stdin| {
        let input = prompt.to_string();
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                debug!("writing prompt to CLI stdin failed: {}", e);
            }
        })
    });

    let output =
        match tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait_with_output())
            .await
        {
            Ok(result) => result.map_err(|e| {
                CallError::transport(format!("waiting for '{}' failed: {}", program, e))
            })?,
            Err(_) => {
                return Err(CallError::Timeout {
                    seconds: timeout_secs,
                })
            }
        };

    if let Some(writer) = writer {
        let _ = writer.await;
    }

    if !output.status.success() {
        return Err(CallError::NonZeroExit {
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_config(provider: &str, model: &str) -> LlmConfig {
        LlmConfig {
            mode: LlmMode::Cli,
            provider: provider.to_string(),
            model: model.to_string(),
            ..LlmConfig::default()
        }
    }

    #[test]
    fn claude_argv() {
        assert_eq!(claude_args(None), vec!["-p", "--output-format", "text"]);
        assert_eq!(
            claude_args(Some("sonnet")),
            vec!["-p", "--output-format", "text", "--model", "sonnet"]
        );
    }

    #[test]
    fn codex_argv() {
        assert_eq!(codex_args(None), vec!["exec", "-"]);
        assert_eq!(codex_args(Some("o3")), vec!["exec", "-", "-m", "o3"]);
    }

    #[test]
    fn backend_resolution() {
        assert_eq!(Backend::resolve(LlmMode::Api, "anything").unwrap(), Backend::Api);
        assert_eq!(Backend::resolve(LlmMode::Cli, "claude").unwrap(), Backend::ClaudeCli);
        assert_eq!(Backend::resolve(LlmMode::Cli, "codex").unwrap(), Backend::CodexCli);
        assert_eq!(
            Backend::resolve(LlmMode::Cli, "gemini").unwrap_err(),
            CallError::UnsupportedProvider("gemini".to_string())
        );
    }

    #[test]
    fn command_line_uses_override_and_omits_empty_model() {
        let mut cfg = cli_config("claude", "");
        cfg.command = Some("/opt/bin/claude".to_string());
        let client = LlmClient::from_config(&cfg).unwrap();
        assert_eq!(
            client.command_line().unwrap().unwrap(),
            vec!["/opt/bin/claude", "-p", "--output-format", "text"]
        );

        let client = LlmClient::from_config(&cli_config("codex", "o3")).unwrap();
        assert_eq!(
            client.command_line().unwrap().unwrap(),
            vec!["codex", "exec", "-", "-m", "o3"]
        );

        let client = LlmClient::from_config(&LlmConfig::default()).unwrap();
        assert_eq!(client.command_line().unwrap(), None);
    }

    #[tokio::test]
    async fn unsupported_cli_provider_fails_per_call() {
        let client = LlmClient::from_config(&cli_config("gemini", "")).unwrap();
        let err = client.call("hi").await.unwrap_err();
        assert!(matches!(err, CallError::UnsupportedProvider(p) if p == "gemini"));
    }

    #[tokio::test]
    async fn missing_binary_is_not_found() {
        let err = run_cli("doc-triager-no-such-binary", &[], "x", 5)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CallError::NotFound {
                program: "doc-triager-no-such-binary".to_string()
            }
        );
    }

    #[test]
    fn api_targets() {
        let t = ApiTarget::resolve("openai", None).unwrap();
        assert_eq!(t.base, "https://api.openai.com/v1");
        assert_eq!(t.flavor, ApiFlavor::ChatCompletions);

        let t = ApiTarget::resolve("anthropic", None).unwrap();
        assert_eq!(t.flavor, ApiFlavor::AnthropicMessages);

        let t = ApiTarget::resolve("ollama", Some("http://gpu-box:11434/v1/")).unwrap();
        assert_eq!(t.base, "http://gpu-box:11434/v1");

        assert!(matches!(
            ApiTarget::resolve("acme", None),
            Err(CallError::Transport { .. })
        ));
    }

    #[test]
    fn model_spec_split() {
        assert_eq!(split_model_spec("openai/gpt-4o"), ("openai", "gpt-4o"));
        assert_eq!(
            split_model_spec("openrouter/meta-llama/llama-3"),
            ("openrouter", "meta-llama/llama-3")
        );
    }
}
