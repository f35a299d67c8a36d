use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::truncate::TRUNCATION_MARKER;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub triage: TriageConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub text_extraction: TextExtractionConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    #[serde(default)]
    pub directory: PathBuf,
    /// 0 means no limit.
    #[serde(default)]
    pub max_files: usize,
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
    /// Empty means the built-in whitelist.
    #[serde(default)]
    pub extensions: Vec<String>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::new(),
            max_files: 0,
            exclude_patterns: default_exclude_patterns(),
            extensions: Vec::new(),
        }
    }
}

fn default_exclude_patterns() -> Vec<String> {
    crate::scanner::DEFAULT_EXCLUDE_PATTERNS
        .iter()
        .map(|p| p.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct OutputConfig {
    #[serde(default)]
    pub directory: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TriageConfig {
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Maximum characters of document text handed to the model.
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            max_input_tokens: default_max_input_tokens(),
        }
    }
}

fn default_confidence_threshold() -> f64 {
    0.7
}
fn default_max_input_tokens() -> usize {
    8000
}

/// How the classifier is reached.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmMode {
    /// Hosted completion endpoint over HTTP.
    #[default]
    Api,
    /// Local command-line tool fed through stdin.
    Cli,
}

impl LlmMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmMode::Api => "api",
            LlmMode::Cli => "cli",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default)]
    pub mode: LlmMode,
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Overrides the executable name used in cli mode.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            mode: LlmMode::Api,
            provider: default_llm_provider(),
            model: default_llm_model(),
            api_key_env: default_api_key_env(),
            base_url: None,
            command: None,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

impl LlmConfig {
    /// The backend reads the source file itself instead of extracted text.
    pub fn is_file_direct(&self) -> bool {
        self.mode == LlmMode::Cli && self.provider == "claude"
    }

    /// Model identifier handed to the backend: `provider/model` in api mode,
    /// the bare model name for command-line tools.
    pub fn model_spec(&self) -> String {
        match self.mode {
            LlmMode::Api => format!("{}/{}", self.provider, self.model),
            LlmMode::Cli => self.model.clone(),
        }
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref().filter(|s| !s.trim().is_empty())
    }

    pub fn command(&self) -> Option<&str> {
        self.command.as_deref().filter(|s| !s.trim().is_empty())
    }
}

/// Request pacing knobs. Only `request_timeout_sec` is consumed today; the
/// others are accepted so existing config files keep parsing.
#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_sec")]
    pub retry_delay_sec: u64,
    #[serde(default = "default_request_timeout_sec")]
    pub request_timeout_sec: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            max_retries: default_max_retries(),
            retry_delay_sec: default_retry_delay_sec(),
            request_timeout_sec: default_request_timeout_sec(),
        }
    }
}

fn default_requests_per_minute() -> u32 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_sec() -> u64 {
    5
}
fn default_request_timeout_sec() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./triage.db")
}

#[derive(Debug, Deserialize, Clone)]
pub struct TextExtractionConfig {
    #[serde(default = "default_min_text_length")]
    pub min_text_length: usize,
    #[serde(default)]
    pub llm_summary_enabled: bool,
    #[serde(default)]
    pub debug_dir: Option<PathBuf>,
}

impl Default for TextExtractionConfig {
    fn default() -> Self {
        Self {
            min_text_length: default_min_text_length(),
            llm_summary_enabled: false,
            debug_dir: None,
        }
    }
}

fn default_min_text_length() -> usize {
    100
}

impl TextExtractionConfig {
    pub fn debug_dir(&self) -> Option<&Path> {
        self.debug_dir
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PromptsConfig {
    /// Directory holding `classify.txt`, `classify_file.txt` and `summary.txt`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl PromptsConfig {
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref().filter(|p| !p.as_os_str().is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_file")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_file() -> Option<PathBuf> {
    Some(PathBuf::from("./doc-triager.log"))
}

impl LoggingConfig {
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref().filter(|p| !p.as_os_str().is_empty())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        bail!("Config file not found: {}", path.display());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Apply command-line overrides and validate everything a run depends on.
pub fn resolve_config(
    mut config: Config,
    source: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<Config> {
    if let Some(source) = source {
        config.input.directory = source;
    }
    if let Some(output) = output {
        config.output.directory = output;
    }

    if config.input.directory.as_os_str().is_empty() {
        bail!("input directory is not set (use --source or [input] directory)");
    }
    if config.output.directory.as_os_str().is_empty() {
        bail!("output directory is not set (use --output or [output] directory)");
    }

    if !(0.0..=1.0).contains(&config.triage.confidence_threshold) {
        bail!("triage.confidence_threshold must be in [0.0, 1.0]");
    }

    let marker_len = TRUNCATION_MARKER.chars().count();
    if config.triage.max_input_tokens <= marker_len {
        bail!(
            "triage.max_input_tokens must be greater than {} (the truncation marker length)",
            marker_len
        );
    }

    if config.llm.rate_limit.request_timeout_sec == 0 {
        bail!("llm.rate_limit.request_timeout_sec must be > 0");
    }

    if config.llm.provider.trim().is_empty() {
        bail!("llm.provider must be set");
    }

    Ok(config)
}
