//! Per-file triage orchestration and the batch run entry point.
//!
//! For each file, in order:
//!
//! 1. fingerprint, skip if the latest record for the path has the same digest
//! 2. extract → truncate → optional summary (skipped in file-direct mode)
//! 3. classify, then apply the confidence threshold
//! 4. move into `<output>/<category>/…` unless dry-run
//! 5. append one [`TriageRecord`]
//!
//! Extraction failures and short documents short-circuit to step 4 as
//! `unknown` without a model call. A failure anywhere else in a file is
//! logged and counted, and the batch continues with the next file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{error, info, warn};

use crate::checksum;
use crate::classify::{self, Classification};
use crate::config::Config;
use crate::extract::{self, DebugMirror, DocumentExtractor, TextExtractor};
use crate::llm::{LanguageModel, LlmClient};
use crate::models::{ExtractionOutcome, RunSummary, Triage, TriageRecord};
use crate::mover;
use crate::prompt::PromptTemplates;
use crate::scanner;
use crate::store::TriageStore;
use crate::truncate::truncate_text;

/// Command-line adjustments for one run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    /// Overrides `input.max_files`.
    pub limit: Option<usize>,
    /// Overrides `input.extensions`.
    pub extensions: Option<Vec<String>>,
}

/// What happened to one file.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Unchanged since its last record; nothing was written.
    Skipped,
    Recorded(TriageRecord),
}

/// Classification plus the text bookkeeping that goes into the record.
struct Assessment {
    classification: Classification,
    extracted_text_length: i64,
    truncated: bool,
}

pub struct Pipeline {
    config: Config,
    store: TriageStore,
    llm: Arc<dyn LanguageModel>,
    extractor: Arc<dyn TextExtractor>,
    prompts: PromptTemplates,
    mirror: Option<DebugMirror>,
    dry_run: bool,
}

impl Pipeline {
    pub fn new(config: Config, store: TriageStore, llm: Arc<dyn LanguageModel>) -> Self {
        let mirror = config
            .text_extraction
            .debug_dir()
            .map(|dir| DebugMirror::new(config.input.directory.clone(), dir));
        Self {
            config,
            store,
            llm,
            extractor: Arc::new(DocumentExtractor),
            prompts: PromptTemplates::builtin(),
            mirror,
            dry_run: false,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_prompts(mut self, prompts: PromptTemplates) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn store(&self) -> &TriageStore {
        &self.store
    }

    pub fn into_store(self) -> TriageStore {
        self.store
    }

    /// Process `files` in order. Never fails: per-file errors are logged
    /// and counted.
    pub async fn process_files(&self, files: &[PathBuf]) -> RunSummary {
        let mut summary = RunSummary {
            total: files.len(),
            ..RunSummary::default()
        };

        for (i, file) in files.iter().enumerate() {
            info!("[{}/{}] {}", i + 1, files.len(), self.relative(file).display());

            match self.process_file(file).await {
                Ok(Disposition::Skipped) => summary.skipped += 1,
                Ok(Disposition::Recorded(record)) => summary.record(&record),
                Err(e) => {
                    error!("  failed: {}: {:#}", file.display(), e);
                    summary.errors += 1;
                }
            }
        }

        info!("--- run summary ---");
        info!("total:     {}", summary.total);
        info!("evergreen: {}", summary.evergreen);
        info!("temporal:  {}", summary.temporal);
        info!("unknown:   {}", summary.unknown);
        info!("errors:    {}", summary.errors);
        info!("skipped:   {}", summary.skipped);

        summary
    }

    pub async fn process_file(&self, file: &Path) -> Result<Disposition> {
        let checksum = checksum::fingerprint(file)?;
        let file_size = std::fs::metadata(file)
            .with_context(|| format!("Cannot stat file: {}", file.display()))?
            .len() as i64;

        if checksum::matches_latest(&self.store, file, &checksum).await? {
            info!("  skipped (already processed)");
            return Ok(Disposition::Skipped);
        }

        let source_path = checksum::source_key(file);
        if let Some(prior) = self.store.find_by_checksum(&checksum).await? {
            if prior.source_path != source_path {
                info!(
                    "  identical content already triaged as {}: {}",
                    prior.triage, prior.source_path
                );
            }
        }

        let filename = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let file_extension = file
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let assessment = if self.config.llm.is_file_direct() {
            info!("  file-direct mode");
            let classification = classify::classify_document(
                self.llm.as_ref(),
                &self.prompts,
                &filename,
                &file_extension,
                "",
                false,
                Some(file),
            )
            .await;
            Assessment {
                classification,
                extracted_text_length: 0,
                truncated: false,
            }
        } else {
            self.assess_text(file, &filename, &file_extension).await
        };

        let classification =
            classify::apply_threshold(assessment.classification, self.config.triage.confidence_threshold);

        info!(
            "  classification: {} ({:.2}) - {}",
            classification.triage, classification.confidence, classification.reason
        );
        if let Some(raw) = &classification.raw_response {
            warn!("  unparseable response: {}", raw);
        }

        let destination_path = if self.dry_run {
            None
        } else {
            match mover::move_file(
                file,
                &self.config.input.directory,
                &self.config.output.directory,
                classification.triage,
            ) {
                Ok(dest) => Some(dest.to_string_lossy().to_string()),
                Err(e) => {
                    error!("  move failed: {:#}", e);
                    None
                }
            }
        };

        let record = TriageRecord {
            source_path,
            destination_path,
            checksum,
            file_size,
            file_extension,
            triage: classification.triage,
            confidence: Some(classification.confidence),
            reason: Some(classification.reason).filter(|r| !r.is_empty()),
            topics: classification.topics,
            llm_provider: self.config.llm.provider.clone(),
            llm_model: self.config.llm.model.clone(),
            extracted_text_length: assessment.extracted_text_length,
            truncated: assessment.truncated,
            error_message: classification.error,
            processed_at: Utc::now(),
        };
        self.store.insert(&record).await.with_context(|| {
            format!(
                "record not written for {} (moved to {:?})",
                record.source_path, record.destination_path
            )
        })?;

        Ok(Disposition::Recorded(record))
    }

    async fn assess_text(&self, file: &Path, filename: &str, file_extension: &str) -> Assessment {
        let outcome = extract::extract(
            self.extractor.as_ref(),
            file,
            self.config.text_extraction.min_text_length,
            self.mirror.as_ref(),
        );

        let text = match outcome {
            ExtractionOutcome::Failed(message) => {
                warn!("  extraction failed: {}", message);
                return Assessment {
                    classification: Classification {
                        reason: "text extraction failed".to_string(),
                        ..Classification::failed(message)
                    },
                    extracted_text_length: 0,
                    truncated: false,
                };
            }
            ExtractionOutcome::Insufficient(text) => {
                info!("  insufficient text -> unknown");
                return Assessment {
                    classification: Classification {
                        triage: Triage::Unknown,
                        confidence: 0.0,
                        reason: "insufficient text".to_string(),
                        topics: Vec::new(),
                        error: None,
                        raw_response: None,
                    },
                    extracted_text_length: text.trim().chars().count() as i64,
                    truncated: false,
                };
            }
            ExtractionOutcome::Sufficient(text) => text,
        };

        let truncated = truncate_text(&text, self.config.triage.max_input_tokens);

        let classify_text = if self.config.text_extraction.llm_summary_enabled {
            info!("  summarizing...");
            let summary =
                classify::summarize(self.llm.as_ref(), &self.prompts, &truncated.text, filename)
                    .await;
            match &summary.error {
                Some(e) => warn!("  summary failed, classifying original text: {}", e),
                None => info!("  summary done"),
            }
            summary.text
        } else {
            truncated.text
        };

        let classification = classify::classify_document(
            self.llm.as_ref(),
            &self.prompts,
            filename,
            file_extension,
            &classify_text,
            truncated.truncated,
            None,
        )
        .await;

        Assessment {
            classification,
            extracted_text_length: text.chars().count() as i64,
            truncated: truncated.truncated,
        }
    }

    fn relative<'a>(&self, file: &'a Path) -> &'a Path {
        file.strip_prefix(&self.config.input.directory).unwrap_or(file)
    }
}

/// Scan, triage and record everything under `config.input.directory`.
///
/// Errors returned here are fatal-to-the-run and happen before any file
/// is touched: unreadable prompt templates, a missing source directory, or
/// an unusable database.
pub async fn run_triage(config: &Config, options: &RunOptions) -> Result<RunSummary> {
    let prompts = PromptTemplates::load(config.prompts.dir())?;

    let extensions = options
        .extensions
        .as_deref()
        .unwrap_or(&config.input.extensions);
    let mut files = scanner::scan_files(
        &config.input.directory,
        &config.input.exclude_patterns,
        extensions,
    )?;

    let limit = options
        .limit
        .or(Some(config.input.max_files).filter(|n| *n > 0));
    if let Some(limit) = limit {
        files.truncate(limit);
    }

    info!(
        "{} file(s) to triage in {}",
        files.len(),
        config.input.directory.display()
    );
    if options.dry_run {
        info!("dry run: files will not be moved");
    }

    let store = TriageStore::open(&config.database.path).await?;
    let llm = Arc::new(LlmClient::from_config(&config.llm)?);

    let pipeline = Pipeline::new(config.clone(), store, llm)
        .with_prompts(prompts)
        .dry_run(options.dry_run);
    let summary = pipeline.process_files(&files).await;

    let store = pipeline.into_store();
    let counts = store.count_by_triage().await?;
    info!(
        "database totals: evergreen={} temporal={} unknown={}",
        counts.get(&Triage::Evergreen).copied().unwrap_or(0),
        counts.get(&Triage::Temporal).copied().unwrap_or(0),
        counts.get(&Triage::Unknown).copied().unwrap_or(0),
    );
    store.close().await;

    Ok(summary)
}

/// Describe what a run would send to the model for `file`, without
/// calling it or touching the database.
pub fn render_preview(config: &Config, file: &Path) -> Result<String> {
    if !file.is_file() {
        anyhow::bail!("File not found: {}", file.display());
    }

    let prompts = PromptTemplates::load(config.prompts.dir())?;
    let client = LlmClient::from_config(&config.llm)?;

    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let file_extension = file
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut out = String::new();
    out.push_str(&format!(
        "mode: {} ({})\n",
        config.llm.mode.as_str(),
        config.llm.model_spec()
    ));
    if let Some(argv) = client.command_line()? {
        out.push_str(&format!("command: {}\n", argv.join(" ")));
    }

    let prompt = if config.llm.is_file_direct() {
        out.push_str("extraction: skipped (file-direct)\n");
        prompts.build_classify_prompt(&filename, &file_extension, "", false, Some(file))
    } else {
        let outcome = extract::extract(
            &DocumentExtractor,
            file,
            config.text_extraction.min_text_length,
            None,
        );
        match outcome {
            ExtractionOutcome::Failed(message) => {
                out.push_str(&format!("extraction: failed ({})\n", message));
                out.push_str("the file would be recorded as unknown without a model call\n");
                return Ok(out);
            }
            ExtractionOutcome::Insufficient(text) => {
                out.push_str(&format!(
                    "extraction: insufficient ({} chars, need {})\n",
                    text.trim().chars().count(),
                    config.text_extraction.min_text_length
                ));
                out.push_str("the file would be recorded as unknown without a model call\n");
                return Ok(out);
            }
            ExtractionOutcome::Sufficient(text) => {
                let truncated = truncate_text(&text, config.triage.max_input_tokens);
                out.push_str(&format!(
                    "extraction: {} chars, truncated: {}\n",
                    text.chars().count(),
                    truncated.truncated
                ));
                if config.text_extraction.llm_summary_enabled {
                    out.push_str("summary: enabled (the prompt below shows the unsummarized text)\n");
                }
                prompts.build_classify_prompt(
                    &filename,
                    &file_extension,
                    &truncated.text,
                    truncated.truncated,
                    None,
                )
            }
        }
    };

    out.push_str("--- prompt ---\n");
    out.push_str(&prompt);
    if !prompt.ends_with('\n') {
        out.push('\n');
    }
    Ok(out)
}
