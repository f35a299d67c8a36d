//! End-to-end runs of the triage pipeline with a scripted model.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use doc_triager::checksum::source_key;
use doc_triager::config::{Config, LlmMode};
use doc_triager::extract::{DocumentExtractor, ExtractError, TextExtractor};
use doc_triager::llm::{CallError, LanguageModel, LlmClient};
use doc_triager::models::{RunSummary, Triage, TriageRecord};
use doc_triager::pipeline::{Disposition, Pipeline};
use doc_triager::store::TriageStore;
use doc_triager::truncate::TRUNCATION_MARKER;

/// Replays canned replies in order; the last one repeats forever.
struct Scripted {
    replies: Mutex<VecDeque<Result<String, CallError>>>,
    prompts: Mutex<Vec<String>>,
    file_refs: Mutex<Vec<Option<PathBuf>>>,
}

impl Scripted {
    fn new(replies: Vec<Result<&str, CallError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().map(|r| r.map(str::to_string)).collect()),
            prompts: Mutex::new(Vec::new()),
            file_refs: Mutex::new(Vec::new()),
        })
    }

    fn answering(json: &str) -> Arc<Self> {
        Self::new(vec![Ok(json)])
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    fn prompt(&self, i: usize) -> String {
        self.prompts.lock().unwrap()[i].clone()
    }
}

#[async_trait]
impl LanguageModel for Scripted {
    async fn complete(
        &self,
        prompt: &str,
        file_reference: Option<&Path>,
    ) -> Result<String, CallError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.file_refs
            .lock()
            .unwrap()
            .push(file_reference.map(Path::to_path_buf));
        let mut replies = self.replies.lock().unwrap();
        if replies.len() > 1 {
            replies.pop_front().unwrap()
        } else {
            replies.front().cloned().unwrap()
        }
    }
}

/// Counts conversions; optionally fails every one.
#[derive(Default)]
struct CountingExtractor {
    calls: AtomicUsize,
    fail: bool,
}

impl CountingExtractor {
    fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: true,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TextExtractor for CountingExtractor {
    fn convert(&self, path: &Path) -> Result<String, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ExtractError::Pdf("corrupt xref table".to_string()));
        }
        DocumentExtractor.convert(path)
    }
}

const EVERGREEN_90: &str =
    r#"{"classification":"evergreen","confidence":0.9,"reason":"reference manual","topics":["ops"]}"#;

struct Env {
    _tmp: TempDir,
    root: PathBuf,
    config: Config,
}

impl Env {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_path_buf();
        fs::create_dir_all(root.join("in")).unwrap();

        let mut config = Config::default();
        config.input.directory = root.join("in");
        config.output.directory = root.join("out");
        config.database.path = root.join("triage.db");
        config.logging.file = None;
        config.triage.confidence_threshold = 0.7;
        config.text_extraction.min_text_length = 100;

        Self {
            _tmp: tmp,
            root,
            config,
        }
    }

    fn input(&self, rel: &str, body: &str) -> PathBuf {
        let path = self.root.join("in").join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, body).unwrap();
        path
    }

    fn out(&self, rel: &str) -> PathBuf {
        self.root.join("out").join(rel)
    }

    async fn pipeline(&self, llm: Arc<Scripted>, extractor: Arc<CountingExtractor>) -> Pipeline {
        let store = TriageStore::open(&self.config.database.path).await.unwrap();
        Pipeline::new(self.config.clone(), store, llm).with_extractor(extractor)
    }
}

fn lorem(chars: usize) -> String {
    "Lorem ipsum dolor sit amet, consectetur adipiscing elit. "
        .chars()
        .cycle()
        .take(chars)
        .collect()
}

fn recorded(d: Disposition) -> TriageRecord {
    match d {
        Disposition::Recorded(r) => r,
        Disposition::Skipped => panic!("expected a record, file was skipped"),
    }
}

#[tokio::test]
async fn confident_answer_moves_into_category_tree() {
    let env = Env::new();
    let file = env.input("guides/setup.txt", &lorem(500));
    let llm = Scripted::answering(EVERGREEN_90);
    let pipeline = env.pipeline(llm.clone(), Arc::default()).await;

    let record = recorded(pipeline.process_file(&file).await.unwrap());

    let dest = env.out("evergreen/guides/setup.txt");
    assert!(dest.exists());
    assert!(!file.exists());
    assert_eq!(record.destination_path.as_deref(), Some(dest.to_str().unwrap()));
    assert_eq!(record.triage, Triage::Evergreen);
    assert_eq!(record.confidence, Some(0.9));
    assert_eq!(record.reason.as_deref(), Some("reference manual"));
    assert_eq!(record.topics, vec!["ops"]);
    assert!(!record.truncated);
    assert_eq!(record.extracted_text_length, 500);
    assert_eq!(record.file_size, 500);
    assert_eq!(record.file_extension, ".txt");
    assert_eq!(record.llm_provider, "openai");
    assert_eq!(record.llm_model, "gpt-4o");
    assert!(record.error_message.is_none());

    let stored = pipeline
        .store()
        .latest_by_source_path(&record.source_path)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.triage, Triage::Evergreen);
    assert_eq!(pipeline.store().count().await.unwrap(), 1);
    assert_eq!(llm.calls(), 1);
}

#[tokio::test]
async fn low_confidence_is_demoted_to_unknown() {
    let env = Env::new();
    let file = env.input("memo.txt", &lorem(500));
    let llm = Scripted::answering(r#"{"classification":"temporal","confidence":0.3}"#);
    let pipeline = env.pipeline(llm, Arc::default()).await;

    let record = recorded(pipeline.process_file(&file).await.unwrap());

    assert_eq!(record.triage, Triage::Unknown);
    assert_eq!(record.confidence, Some(0.3));
    assert!(record.error_message.is_none());
    assert!(env.out("unknown/memo.txt").exists());
}

#[tokio::test]
async fn short_text_skips_the_model() {
    let env = Env::new();
    let file = env.input("stub.txt", "0123456789");
    let llm = Scripted::answering(EVERGREEN_90);
    let pipeline = env.pipeline(llm.clone(), Arc::default()).await;

    let summary = pipeline.process_files(&[file.clone()]).await;

    assert_eq!(llm.calls(), 0);
    assert_eq!(
        summary,
        RunSummary {
            total: 1,
            unknown: 1,
            ..RunSummary::default()
        }
    );
    let record = pipeline
        .store()
        .latest_by_source_path(&source_key(&file))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.triage, Triage::Unknown);
    assert_eq!(record.confidence, Some(0.0));
    assert!(record.error_message.is_none());
    assert_eq!(record.extracted_text_length, 10);
    assert!(env.out("unknown/stub.txt").exists());
}

#[tokio::test]
async fn dry_run_records_without_moving() {
    let env = Env::new();
    let file = env.input("keep.txt", &lorem(500));
    let pipeline = env
        .pipeline(Scripted::answering(EVERGREEN_90), Arc::default())
        .await
        .dry_run(true);

    let record = recorded(pipeline.process_file(&file).await.unwrap());

    assert!(file.exists());
    assert!(!env.out("evergreen").exists());
    assert_eq!(record.triage, Triage::Evergreen);
    assert!(record.destination_path.is_none());
    assert_eq!(pipeline.store().count().await.unwrap(), 1);
}

#[tokio::test]
async fn unchanged_file_is_skipped_and_edited_file_is_not() {
    let env = Env::new();
    let file = env.input("notes.txt", &lorem(300));
    let llm = Scripted::answering(EVERGREEN_90);
    let extractor = Arc::new(CountingExtractor::default());
    let pipeline = env
        .pipeline(llm.clone(), extractor.clone())
        .await
        .dry_run(true);

    let first = pipeline.process_files(&[file.clone()]).await;
    assert_eq!(first.evergreen, 1);

    let second = pipeline.process_files(&[file.clone()]).await;
    assert_eq!(second.skipped, 1);
    assert_eq!(extractor.calls(), 1);
    assert_eq!(llm.calls(), 1);
    assert_eq!(pipeline.store().count().await.unwrap(), 1);

    fs::write(&file, lorem(400)).unwrap();
    let third = pipeline.process_files(&[file.clone()]).await;
    assert_eq!(third.evergreen, 1);
    assert_eq!(third.skipped, 0);
    assert_eq!(extractor.calls(), 2);
    assert_eq!(pipeline.store().count().await.unwrap(), 2);
}

#[tokio::test]
async fn insufficient_outcome_is_skipped_on_rerun_too() {
    let env = Env::new();
    let file = env.input("tiny.md", "# Hi");
    let extractor = Arc::new(CountingExtractor::default());
    let pipeline = env
        .pipeline(Scripted::answering(EVERGREEN_90), extractor.clone())
        .await
        .dry_run(true);

    pipeline.process_files(&[file.clone()]).await;
    let again = pipeline.process_files(&[file]).await;
    assert_eq!(again.skipped, 1);
    assert_eq!(extractor.calls(), 1);
}

#[tokio::test]
async fn extraction_failure_is_recorded_as_error() {
    let env = Env::new();
    let file = env.input("broken.pdf", "%PDF-garbage");
    let llm = Scripted::answering(EVERGREEN_90);
    let pipeline = env.pipeline(llm.clone(), CountingExtractor::failing()).await;

    let summary = pipeline.process_files(&[file.clone()]).await;

    assert_eq!(summary.errors, 1);
    assert_eq!(summary.unknown, 0);
    assert_eq!(llm.calls(), 0);
    let record = pipeline
        .store()
        .latest_by_source_path(&source_key(&file))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.triage, Triage::Unknown);
    assert_eq!(record.confidence, Some(0.0));
    assert!(record.error_message.unwrap().contains("corrupt xref table"));
    assert_eq!(record.extracted_text_length, 0);
    assert!(env.out("unknown/broken.pdf").exists());
}

#[tokio::test]
async fn unparseable_answer_is_an_error_record() {
    let env = Env::new();
    let file = env.input("a.txt", &lorem(200));
    let pipeline = env
        .pipeline(Scripted::answering("evergreen, I'd say"), Arc::default())
        .await;

    let record = recorded(pipeline.process_file(&file).await.unwrap());
    assert_eq!(record.triage, Triage::Unknown);
    assert!(record
        .error_message
        .as_deref()
        .unwrap()
        .starts_with("parse failed: "));
    assert!(env.out("unknown/a.txt").exists());
}

#[tokio::test]
async fn backend_failure_is_an_error_record() {
    let env = Env::new();
    let file = env.input("a.txt", &lorem(200));
    let llm = Scripted::new(vec![Err(CallError::Timeout { seconds: 120 })]);
    let pipeline = env.pipeline(llm, Arc::default()).await;

    let summary = pipeline.process_files(&[file.clone()]).await;
    assert_eq!(summary.errors, 1);

    let record = pipeline
        .store()
        .latest_by_source_path(&source_key(&file))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.error_message.as_deref(), Some("LLM call timed out (120s)"));
    assert_eq!(record.confidence, Some(0.0));
}

#[tokio::test]
async fn long_text_is_truncated_before_classification() {
    let mut env = Env::new();
    env.config.triage.max_input_tokens = 200;
    let body = format!("INTRO {} OUTRO", lorem(1000));
    let file = env.input("long.txt", &body);
    let llm = Scripted::answering(EVERGREEN_90);
    let pipeline = env.pipeline(llm.clone(), Arc::default()).await;

    let record = recorded(pipeline.process_file(&file).await.unwrap());

    assert!(record.truncated);
    assert_eq!(record.extracted_text_length, body.chars().count() as i64);
    let prompt = llm.prompt(0);
    assert!(prompt.contains(TRUNCATION_MARKER));
    assert!(prompt.contains("INTRO"));
    assert!(prompt.contains("OUTRO"));
    assert!(prompt.contains("Content truncated: true"));
}

#[tokio::test]
async fn summary_replaces_text_when_enabled() {
    let mut env = Env::new();
    env.config.text_extraction.llm_summary_enabled = true;
    let file = env.input("report.txt", &lorem(500));
    let llm = Scripted::new(vec![Ok("A quarterly sales report."), Ok(EVERGREEN_90)]);
    let pipeline = env.pipeline(llm.clone(), Arc::default()).await;

    let record = recorded(pipeline.process_file(&file).await.unwrap());

    assert_eq!(llm.calls(), 2);
    assert!(llm.prompt(0).contains("Lorem ipsum"));
    assert!(llm.prompt(1).contains("A quarterly sales report."));
    assert!(!llm.prompt(1).contains("Lorem ipsum"));
    assert_eq!(record.triage, Triage::Evergreen);
    assert_eq!(record.extracted_text_length, 500);
}

#[tokio::test]
async fn failed_summary_falls_back_to_text() {
    let mut env = Env::new();
    env.config.text_extraction.llm_summary_enabled = true;
    let file = env.input("report.txt", &lorem(500));
    let llm = Scripted::new(vec![
        Err(CallError::Transport {
            detail: "connection reset".to_string(),
        }),
        Ok(EVERGREEN_90),
    ]);
    let pipeline = env.pipeline(llm.clone(), Arc::default()).await;

    let record = recorded(pipeline.process_file(&file).await.unwrap());

    assert_eq!(llm.calls(), 2);
    assert!(llm.prompt(1).contains("Lorem ipsum"));
    assert_eq!(record.triage, Triage::Evergreen);
    assert!(record.error_message.is_none());
}

#[tokio::test]
async fn file_direct_mode_bypasses_extraction() {
    let mut env = Env::new();
    env.config.llm.mode = LlmMode::Cli;
    env.config.llm.provider = "claude".to_string();
    env.config.llm.model = "sonnet".to_string();
    let file = env.input("deck.pptx", "not really a pptx");
    let llm = Scripted::answering(EVERGREEN_90);
    let extractor = Arc::new(CountingExtractor::default());
    let pipeline = env.pipeline(llm.clone(), extractor.clone()).await;

    let record = recorded(pipeline.process_file(&file).await.unwrap());

    assert_eq!(extractor.calls(), 0);
    assert_eq!(record.extracted_text_length, 0);
    assert!(!record.truncated);
    assert_eq!(record.triage, Triage::Evergreen);
    assert_eq!(record.llm_provider, "claude");
    assert_eq!(record.llm_model, "sonnet");
    assert!(llm.prompt(0).contains(&format!("File: {}", file.display())));
    assert_eq!(llm.file_refs.lock().unwrap()[0].as_deref(), Some(file.as_path()));
}

#[tokio::test]
async fn vanished_file_does_not_stop_the_batch() {
    let env = Env::new();
    let gone = env.root.join("in/gone.txt");
    let file = env.input("present.txt", &lorem(300));
    let pipeline = env
        .pipeline(Scripted::answering(EVERGREEN_90), Arc::default())
        .await;

    let summary = pipeline.process_files(&[gone, file]).await;

    assert_eq!(summary.total, 2);
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.evergreen, 1);
    assert_eq!(pipeline.store().count().await.unwrap(), 1);
}

#[tokio::test]
async fn unsupported_cli_provider_is_recorded_not_fatal() {
    let mut env = Env::new();
    env.config.llm.mode = LlmMode::Cli;
    env.config.llm.provider = "gemini".to_string();
    let file = env.input("a.txt", &lorem(300));
    let store = TriageStore::open(&env.config.database.path).await.unwrap();
    let llm = Arc::new(LlmClient::from_config(&env.config.llm).unwrap());
    let pipeline = Pipeline::new(env.config.clone(), store, llm).dry_run(true);

    let record = recorded(pipeline.process_file(&file).await.unwrap());

    assert_eq!(record.triage, Triage::Unknown);
    assert!(record
        .error_message
        .unwrap()
        .contains("unsupported CLI provider: 'gemini'"));
}

#[tokio::test]
async fn collisions_across_runs_get_numbered() {
    let env = Env::new();
    let llm = Scripted::answering(EVERGREEN_90);
    let pipeline = env.pipeline(llm, Arc::default()).await;

    let first = env.input("same.txt", &lorem(300));
    pipeline.process_file(&first).await.unwrap();
    let second = env.input("same.txt", &lorem(301));
    let record = recorded(pipeline.process_file(&second).await.unwrap());

    assert!(env.out("evergreen/same.txt").exists());
    assert_eq!(
        record.destination_path.as_deref(),
        Some(env.out("evergreen/same_1.txt").to_str().unwrap())
    );
}

#[tokio::test]
async fn debug_mirror_receives_extracted_text() {
    let mut env = Env::new();
    env.config.text_extraction.debug_dir = Some(env.root.join("debug"));
    let file = env.input("sub/short.txt", "too short");
    let pipeline = env
        .pipeline(Scripted::answering(EVERGREEN_90), Arc::default())
        .await
        .dry_run(true);

    pipeline.process_file(&file).await.unwrap();

    let mirrored = env.root.join("debug/sub/short.txt.md");
    assert_eq!(fs::read_to_string(mirrored).unwrap(), "too short");
}

#[tokio::test]
async fn failed_insert_names_the_moved_file() {
    let env = Env::new();
    let file = env.input("guides/setup.txt", &lorem(500));
    let pipeline = env.pipeline(Scripted::answering(EVERGREEN_90), Arc::default()).await;

    let side = doc_triager::db::connect(&env.config.database.path).await.unwrap();
    sqlx::query(
        "CREATE TRIGGER refuse_insert BEFORE INSERT ON triage_results \
         BEGIN SELECT RAISE(ABORT, 'disk full'); END",
    )
    .execute(&side)
    .await
    .unwrap();
    side.close().await;

    let err = pipeline.process_file(&file).await.unwrap_err();

    let dest = env.out("evergreen/guides/setup.txt");
    let message = format!("{:#}", err);
    assert!(message.contains("record not written for"), "{message}");
    assert!(message.contains(&source_key(&file)), "{message}");
    assert!(message.contains(dest.to_str().unwrap()), "{message}");
    assert!(dest.exists());
    assert_eq!(pipeline.store().count().await.unwrap(), 0);
}
