#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;

use cmdex::db;
use cmdex::embedding::Embedder;
use cmdex::error::{CmdexError, Result};
use cmdex::index::MemoryIndex;
use cmdex::ledger::SyncLedger;
use cmdex::migrate;
use cmdex::models::{Command, DocSection, Example, Parameter, Version, VersionMapping};
use cmdex::source::MemorySource;
use cmdex::sparse::{term_index, tokenize};
use cmdex::sync::{CancelToken, SyncSettings, Synchronizer};

pub const DIMS: usize = 256;

/// Hashed bag-of-words vectors: texts sharing words are close.
pub fn bag_of_words(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for token in tokenize(text) {
        v[term_index(&token) as usize % DIMS] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[derive(Default)]
pub struct TestEmbedder {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Embedder for TestEmbedder {
    fn model_name(&self) -> &str {
        "test-bag-of-words"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| bag_of_words(t)).collect())
    }
}

/// Fails with a transient error for any batch containing `marker`, until
/// `healed` is set.
pub struct FlakyEmbedder {
    pub marker: String,
    pub healed: AtomicBool,
}

impl FlakyEmbedder {
    pub fn new(marker: &str) -> Self {
        Self {
            marker: marker.to_string(),
            healed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    fn model_name(&self) -> &str {
        "flaky"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if !self.healed.load(Ordering::SeqCst) && texts.iter().any(|t| t.contains(&self.marker)) {
            return Err(CmdexError::TransientIo("connection reset".into()));
        }
        Ok(texts.iter().map(|t| bag_of_words(t)).collect())
    }
}

/// Always fails with the given error kind.
pub struct FailingEmbedder {
    pub permanent: bool,
}

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.permanent {
            Err(CmdexError::PermanentConfig(
                "expected 256 dimensions, got 768".into(),
            ))
        } else {
            Err(CmdexError::TransientIo("embedding service down".into()))
        }
    }
}

/// Blocks every call until `release` is notified; signals `entered` on
/// the first call.
#[derive(Default)]
pub struct GatedEmbedder {
    pub entered: Notify,
    pub release: Notify,
    pub open: AtomicBool,
}

#[async_trait]
impl Embedder for GatedEmbedder {
    fn model_name(&self) -> &str {
        "gated"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if !self.open.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
            self.open.store(true, Ordering::SeqCst);
            self.release.notify_waiters();
        }
        Ok(texts.iter().map(|t| bag_of_words(t)).collect())
    }
}

/// Requests cancellation on its first call, then embeds normally.
pub struct CancellingEmbedder {
    pub token: CancelToken,
    pub calls: AtomicUsize,
}

#[async_trait]
impl Embedder for CancellingEmbedder {
    fn model_name(&self) -> &str {
        "cancelling"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.token.cancel();
        }
        Ok(texts.iter().map(|t| bag_of_words(t)).collect())
    }
}

pub async fn ledger(dir: &tempfile::TempDir) -> SyncLedger {
    let pool = db::connect_path(&dir.path().join("cmdex.sqlite"))
        .await
        .unwrap();
    migrate::migrate_pool(&pool).await.unwrap();
    SyncLedger::new(pool)
}

pub fn settings(batch_size: usize, workers: usize) -> SyncSettings {
    SyncSettings {
        batch_size,
        workers,
        ..SyncSettings::default()
    }
}

pub struct Harness {
    pub _dir: tempfile::TempDir,
    pub source: Arc<MemorySource>,
    pub index: Arc<MemoryIndex>,
    pub sync: Arc<Synchronizer>,
}

pub async fn harness(embedder: Arc<dyn Embedder>, settings: SyncSettings) -> Harness {
    harness_with(embedder, settings, |s| s).await
}

pub async fn harness_with(
    embedder: Arc<dyn Embedder>,
    settings: SyncSettings,
    configure: impl FnOnce(Synchronizer) -> Synchronizer,
) -> Harness {
    let dir = tempfile::TempDir::new().unwrap();
    let ledger = ledger(&dir).await;
    let source = Arc::new(MemorySource::new());
    seed(&source).await;
    let index = Arc::new(MemoryIndex::new(DIMS));
    let sync = configure(Synchronizer::new(
        source.clone(),
        embedder,
        index.clone(),
        ledger,
        settings,
    ));
    Harness {
        _dir: dir,
        source,
        index,
        sync: Arc::new(sync),
    }
}

// ============ Fixture corpus ============

fn command(version: Version, id: i64, name: &str, synopsis: &str, description: &str) -> Command {
    Command {
        id,
        version,
        name: name.to_string(),
        synopsis: synopsis.to_string(),
        description: description.to_string(),
        syntax: String::new(),
        is_deprecated: false,
    }
}

fn parameter(id: i64, command_id: i64, name: &str, description: &str) -> Parameter {
    Parameter {
        id,
        command_id,
        name: name.to_string(),
        type_name: Some("String".to_string()),
        description: description.to_string(),
        is_required: false,
    }
}

pub const PROMPT_V3: i64 = 1;
pub const DIALOG_V3: i64 = 2;
pub const PROCESS_V3: i64 = 3;
pub const WELCOME_V3: i64 = 4;
pub const PROMPT_V4: i64 = 40;
pub const PROCESS_V4: i64 = 41;
pub const WELCOME_V4: i64 = 42;

/// Units produced by the Show-InstallationPrompt v3 command: the command,
/// three parameters and one example.
pub const PROMPT_V3_UNITS: u64 = 5;

/// Units produced by Execute-Process v3: the command and one parameter.
pub const PROCESS_V3_UNITS: u64 = 2;

pub fn deferral_body(paragraphs: usize) -> String {
    (0..paragraphs)
        .map(|i| {
            format!(
                "Deferral rule {}: an installation may be postponed by the user a limited number \
                 of times before it is enforced, and the deadline is stored in the registry.",
                i
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub async fn seed(source: &MemorySource) {
    let mut prompt = command(
        Version::V3,
        PROMPT_V3,
        "Show-InstallationPrompt",
        "Show a message prompt with a defer button.",
        "Displays a message to the user with buttons, including a defer button.",
    );
    prompt.syntax = "Show-InstallationPrompt [-Message] <String> [-ButtonRightText <String>]".into();
    source.put_command(prompt).await;

    let mut dialog = command(
        Version::V3,
        DIALOG_V3,
        "Show-DialogBox",
        "Show a message dialog box with a button to defer.",
        "Displays a custom message dialog box with a defer button.",
    );
    dialog.is_deprecated = true;
    source.put_command(dialog).await;

    source
        .put_command(command(
            Version::V3,
            PROCESS_V3,
            "Execute-Process",
            "Runs an executable and waits for it to exit.",
            "",
        ))
        .await;
    source
        .put_command(command(
            Version::V3,
            WELCOME_V3,
            "Show-InstallationWelcome",
            "Closes running applications before installing.",
            "Optionally allows the user to defer.",
        ))
        .await;

    source
        .put_command(command(
            Version::V4,
            PROMPT_V4,
            "Show-ADTInstallationPrompt",
            "Show a message prompt with a defer button.",
            "Displays a message to the user with buttons.",
        ))
        .await;
    source
        .put_command(command(
            Version::V4,
            PROCESS_V4,
            "Start-ADTProcess",
            "Runs an executable and waits for it to exit.",
            "",
        ))
        .await;
    source
        .put_command(command(
            Version::V4,
            WELCOME_V4,
            "Show-ADTInstallationWelcome",
            "Closes running applications before installing.",
            "",
        ))
        .await;

    for (v3, v4) in [
        (PROMPT_V3, PROMPT_V4),
        (PROCESS_V3, PROCESS_V4),
        (WELCOME_V3, WELCOME_V4),
    ] {
        source
            .put_mapping(VersionMapping {
                v3_command_id: v3,
                v4_command_id: v4,
            })
            .await;
    }

    source
        .put_parameter(Version::V3, parameter(1, PROMPT_V3, "Message", "The text to display."))
        .await;
    source
        .put_parameter(
            Version::V3,
            parameter(2, PROMPT_V3, "ButtonRightText", "Caption of the right-hand choice."),
        )
        .await;
    source
        .put_parameter(
            Version::V3,
            parameter(3, PROMPT_V3, "ButtonLeftText", "Caption of the left-hand choice."),
        )
        .await;
    source
        .put_parameter(Version::V3, parameter(4, PROCESS_V3, "Path", "Executable to run."))
        .await;
    source
        .put_parameter(Version::V4, parameter(1, PROMPT_V4, "Message", "The text to display."))
        .await;

    source
        .put_example(
            Version::V3,
            Example {
                id: 1,
                command_id: PROMPT_V3,
                title: "Ask before installing".into(),
                code: "Show-InstallationPrompt -Message 'Install now?' -ButtonRightText 'Later'"
                    .into(),
                description: None,
            },
        )
        .await;

    source
        .put_doc_section(DocSection {
            path: "deployment.md".into(),
            heading: "Deferral".into(),
            body: deferral_body(30),
            version: Some(Version::V3),
        })
        .await;
    source
        .put_doc_section(DocSection {
            path: "faq.md".into(),
            heading: "Reboots".into(),
            body: "Return exit code 3010 to request a reboot after installation.".into(),
            version: None,
        })
        .await;
}
