//! Integration tests for the generation pipeline against real gate commands.
//!
//! Gates are small `sh` scripts run by the real [`Verifier`] in a temp
//! directory; the generation tool is a fake that edits files there.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use coordination::generation::{GenerationError, GenerationTool, ModelSpec, ToolRun};
use coordination::resilience::{ErrorKind, RetryPolicy};
use coordination::verifier::{run_pipeline, Stage, Verifier, VerifierConfig};
use coordination::GenerationOrchestrator;
use tokio_util::sync::CancellationToken;

fn gate(script: &str) -> Vec<String> {
    vec![format!("sh -c '{script}'")]
}

/// Build passes once `src.txt` says "fixed"; tests pass once `tests.txt` exists.
fn marker_config() -> VerifierConfig {
    VerifierConfig {
        build: gate("grep -q fixed src.txt || { echo \"src.txt: syntax error\"; exit 2; }"),
        lint: gate("true"),
        test: gate("test -f tests.txt || { echo \"no tests\"; exit 1; }"),
        ..Default::default()
    }
}

/// Applies edits keyed on the prompt it receives.
struct EditingTool {
    fixes_build: bool,
    prompts: Mutex<Vec<String>>,
}

impl EditingTool {
    fn new(fixes_build: bool) -> Self {
        Self {
            fixes_build,
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl GenerationTool for EditingTool {
    async fn invoke(
        &self,
        work_dir: &Path,
        model: &ModelSpec,
        prompt: &str,
        _cancel: &CancellationToken,
    ) -> Result<ToolRun, GenerationError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if prompt.starts_with("Fix the following build error") && self.fixes_build {
            std::fs::write(work_dir.join("src.txt"), "fixed").unwrap();
        } else if prompt.starts_with("Add unit tests") {
            std::fs::write(work_dir.join("tests.txt"), "ok").unwrap();
        } else {
            std::fs::write(work_dir.join("src.txt"), "draft").unwrap();
        }
        Ok(ToolRun {
            model: model.name.clone(),
            output: String::new(),
            duration: Duration::ZERO,
        })
    }
}

fn orchestrator(tool: Arc<EditingTool>) -> GenerationOrchestrator {
    GenerationOrchestrator::new(
        tool,
        Arc::new(Verifier::new(marker_config())),
        vec![ModelSpec::new("primary", 60)],
        3,
    )
}

#[tokio::test]
async fn test_pipeline_reports_first_failing_gate() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("src.txt"), "fixed").unwrap();

    let verifier = Verifier::new(marker_config());
    let cancel = CancellationToken::new();
    let report = run_pipeline(&verifier, &Stage::ALL, dir.path(), &cancel)
        .await
        .unwrap();

    assert!(!report.all_green);
    assert_eq!(report.first_failure, Some(Stage::Test));
    assert_eq!(report.gates_passed, 2);
    let failed = report.failed_gate().unwrap();
    assert_eq!(failed.exit_code, Some(1));
    assert!(failed.diagnostic().contains("no tests"));
}

#[tokio::test]
async fn test_build_fixed_then_tests_added() {
    let dir = tempfile::tempdir().unwrap();
    let tool = Arc::new(EditingTool::new(true));
    let generator = orchestrator(tool.clone());
    let cancel = CancellationToken::new();

    let summary = generator
        .run_with_verification(dir.path(), "Parse config", "", &cancel)
        .await
        .unwrap();

    assert_eq!(summary.implementation.attempts, 2);
    assert_eq!(summary.tests.attempts, 1);

    let prompts = tool.prompts.lock().unwrap().clone();
    assert_eq!(prompts.len(), 3);
    assert_eq!(prompts[0], "Parse config");
    assert!(prompts[1].contains("src.txt: syntax error"), "{}", prompts[1]);
    assert_eq!(prompts[2], "Add unit tests for the changes made for: Parse config");
}

#[tokio::test]
async fn test_unfixable_build_is_permanent() {
    let dir = tempfile::tempdir().unwrap();
    let tool = Arc::new(EditingTool::new(false));
    let generator = orchestrator(tool.clone());
    let cancel = CancellationToken::new();

    let err = generator
        .run_with_verification(dir.path(), "Parse config", "", &cancel)
        .await
        .unwrap_err();

    assert!(!err.is_timeout());
    let message = err.to_string();
    assert!(message.contains("build failed after 3 fix attempts"), "{message}");
    assert_eq!(tool.prompts.lock().unwrap().len(), 3);

    let classified = err.into_classified();
    assert_eq!(classified.kind(), Some(ErrorKind::Permanent));
}

#[tokio::test]
async fn test_retry_policy_does_not_retry_permanent_generation_failure() {
    let dir = tempfile::tempdir().unwrap();
    let tool = Arc::new(EditingTool::new(false));
    let generator = orchestrator(tool.clone());
    let cancel = CancellationToken::new();
    let policy = RetryPolicy::fixed(3, Duration::from_millis(10));

    let (generator, work_dir, token) = (&generator, dir.path(), &cancel);
    let outcome = policy
        .execute(&cancel, || async move {
            generator
                .run_with_verification(work_dir, "Parse config", "", token)
                .await
                .map_err(|e| e.into_classified())
        })
        .await;

    assert_eq!(outcome.attempts, 1);
    assert!(outcome.last_error().is_some());
}
