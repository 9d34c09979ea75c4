//! Model fallback and the two-pass verify-and-fix loop.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::verifier::{run_pipeline, Stage, StageChecker};

use super::prompts::{build_prompt, fix_prompt, test_pass_prompt};
use super::{default_models, GenerationError, GenerationTool, GeneratorConfig, ModelSpec};

/// Which of the two passes is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pass {
    Implementation,
    TestCreation,
}

impl Pass {
    /// Stages that must pass for this pass to succeed.
    pub fn stages(self) -> &'static [Stage] {
        match self {
            Self::Implementation => &[Stage::Build],
            Self::TestCreation => &Stage::ALL,
        }
    }
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Implementation => write!(f, "1 (implementation)"),
            Self::TestCreation => write!(f, "2 (test creation)"),
        }
    }
}

/// Progress of one task's generation. Lives for a single
/// `run_with_verification` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    pub pass: Pass,
    pub fix_attempt: u32,
    pub last_failure: Option<Stage>,
}

impl RunState {
    fn new(pass: Pass) -> Self {
        Self {
            pass,
            fix_attempt: 0,
            last_failure: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassSummary {
    pub pass: Pass,
    /// Verification attempts consumed, 1 when the first check was green.
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationSummary {
    pub implementation: PassSummary,
    pub tests: PassSummary,
}

pub struct GenerationOrchestrator {
    tool: Arc<dyn GenerationTool>,
    checker: Arc<dyn StageChecker>,
    models: Vec<ModelSpec>,
    max_fix_attempts: u32,
}

impl GenerationOrchestrator {
    /// An empty `models` list falls back to [`default_models`].
    pub fn new(
        tool: Arc<dyn GenerationTool>,
        checker: Arc<dyn StageChecker>,
        models: Vec<ModelSpec>,
        max_fix_attempts: u32,
    ) -> Self {
        let models = if models.is_empty() {
            default_models()
        } else {
            models
        };
        Self {
            tool,
            checker,
            models,
            max_fix_attempts: max_fix_attempts.max(1),
        }
    }

    pub fn from_config(
        config: &GeneratorConfig,
        tool: Arc<dyn GenerationTool>,
        checker: Arc<dyn StageChecker>,
    ) -> Self {
        Self::new(
            tool,
            checker,
            config.effective_models(),
            config.max_fix_attempts,
        )
    }

    pub fn models(&self) -> &[ModelSpec] {
        &self.models
    }

    /// Invoke the tool once, falling back to the next model on timeout.
    pub async fn run(
        &self,
        work_dir: &Path,
        title: &str,
        body: &str,
        cancel: &CancellationToken,
    ) -> Result<(), GenerationError> {
        let prompt = build_prompt(title, body);
        let mut last_timeout = None;

        for (i, model) in self.models.iter().enumerate() {
            info!(
                work_dir = %work_dir.display(),
                model = %model.name,
                timeout_secs = model.timeout_seconds,
                prompt_len = prompt.len(),
                "Running generation tool"
            );

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(GenerationError::Cancelled),
                outcome = tokio::time::timeout(
                    model.timeout(),
                    self.tool.invoke(work_dir, model, &prompt, cancel),
                ) => outcome.unwrap_or_else(|_| Err(GenerationError::ModelTimeout {
                    model: model.name.clone(),
                    timeout: model.timeout(),
                })),
            };

            match result {
                Ok(run) => {
                    info!(
                        model = %run.model,
                        output_len = run.output.len(),
                        elapsed_ms = run.duration.as_millis() as u64,
                        "Generation tool completed"
                    );
                    return Ok(());
                }
                Err(err @ GenerationError::ModelTimeout { .. }) => {
                    match self.models.get(i + 1) {
                        Some(next) => warn!(
                            failed_model = %model.name,
                            next_model = %next.name,
                            "Model timed out, trying next"
                        ),
                        None => warn!(model = %model.name, "Last model timed out"),
                    }
                    last_timeout = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(match last_timeout {
            Some(last) => GenerationError::AllModelsTimedOut {
                last: Box::new(last),
            },
            None => GenerationError::NoModels,
        })
    }

    /// Implementation pass (clean build required), then test-creation pass
    /// (build, lint and test required).
    pub async fn run_with_verification(
        &self,
        work_dir: &Path,
        title: &str,
        body: &str,
        cancel: &CancellationToken,
    ) -> Result<GenerationSummary, GenerationError> {
        info!("Pass 1: running implementation");
        let implementation = self
            .run_pass(Pass::Implementation, work_dir, title, body, cancel)
            .await?;

        info!("Pass 2: running test creation");
        let tests = self
            .run_pass(Pass::TestCreation, work_dir, &test_pass_prompt(title), "", cancel)
            .await?;

        Ok(GenerationSummary {
            implementation,
            tests,
        })
    }

    async fn run_pass(
        &self,
        pass: Pass,
        work_dir: &Path,
        title: &str,
        body: &str,
        cancel: &CancellationToken,
    ) -> Result<PassSummary, GenerationError> {
        let mut state = RunState::new(pass);
        let outcome = async {
            self.run(work_dir, title, body, cancel).await?;
            self.verify_and_fix(&mut state, work_dir, cancel).await
        }
        .await;

        match outcome {
            Ok(attempts) => Ok(PassSummary { pass, attempts }),
            Err(GenerationError::Cancelled) => Err(GenerationError::Cancelled),
            Err(cause) => Err(GenerationError::PassFailed {
                pass,
                cause: Box::new(cause),
            }),
        }
    }

    /// Check the pass's stages in order; on the first failure ask the tool
    /// to fix it and start over from build. Returns attempts consumed.
    async fn verify_and_fix(
        &self,
        state: &mut RunState,
        work_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<u32, GenerationError> {
        let mut attempt = 1;
        loop {
            state.fix_attempt = attempt;
            let report = run_pipeline(self.checker.as_ref(), state.pass.stages(), work_dir, cancel)
                .await
                .map_err(|_| GenerationError::Cancelled)?;

            let Some(failed) = report.failed_gate() else {
                state.last_failure = None;
                info!(pass = %state.pass, attempts = attempt, "All verifications passed");
                return Ok(attempt);
            };
            state.last_failure = Some(failed.stage);
            let diagnostic = failed.diagnostic();

            if attempt >= self.max_fix_attempts {
                return Err(GenerationError::VerificationExhausted {
                    stage: failed.stage,
                    attempts: attempt,
                    diagnostic,
                });
            }

            warn!(
                pass = %state.pass,
                stage = %failed.stage,
                attempt,
                max_attempts = self.max_fix_attempts,
                "Verification failed, asking tool to fix"
            );
            let prompt = fix_prompt(failed.stage, &diagnostic);
            self.run(work_dir, &prompt, "", cancel)
                .await
                .map_err(|cause| match cause {
                    GenerationError::Cancelled => GenerationError::Cancelled,
                    cause => GenerationError::FixAttempt {
                        cause: Box::new(cause),
                    },
                })?;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::ToolRun;
    use crate::resilience::ErrorKind;
    use crate::verifier::{GateResult, VerificationCancelled};
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeed,
        Fail,
        Hang,
    }

    /// Generation tool whose result depends on the model name.
    struct ScriptedTool {
        behaviors: HashMap<String, Behavior>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedTool {
        fn new(behaviors: &[(&str, Behavior)]) -> Arc<Self> {
            Arc::new(Self {
                behaviors: behaviors
                    .iter()
                    .map(|(name, b)| (name.to_string(), *b))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn models_called(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
        }

        fn prompts(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(_, p)| p.clone()).collect()
        }
    }

    #[async_trait]
    impl GenerationTool for ScriptedTool {
        async fn invoke(
            &self,
            _work_dir: &Path,
            model: &ModelSpec,
            prompt: &str,
            cancel: &CancellationToken,
        ) -> Result<ToolRun, GenerationError> {
            self.calls
                .lock()
                .unwrap()
                .push((model.name.clone(), prompt.to_string()));
            match self.behaviors.get(&model.name).copied().unwrap_or(Behavior::Succeed) {
                Behavior::Succeed => Ok(ToolRun {
                    model: model.name.clone(),
                    output: "applied edits".into(),
                    duration: Duration::ZERO,
                }),
                Behavior::Fail => Err(GenerationError::ToolFailed {
                    model: model.name.clone(),
                    status: "exit code 1".into(),
                    output: "model refused".into(),
                }),
                Behavior::Hang => {
                    cancel.cancelled().await;
                    Err(GenerationError::Cancelled)
                }
            }
        }
    }

    /// Stage checker with a queue of scripted failures per stage; an empty
    /// queue means the stage passes.
    struct ScriptedChecker {
        failures: Mutex<HashMap<Stage, VecDeque<String>>>,
        calls: Mutex<Vec<Stage>>,
    }

    impl ScriptedChecker {
        fn new(failures: &[(Stage, &[&str])]) -> Arc<Self> {
            Arc::new(Self {
                failures: Mutex::new(
                    failures
                        .iter()
                        .map(|(stage, outputs)| {
                            (*stage, outputs.iter().map(|s| s.to_string()).collect())
                        })
                        .collect(),
                ),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<Stage> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StageChecker for ScriptedChecker {
        async fn check(
            &self,
            stage: Stage,
            _work_dir: &Path,
            _cancel: &CancellationToken,
        ) -> Result<GateResult, VerificationCancelled> {
            self.calls.lock().unwrap().push(stage);
            let failure = self
                .failures
                .lock()
                .unwrap()
                .get_mut(&stage)
                .and_then(VecDeque::pop_front);
            Ok(match failure {
                Some(output) => GateResult::failed(
                    stage,
                    Duration::ZERO,
                    format!("go {stage}"),
                    Some(1),
                    output,
                ),
                None => GateResult::passed(stage, Duration::ZERO),
            })
        }
    }

    fn orchestrator(
        tool: Arc<ScriptedTool>,
        checker: Arc<ScriptedChecker>,
        models: Vec<ModelSpec>,
    ) -> GenerationOrchestrator {
        GenerationOrchestrator::new(tool, checker, models, 3)
    }

    fn two_models() -> Vec<ModelSpec> {
        vec![ModelSpec::new("small", 5), ModelSpec::new("large", 60)]
    }

    #[test]
    fn test_empty_model_list_uses_default() {
        let orch = orchestrator(ScriptedTool::new(&[]), ScriptedChecker::new(&[]), vec![]);
        assert_eq!(orch.models(), default_models().as_slice());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_falls_back_to_next_model() {
        let tool = ScriptedTool::new(&[("small", Behavior::Hang), ("large", Behavior::Succeed)]);
        let orch = orchestrator(tool.clone(), ScriptedChecker::new(&[]), two_models());
        let cancel = CancellationToken::new();

        orch.run(Path::new("/work"), "Fix bug", "", &cancel)
            .await
            .unwrap();
        assert_eq!(tool.models_called(), vec!["small", "large"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_timeout_failure_does_not_fall_back() {
        let tool = ScriptedTool::new(&[("small", Behavior::Fail), ("large", Behavior::Succeed)]);
        let orch = orchestrator(tool.clone(), ScriptedChecker::new(&[]), two_models());
        let cancel = CancellationToken::new();

        let err = orch
            .run(Path::new("/work"), "Fix bug", "", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::ToolFailed { .. }));
        assert_eq!(tool.models_called(), vec!["small"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_models_timed_out() {
        let tool = ScriptedTool::new(&[("small", Behavior::Hang), ("large", Behavior::Hang)]);
        let orch = orchestrator(tool.clone(), ScriptedChecker::new(&[]), two_models());
        let cancel = CancellationToken::new();

        let err = orch
            .run(Path::new("/work"), "Fix bug", "", &cancel)
            .await
            .unwrap_err();
        match &err {
            GenerationError::AllModelsTimedOut { last } => {
                assert!(matches!(**last, GenerationError::ModelTimeout { ref model, .. } if model == "large"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.is_timeout());
        assert_eq!(tool.models_called().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_joins_title_and_body() {
        let tool = ScriptedTool::new(&[]);
        let orch = orchestrator(tool.clone(), ScriptedChecker::new(&[]), two_models());
        let cancel = CancellationToken::new();
        orch.run(Path::new("/work"), "Title", "Body", &cancel)
            .await
            .unwrap();
        assert_eq!(tool.prompts(), vec!["Title\n\nBody"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_run_uses_one_attempt_per_pass() {
        let tool = ScriptedTool::new(&[]);
        let checker = ScriptedChecker::new(&[]);
        let orch = orchestrator(tool.clone(), checker.clone(), two_models());
        let cancel = CancellationToken::new();

        let summary = orch
            .run_with_verification(Path::new("/work"), "Add CSV export", "details", &cancel)
            .await
            .unwrap();
        assert_eq!(summary.implementation.attempts, 1);
        assert_eq!(summary.tests.attempts, 1);
        assert_eq!(
            checker.calls(),
            vec![Stage::Build, Stage::Build, Stage::Lint, Stage::Test]
        );
        assert_eq!(
            tool.prompts(),
            vec![
                "Add CSV export\n\ndetails".to_string(),
                "Add unit tests for the changes made for: Add CSV export".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_build_failing_once_consumes_two_attempts() {
        let tool = ScriptedTool::new(&[]);
        let checker = ScriptedChecker::new(&[(Stage::Build, &["undefined: Foo"])]);
        let orch = orchestrator(tool.clone(), checker.clone(), two_models());
        let cancel = CancellationToken::new();

        let summary = orch
            .run_with_verification(Path::new("/work"), "Task", "", &cancel)
            .await
            .unwrap();
        assert_eq!(summary.implementation.attempts, 2);
        assert_eq!(
            tool.prompts()[1],
            "Fix the following build error:\n\ngo build failed:\nundefined: Foo"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_build_never_fixed_is_permanent() {
        let tool = ScriptedTool::new(&[]);
        let checker = ScriptedChecker::new(&[(Stage::Build, &["err 1", "err 2", "err 3", "err 4"])]);
        let orch = orchestrator(tool.clone(), checker.clone(), two_models());
        let cancel = CancellationToken::new();

        let err = orch
            .run_with_verification(Path::new("/work"), "Task", "", &cancel)
            .await
            .unwrap_err();
        match &err {
            GenerationError::PassFailed { pass, cause } => {
                assert_eq!(*pass, Pass::Implementation);
                match cause.as_ref() {
                    GenerationError::VerificationExhausted {
                        stage,
                        attempts,
                        diagnostic,
                    } => {
                        assert_eq!(*stage, Stage::Build);
                        assert_eq!(*attempts, 3);
                        assert!(diagnostic.contains("err 3"));
                    }
                    other => panic!("unexpected cause: {other}"),
                }
            }
            other => panic!("unexpected error: {other}"),
        }
        // Initial run plus two fixes; the third failure is terminal.
        assert_eq!(tool.prompts().len(), 3);
        assert_eq!(err.into_classified().kind(), Some(ErrorKind::Permanent));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_pass_restarts_from_build_after_fix() {
        let tool = ScriptedTool::new(&[]);
        let checker = ScriptedChecker::new(&[(Stage::Lint, &["vet: unreachable code"])]);
        let orch = orchestrator(tool.clone(), checker.clone(), two_models());
        let cancel = CancellationToken::new();

        let summary = orch
            .run_with_verification(Path::new("/work"), "Task", "", &cancel)
            .await
            .unwrap();
        assert_eq!(summary.implementation.attempts, 1);
        assert_eq!(summary.tests.attempts, 2);
        assert_eq!(
            checker.calls(),
            vec![
                Stage::Build,
                // pass 2, attempt 1
                Stage::Build,
                Stage::Lint,
                // pass 2, attempt 2
                Stage::Build,
                Stage::Lint,
                Stage::Test,
            ]
        );
        assert!(tool.prompts()[2].starts_with("Fix the following lint error:"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_test_stage_exhaustion_carries_test_diagnostic() {
        let tool = ScriptedTool::new(&[]);
        let checker = ScriptedChecker::new(&[(Stage::Test, &["FAIL a", "FAIL b", "FAIL c"])]);
        let orch = orchestrator(tool, checker, two_models());
        let cancel = CancellationToken::new();

        let err = orch
            .run_with_verification(Path::new("/work"), "Task", "", &cancel)
            .await
            .unwrap_err();
        let rendered = err.to_string();
        assert!(rendered.starts_with("pass 2 (test creation) failed"));
        assert!(rendered.contains("FAIL c"));
        assert!(!err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_during_fix_is_transient() {
        let tool = ScriptedTool::new(&[]);
        let checker = ScriptedChecker::new(&[(Stage::Build, &["broken"])]);
        let models = vec![ModelSpec::new("only", 5)];
        let orch = GenerationOrchestrator::new(
            Arc::new(FixHangsTool { inner: tool }),
            checker,
            models,
            3,
        );
        let cancel = CancellationToken::new();

        let err = orch
            .run_with_verification(Path::new("/work"), "Task", "", &cancel)
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.into_classified().kind(), Some(ErrorKind::Transient));
    }

    /// Succeeds on task prompts, hangs on fix prompts.
    struct FixHangsTool {
        inner: Arc<ScriptedTool>,
    }

    #[async_trait]
    impl GenerationTool for FixHangsTool {
        async fn invoke(
            &self,
            work_dir: &Path,
            model: &ModelSpec,
            prompt: &str,
            cancel: &CancellationToken,
        ) -> Result<ToolRun, GenerationError> {
            if prompt.starts_with("Fix the following") {
                cancel.cancelled().await;
                return Err(GenerationError::Cancelled);
            }
            self.inner.invoke(work_dir, model, prompt, cancel).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_while_tool_runs() {
        let tool = ScriptedTool::new(&[("small", Behavior::Hang)]);
        let orch = orchestrator(tool, ScriptedChecker::new(&[]), vec![ModelSpec::new("small", 600)]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = orch
            .run_with_verification(Path::new("/work"), "Task", "", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Cancelled));
        assert!(err.into_classified().is_cancelled());
    }
}
