//! Bounded reason → extract → execute → observe loop.

use crate::{
    config::{AgentConfig, ArtifactPattern},
    errors::{AgentError, ReasoningError},
    extract::CodeExtractor,
    observation::{describe_execution, describe_extraction_failure},
    reasoner::{OpenAiReasoner, Reasoner},
    sandbox::{ExecutionRequest, ProcessSandbox, Sandbox, SandboxConfig},
    state::{ConversationState, Phase, Termination, Turn},
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Success {
        artifact_path: PathBuf,
        iterations: u32,
    },
    Exhausted {
        iterations: u32,
    },
    Fatal {
        error: String,
    },
}

/// Outcome plus the full conversation that led to it
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub state: ConversationState,
    #[serde(skip)]
    fatal_error: Option<ReasoningError>,
}

impl RunReport {
    /// Artifact path on success; exhaustion and reasoning failures as errors
    pub fn into_result(self) -> Result<PathBuf, AgentError> {
        match self.outcome {
            RunOutcome::Success { artifact_path, .. } => Ok(artifact_path),
            RunOutcome::Exhausted { iterations } => Err(AgentError::Exhausted { iterations }),
            RunOutcome::Fatal { error } => Err(match self.fatal_error {
                Some(e) => AgentError::Reasoning(e),
                None => AgentError::Reasoning(ReasoningError::InvalidResponse(error)),
            }),
        }
    }
}

/// Drives one task at a time through the loop. Holds no per-run state, so
/// a single agent can serve sequential runs and several agents can run side
/// by side.
pub struct DataAnalysisAgent {
    reasoner: Arc<dyn Reasoner>,
    sandbox: Arc<dyn Sandbox>,
    extractor: CodeExtractor,
    max_iterations: u32,
    execution_timeout: Duration,
    workspace_base: PathBuf,
    artifact: ArtifactPattern,
    excerpt_chars: usize,
}

impl DataAnalysisAgent {
    pub fn new(config: &AgentConfig, reasoner: Arc<dyn Reasoner>, sandbox: Arc<dyn Sandbox>) -> Self {
        Self {
            reasoner,
            sandbox,
            extractor: CodeExtractor::new(&config.language, config.block_policy),
            max_iterations: config.max_iterations,
            execution_timeout: config.execution_timeout(),
            workspace_base: config.workspace_base.clone(),
            artifact: config.artifact.clone(),
            excerpt_chars: config.observation_excerpt_chars,
        }
    }

    /// Wire the OpenAI-compatible reasoner and the process sandbox
    pub fn from_config(config: &AgentConfig) -> Result<Self, AgentError> {
        config.validate()?;
        let reasoner = OpenAiReasoner::from_config(&config.reasoner)?;
        let sandbox = ProcessSandbox::new(SandboxConfig::from_agent_config(config)?);
        Ok(Self::new(config, Arc::new(reasoner), Arc::new(sandbox)))
    }

    pub fn with_extractor(mut self, extractor: CodeExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Run `task` to one of success, exhaustion or a fatal reasoning error
    pub async fn run(&self, task: &str) -> RunReport {
        let mut state = ConversationState::new(task, self.max_iterations);
        let mut fatal_error = None;
        info!(
            run_id = %state.run_id,
            max_iterations = self.max_iterations,
            "Starting run"
        );

        let mut phase = Phase::Reasoning;
        let termination = loop {
            match phase {
                Phase::Done(termination) => break termination,
                current => {
                    let from = current.name();
                    phase = self.step(current, &mut state, &mut fatal_error).await;
                    debug!(run_id = %state.run_id, from, to = phase.name(), "transition");
                }
            }
        };
        state.terminated = true;

        let outcome = match (termination, state.final_artifact_path()) {
            (Termination::Success, Some(path)) => RunOutcome::Success {
                artifact_path: path.clone(),
                iterations: state.iteration,
            },
            (Termination::Fatal, _) => RunOutcome::Fatal {
                error: fatal_error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "reasoning failed".to_string()),
            },
            _ => RunOutcome::Exhausted {
                iterations: state.iteration,
            },
        };
        info!(run_id = %state.run_id, ?outcome, "Run finished");

        RunReport {
            outcome,
            state,
            fatal_error,
        }
    }

    async fn step(
        &self,
        phase: Phase,
        state: &mut ConversationState,
        fatal_error: &mut Option<ReasoningError>,
    ) -> Phase {
        match phase {
            Phase::Reasoning => {
                if state.iteration >= state.max_iterations {
                    return Phase::Done(Termination::Exhausted);
                }
                info!(
                    run_id = %state.run_id,
                    "Iteration {}/{}",
                    state.iteration + 1,
                    state.max_iterations
                );
                match self.reasoner.reason(state.history()).await {
                    Ok(response) => {
                        state.push(Turn::reasoning(response.clone()));
                        Phase::Extracting { response }
                    }
                    Err(e) => {
                        error!(run_id = %state.run_id, error = %e, "Reasoning failed; stopping run");
                        *fatal_error = Some(e);
                        Phase::Done(Termination::Fatal)
                    }
                }
            }
            Phase::Extracting { response } => match self.extractor.extract(&response) {
                Ok(code) => Phase::Executing { code },
                Err(e) => {
                    warn!(run_id = %state.run_id, iteration = state.iteration + 1, error = %e, "Extraction failed");
                    state.push(Turn::observation(describe_extraction_failure(&e)));
                    self.next_iteration(state)
                }
            },
            Phase::Executing { code } => {
                let request = ExecutionRequest::new(code)
                    .with_timeout(self.execution_timeout)
                    .with_workspace_base(self.workspace_base.clone())
                    .with_label(state.execution_label());
                let result = self.sandbox.execute(&request).await;
                Phase::Observing { result }
            }
            Phase::Observing { result } => {
                state.push(Turn::observation(describe_execution(
                    &result,
                    &self.artifact,
                    self.excerpt_chars,
                )));
                match (result.is_success(), result.artifact_path) {
                    (true, Some(path)) => {
                        state.set_final_artifact(path);
                        state.complete_iteration();
                        Phase::Done(Termination::Success)
                    }
                    _ => self.next_iteration(state),
                }
            }
            done @ Phase::Done(_) => done,
        }
    }

    fn next_iteration(&self, state: &mut ConversationState) -> Phase {
        if state.complete_iteration() {
            warn!(
                run_id = %state.run_id,
                iterations = state.iteration,
                "Iteration budget exhausted"
            );
            Phase::Done(Termination::Exhausted)
        } else {
            Phase::Reasoning
        }
    }
}
