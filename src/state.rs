use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Who produced a turn
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The task as stated by the user
    Request,
    /// Text returned by the reasoner
    Reasoning,
    /// What happened when the loop acted on the reasoning
    Observation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn request(content: impl Into<String>) -> Self {
        Self {
            role: Role::Request,
            content: content.into(),
        }
    }

    pub fn reasoning(content: impl Into<String>) -> Self {
        Self {
            role: Role::Reasoning,
            content: content.into(),
        }
    }

    pub fn observation(content: impl Into<String>) -> Self {
        Self {
            role: Role::Observation,
            content: content.into(),
        }
    }
}

/// Working memory for one run of the loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub run_id: String,
    history: Vec<Turn>,
    pub iteration: u32,
    pub max_iterations: u32,
    final_artifact_path: Option<PathBuf>,
    pub terminated: bool,
}

impl ConversationState {
    /// Start a run whose history opens with the task request
    pub fn new(task: &str, max_iterations: u32) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().simple().to_string(),
            history: vec![Turn::request(task)],
            iteration: 0,
            max_iterations,
            final_artifact_path: None,
            terminated: false,
        }
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    /// Append a turn; history is never rewritten
    pub fn push(&mut self, turn: Turn) {
        self.history.push(turn);
    }

    pub fn final_artifact_path(&self) -> Option<&PathBuf> {
        self.final_artifact_path.as_ref()
    }

    /// Record a successful artifact. Once set it is never cleared.
    pub fn set_final_artifact(&mut self, path: PathBuf) {
        self.final_artifact_path = Some(path);
    }

    /// Count a finished cycle; returns true when the budget is spent
    pub fn complete_iteration(&mut self) -> bool {
        self.iteration += 1;
        self.iteration >= self.max_iterations
    }

    /// Label for the artifact produced in the current iteration
    pub fn execution_label(&self) -> String {
        format!("{}-{}", self.run_id, self.iteration + 1)
    }
}

/// Why a run stopped
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Success,
    Exhausted,
    Fatal,
}

/// Control-loop states. Each non-terminal state carries what the next one
/// needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Reasoning,
    Extracting { response: String },
    Executing { code: String },
    Observing { result: crate::sandbox::ExecutionResult },
    Done(Termination),
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Reasoning => "reasoning",
            Phase::Extracting { .. } => "extracting",
            Phase::Executing { .. } => "executing",
            Phase::Observing { .. } => "observing",
            Phase::Done(Termination::Success) => "done(success)",
            Phase::Done(Termination::Exhausted) => "done(exhausted)",
            Phase::Done(Termination::Fatal) => "done(fatal)",
        }
    }
}
