//! Turns a natural-language data-analysis request into a chart.
//!
//! A [`DataAnalysisAgent`] asks a [`Reasoner`] for a script, pulls the code
//! out of the reply with a [`CodeExtractor`], runs it in a [`Sandbox`] and
//! feeds what happened back into the conversation, until the script produces
//! a visualization file or the iteration budget runs out.
//!
//! # Example
//! ```rust,no_run
//! use vizloop::{AgentConfig, DataAnalysisAgent};
//!
//! # async fn demo() -> Result<(), vizloop::AgentError> {
//! let mut config = AgentConfig::default();
//! config.apply_env()?;
//! let agent = DataAnalysisAgent::from_config(&config)?;
//!
//! let report = agent
//!     .run("Load the iris dataset and create a scatter plot of sepal length vs width")
//!     .await;
//! let artifact = report.into_result()?;
//! println!("Plot saved to {}", artifact.display());
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod capture;
pub mod config;
pub mod errors;
pub mod extract;
pub mod observation;
pub mod reasoner;
pub mod sandbox;
pub mod state;
pub mod workspace;

pub use agent::{DataAnalysisAgent, RunOutcome, RunReport};
pub use config::{AgentConfig, ArtifactPattern, BlockPolicy, ReasonerConfig};
pub use errors::{AgentError, ConfigError, ExtractionError, ReasoningError, Result, SandboxError};
pub use extract::{CodeExtractor, ExtractionStrategy};
pub use reasoner::{OpenAiReasoner, Reasoner};
pub use sandbox::{
    ExecutionOutcome, ExecutionRequest, ExecutionResult, ProcessSandbox, Sandbox, SandboxConfig,
};
pub use state::{ConversationState, Phase, Role, Termination, Turn};
