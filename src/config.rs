use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prompt sent ahead of the conversation history on every reasoning call
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a data analysis assistant. Your task is to \
analyze data and generate visualizations based on user requests. Generate Python code to \
complete your task. Always think step-by-step before taking an action. Reply with exactly one \
```python fenced block containing a complete, self-contained script. Build the chart with \
plotly and save it with fig.write_html('output.html') in the current directory. If a previous \
attempt failed, read the observation and fix the script.";

/// What to do when a response contains several matching fenced blocks
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlockPolicy {
    /// Keep only the first block in document order
    #[default]
    FirstBlock,

    /// Join all blocks in document order, separated by a newline
    Concatenate,
}

/// Naming convention for the visualization file the executed code produces
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactPattern {
    /// An exact file name, e.g. `output.html`
    FileName(String),
    /// Any file with this extension (no leading dot), matched case-insensitively
    Extension(String),
}

impl Default for ArtifactPattern {
    fn default() -> Self {
        ArtifactPattern::FileName("output.html".to_string())
    }
}

impl ArtifactPattern {
    pub fn matches(&self, file_name: &str) -> bool {
        match self {
            ArtifactPattern::FileName(name) => file_name == name,
            ArtifactPattern::Extension(ext) => Path::new(file_name)
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case(ext.trim_start_matches('.')))
                .unwrap_or(false),
        }
    }

    /// Human-readable form used when telling the model what to produce
    pub fn describe(&self) -> String {
        match self {
            ArtifactPattern::FileName(name) => format!("a file named {name}"),
            ArtifactPattern::Extension(ext) => {
                format!("a .{} file", ext.trim_start_matches('.'))
            }
        }
    }
}

/// Settings for the OpenAI-compatible reasoning backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasonerConfig {
    /// API root, `/chat/completions` is appended
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    pub system_prompt: String,
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            temperature: 0.0,
            request_timeout_secs: 60,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// Configuration for one agent: loop bounds, sandbox settings and reasoner
///
/// Layered as defaults, then an optional JSON file, then `VIZLOOP_*`
/// environment variables, then command-line overrides applied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Upper bound on reason/extract/execute/observe cycles
    pub max_iterations: u32,
    /// Wall-clock bound for a single execution
    pub execution_timeout_secs: u64,
    /// Durable location for produced artifacts
    pub output_dir: PathBuf,
    /// Parent directory for per-execution working directories
    pub workspace_base: PathBuf,
    /// Interpreter to run; looked up on PATH when unset
    pub python_path: Option<PathBuf>,
    /// Cap on captured bytes per stream
    pub max_output_bytes: usize,
    /// Cap on characters of stdout/stderr quoted back to the model
    pub observation_excerpt_chars: usize,
    pub artifact: ArtifactPattern,
    pub block_policy: BlockPolicy,
    /// Fence language tag the extractor prefers
    pub language: String,
    /// Thread cap for OpenMP/BLAS inside the child
    pub max_threads: u32,
    /// Extra environment variables for the child
    pub env_vars: HashMap<String, String>,
    pub reasoner: ReasonerConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            execution_timeout_secs: 30,
            output_dir: PathBuf::from("output"),
            workspace_base: std::env::temp_dir().join("vizloop-workspaces"),
            python_path: None,
            max_output_bytes: 64 * 1024,
            observation_excerpt_chars: 2000,
            artifact: ArtifactPattern::default(),
            block_policy: BlockPolicy::default(),
            language: "python".to_string(),
            max_threads: 4,
            env_vars: HashMap::new(),
            reasoner: ReasonerConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Load a JSON config file; missing keys fall back to defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get("VIZLOOP_MAX_ITERATIONS") {
            self.max_iterations = parse_number("VIZLOOP_MAX_ITERATIONS", &v)?;
        }
        if let Some(v) = get("VIZLOOP_TIMEOUT_SECS") {
            self.execution_timeout_secs = parse_number("VIZLOOP_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("VIZLOOP_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(v);
        }
        if let Some(v) = get("VIZLOOP_WORKSPACE_DIR") {
            self.workspace_base = PathBuf::from(v);
        }
        if let Some(v) = get("VIZLOOP_PYTHON") {
            self.python_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("VIZLOOP_BASE_URL") {
            self.reasoner.base_url = v;
        }
        if let Some(v) = get("VIZLOOP_MODEL") {
            self.reasoner.model = v;
        }
        if let Some(v) = get("VIZLOOP_API_KEY").or_else(|| get("OPENAI_API_KEY")) {
            self.reasoner.api_key = Some(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.execution_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "execution_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.max_output_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_output_bytes must be non-zero".to_string(),
            ));
        }
        if self.language.trim().is_empty() {
            return Err(ConfigError::Invalid("language must be set".to_string()));
        }
        Ok(())
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{key} is not a valid number: {value}")))
}
