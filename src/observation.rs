//! Turns sandbox results and extraction failures into the text the model
//! sees on its next turn.

use crate::capture::tail_excerpt;
use crate::config::ArtifactPattern;
use crate::errors::ExtractionError;
use crate::sandbox::{ExecutionOutcome, ExecutionResult};

pub fn describe_extraction_failure(error: &ExtractionError) -> String {
    format!(
        "No executable code was found in your last response ({error}). \
         Reply with the complete script in a single ```python fenced block."
    )
}

pub fn describe_execution(
    result: &ExecutionResult,
    artifact: &ArtifactPattern,
    max_chars: usize,
) -> String {
    let mut text = match result.outcome() {
        ExecutionOutcome::LaunchFailed => format!(
            "The code could not be started: {}",
            result.launch_error.as_deref().unwrap_or("unknown error")
        ),
        ExecutionOutcome::TimedOut => format!(
            "Code execution timed out after {} ms and was terminated. \
             Make the script faster or avoid blocking calls.",
            result.duration_ms
        ),
        ExecutionOutcome::Exited(0) => match &result.artifact_path {
            Some(path) => format!(
                "Code executed successfully.\nGenerated plot available at: {}",
                path.display()
            ),
            None => format!(
                "Code executed successfully, but no visualization was produced. \
                 Save the figure as {} in the current directory.",
                artifact.describe()
            ),
        },
        ExecutionOutcome::Exited(code) => {
            format!("Code execution failed with exit code {code}.")
        }
        ExecutionOutcome::Killed => "Code execution was terminated by a signal.".to_string(),
    };

    if result.launch_error.is_none() {
        push_section(&mut text, "stdout", &result.stdout, max_chars);
        push_section(&mut text, "stderr", &result.stderr, max_chars);
    }
    text
}

fn push_section(text: &mut String, name: &str, body: &str, max_chars: usize) {
    let body = body.trim_end();
    if body.trim().is_empty() {
        return;
    }
    text.push_str(&format!("\n{name}:\n{}", tail_excerpt(body, max_chars)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_success_mentions_path() {
        let result = ExecutionResult {
            exit_code: Some(0),
            stdout: "Plot generated\n".to_string(),
            artifact_path: Some(PathBuf::from("output/plot_abc-1.html")),
            ..Default::default()
        };
        let text = describe_execution(&result, &ArtifactPattern::default(), 100);
        assert!(text.starts_with("Code executed successfully."));
        assert!(text.contains("output/plot_abc-1.html"));
        assert!(text.ends_with("stdout:\nPlot generated"));
    }

    #[test]
    fn test_missing_artifact_asks_for_file() {
        let result = ExecutionResult {
            exit_code: Some(0),
            ..Default::default()
        };
        let text = describe_execution(&result, &ArtifactPattern::default(), 100);
        assert!(text.contains("a file named output.html"));
        assert!(!text.contains("stdout:"));
    }

    #[test]
    fn test_failure_quotes_tail_of_stderr() {
        let result = ExecutionResult {
            exit_code: Some(1),
            stderr: format!("{}ValueError: bad", "x".repeat(50)),
            ..Default::default()
        };
        let text = describe_execution(&result, &ArtifactPattern::default(), 15);
        assert!(text.starts_with("Code execution failed with exit code 1."));
        assert!(text.ends_with("[...]ValueError: bad"));
    }

    #[test]
    fn test_launch_and_timeout() {
        let launch = ExecutionResult::launch_failure("interpreter not found: py", Duration::ZERO);
        assert_eq!(
            describe_execution(&launch, &ArtifactPattern::default(), 10),
            "The code could not be started: interpreter not found: py"
        );

        let timeout = ExecutionResult {
            timed_out: true,
            duration_ms: 1003,
            ..Default::default()
        };
        assert!(describe_execution(&timeout, &ArtifactPattern::default(), 10)
            .contains("timed out after 1003 ms"));
    }

    #[test]
    fn test_extraction_failure() {
        let text = describe_extraction_failure(&ExtractionError::NoCode);
        assert!(text.contains("No code found in model response"));
    }
}
