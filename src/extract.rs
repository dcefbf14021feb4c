//! Pulls one runnable script out of free-form model output.
//!
//! Models wrap code inconsistently: a fence tagged with the language, a bare
//! fence, or no fence at all. Each convention is an [`ExtractionStrategy`];
//! the [`CodeExtractor`] tries its strategies in order and the first one that
//! yields non-empty code wins. New conventions are added as new variants.

use crate::config::BlockPolicy;
use crate::errors::ExtractionError;

/// Line prefixes that mark a bare response as a script rather than prose
const STATEMENT_PREFIXES: &[&str] = &[
    "import ", "from ", "def ", "class ", "for ", "while ", "if ", "with ", "try:", "return ",
    "print(", "@",
];

/// One way of locating code in a model response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStrategy {
    /// Fenced blocks whose info string names the target language
    LanguageFence,
    /// Fenced blocks with no info string
    GenericFence,
    /// The whole response, if it reads like code
    WholeText,
}

impl ExtractionStrategy {
    /// The default chain, most specific first
    pub fn default_chain() -> Vec<ExtractionStrategy> {
        vec![
            ExtractionStrategy::LanguageFence,
            ExtractionStrategy::GenericFence,
            ExtractionStrategy::WholeText,
        ]
    }

    fn apply(&self, extractor: &CodeExtractor, text: &str) -> Option<String> {
        match self {
            ExtractionStrategy::LanguageFence => {
                let blocks = fenced_blocks(text);
                extractor.select(
                    blocks
                        .iter()
                        .filter(|b| extractor.is_target_language(b.language()))
                        .map(|b| b.body.as_str()),
                )
            }
            ExtractionStrategy::GenericFence => {
                let blocks = fenced_blocks(text);
                extractor.select(
                    blocks
                        .iter()
                        .filter(|b| b.info.is_empty())
                        .map(|b| b.body.as_str()),
                )
            }
            ExtractionStrategy::WholeText => {
                let trimmed = text.trim();
                (!trimmed.is_empty() && looks_like_code(trimmed)).then(|| trimmed.to_string())
            }
        }
    }
}

/// Ordered strategy chain plus the multi-block policy
#[derive(Debug, Clone)]
pub struct CodeExtractor {
    language: String,
    policy: BlockPolicy,
    strategies: Vec<ExtractionStrategy>,
}

impl CodeExtractor {
    pub fn new(language: &str, policy: BlockPolicy) -> Self {
        Self {
            language: language.trim().to_ascii_lowercase(),
            policy,
            strategies: ExtractionStrategy::default_chain(),
        }
    }

    /// Replace the strategy chain
    pub fn with_strategies(mut self, strategies: Vec<ExtractionStrategy>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Extract exactly one code string from `text`
    pub fn extract(&self, text: &str) -> Result<String, ExtractionError> {
        if text.trim().is_empty() {
            return Err(ExtractionError::Empty);
        }

        for strategy in &self.strategies {
            if let Some(code) = strategy.apply(self, text) {
                if !code.trim().is_empty() {
                    tracing::debug!(?strategy, len = code.len(), "extracted code");
                    return Ok(code);
                }
            }
        }

        Err(ExtractionError::NoCode)
    }

    fn is_target_language(&self, tag: &str) -> bool {
        let tag = tag.to_ascii_lowercase();
        if tag == self.language {
            return true;
        }
        self.language == "python" && matches!(tag.as_str(), "py" | "py3" | "python3")
    }

    fn select<'a>(&self, bodies: impl Iterator<Item = &'a str>) -> Option<String> {
        let mut bodies = bodies.map(tidy).filter(|b| !b.is_empty());
        match self.policy {
            BlockPolicy::FirstBlock => bodies.next(),
            BlockPolicy::Concatenate => {
                let joined = bodies.collect::<Vec<_>>().join("\n");
                (!joined.is_empty()).then_some(joined)
            }
        }
    }
}

impl Default for CodeExtractor {
    fn default() -> Self {
        Self::new("python", BlockPolicy::default())
    }
}

#[derive(Debug)]
struct FencedBlock {
    info: String,
    body: String,
}

impl FencedBlock {
    /// First word of the info string, e.g. `python` in "```python title=x"
    fn language(&self) -> &str {
        self.info.split_whitespace().next().unwrap_or("")
    }
}

struct OpenFence {
    marker: char,
    len: usize,
    indent: usize,
    info: String,
    lines: Vec<String>,
}

/// Split `text` into fenced blocks in document order. Fences are runs of
/// three or more backticks or tildes; an unclosed fence runs to the end.
fn fenced_blocks(text: &str) -> Vec<FencedBlock> {
    let mut blocks = Vec::new();
    let mut open: Option<OpenFence> = None;

    for line in text.lines() {
        match open.as_mut() {
            None => {
                if let Some((marker, len, indent, info)) = parse_fence(line) {
                    // Backtick info strings may not contain backticks
                    if marker == '`' && info.contains('`') {
                        continue;
                    }
                    open = Some(OpenFence {
                        marker,
                        len,
                        indent,
                        info: info.to_string(),
                        lines: Vec::new(),
                    });
                }
            }
            Some(fence) => {
                if is_closing_fence(line, fence.marker, fence.len) {
                    if let Some(fence) = open.take() {
                        blocks.push(FencedBlock {
                            info: fence.info,
                            body: fence.lines.join("\n"),
                        });
                    }
                } else {
                    fence.lines.push(strip_indent(line, fence.indent).to_string());
                }
            }
        }
    }

    if let Some(fence) = open {
        blocks.push(FencedBlock {
            info: fence.info,
            body: fence.lines.join("\n"),
        });
    }

    blocks
}

/// Returns (marker, run length, indentation, info string)
fn parse_fence(line: &str) -> Option<(char, usize, usize, &str)> {
    let rest = line.trim_start();
    let indent = line.len() - rest.len();
    let marker = rest.chars().next()?;
    if marker != '`' && marker != '~' {
        return None;
    }
    let len = rest.chars().take_while(|&c| c == marker).count();
    if len < 3 {
        return None;
    }
    Some((marker, len, indent, rest[len..].trim()))
}

fn is_closing_fence(line: &str, marker: char, open_len: usize) -> bool {
    let rest = line.trim_start();
    let len = rest.chars().take_while(|&c| c == marker).count();
    len >= open_len && rest[len..].trim().is_empty()
}

/// Remove up to `indent` leading spaces, matching the fence's own indentation
fn strip_indent(line: &str, indent: usize) -> &str {
    let spaces = line.bytes().take(indent).take_while(|&b| b == b' ').count();
    &line[spaces..]
}

/// Drop blank lines around a block body without touching the indentation of
/// its first code line
fn tidy(body: &str) -> String {
    let lines: Vec<&str> = body.lines().collect();
    let start = lines.iter().position(|l| !l.trim().is_empty());
    let end = lines.iter().rposition(|l| !l.trim().is_empty());
    match (start, end) {
        (Some(s), Some(e)) => lines[s..=e].join("\n").trim_end().to_string(),
        _ => String::new(),
    }
}

fn looks_like_code(text: &str) -> bool {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .any(|l| {
            STATEMENT_PREFIXES.iter().any(|p| l.starts_with(p))
                || l.contains(|c: char| matches!(c, '=' | '(' | ')' | '[' | ']' | '{' | '}'))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> CodeExtractor {
        CodeExtractor::default()
    }

    #[test]
    fn test_all_wrappings_agree() {
        let inputs = ["```python\nprint(1)\n```", "```\nprint(1)\n```", "print(1)"];
        for input in inputs {
            assert_eq!(extractor().extract(input).unwrap(), "print(1)", "{input:?}");
        }
    }

    #[test]
    fn test_prose_is_rejected() {
        assert_eq!(
            extractor().extract("I cannot help with that."),
            Err(ExtractionError::NoCode)
        );
        assert_eq!(extractor().extract("  \n\t"), Err(ExtractionError::Empty));
    }

    #[test]
    fn test_language_fence_beats_generic_fence() {
        let text = "Some context:\n```\nls -la\n```\nThe script:\n```python\nimport pandas as pd\n```\n";
        assert_eq!(extractor().extract(text).unwrap(), "import pandas as pd");
    }

    #[test]
    fn test_aliases_and_case() {
        assert_eq!(extractor().extract("```py\nx = 1\n```").unwrap(), "x = 1");
        assert_eq!(extractor().extract("```Python3\nx = 2\n```").unwrap(), "x = 2");
        assert_eq!(
            extractor().extract("```python title=\"plot\"\nx = 3\n```").unwrap(),
            "x = 3"
        );
    }

    #[test]
    fn test_other_language_fence_is_skipped() {
        let text = "```bash\npip install plotly\n```\n```python\nimport plotly\n```";
        assert_eq!(extractor().extract(text).unwrap(), "import plotly");

        // a lone non-target fence leaves only the bare-text fallback
        let text = "```json\n{\"a\": 1}\n```";
        assert_eq!(extractor().extract(text).unwrap(), text);
    }

    #[test]
    fn test_first_block_policy() {
        let text = "```python\na = 1\n```\nand\n```python\nb = 2\n```";
        assert_eq!(extractor().extract(text).unwrap(), "a = 1");
    }

    #[test]
    fn test_concatenate_policy() {
        let text = "```python\na = 1\n```\nand\n```python\nb = 2\n```";
        let extractor = CodeExtractor::new("python", BlockPolicy::Concatenate);
        assert_eq!(extractor.extract(text).unwrap(), "a = 1\nb = 2");
    }

    #[test]
    fn test_empty_block_falls_through() {
        let text = "```python\n\n```\n```\nprint('generic')\n```";
        assert_eq!(extractor().extract(text).unwrap(), "print('generic')");
    }

    #[test]
    fn test_unclosed_fence_runs_to_end() {
        let text = "Here you go:\n```python\nimport math\nprint(math.pi)\n";
        assert_eq!(
            extractor().extract(text).unwrap(),
            "import math\nprint(math.pi)"
        );
    }

    #[test]
    fn test_indentation_preserved() {
        let text = "```python\nfor i in range(3):\n    print(i)\n```";
        assert_eq!(
            extractor().extract(text).unwrap(),
            "for i in range(3):\n    print(i)"
        );

        let nested = "1. Run this:\n   ```python\n   if True:\n       x = 1\n   ```";
        assert_eq!(extractor().extract(nested).unwrap(), "if True:\n    x = 1");
    }

    #[test]
    fn test_tilde_and_long_fences() {
        assert_eq!(extractor().extract("~~~python\nx = 1\n~~~").unwrap(), "x = 1");
        let text = "````python\nprint('```')\n```\n````";
        assert_eq!(extractor().extract(text).unwrap(), "print('```')\n```");
    }

    #[test]
    fn test_fence_only_strategies() {
        let extractor = CodeExtractor::default().with_strategies(vec![
            ExtractionStrategy::LanguageFence,
            ExtractionStrategy::GenericFence,
        ]);
        assert_eq!(extractor.extract("print(1)"), Err(ExtractionError::NoCode));
    }

    #[test]
    fn test_other_target_language() {
        let extractor = CodeExtractor::new("R", BlockPolicy::FirstBlock);
        let text = "```python\nx = 1\n```\n```r\nplot(x)\n```";
        assert_eq!(extractor.extract(text).unwrap(), "plot(x)");
    }
}
