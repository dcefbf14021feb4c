//! The reasoning collaborator: given the conversation so far, return text
//! that should contain the next script to run.

use crate::config::ReasonerConfig;
use crate::errors::ReasoningError;
use crate::state::{Role, Turn};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Capability the control loop uses to obtain the next response
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// No retries happen here or in the loop; a failure ends the run
    async fn reason(&self, history: &[Turn]) -> Result<String, ReasoningError>;
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Reasoner backed by an OpenAI-compatible Chat Completions endpoint
#[derive(Debug)]
pub struct OpenAiReasoner {
    http: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    temperature: f32,
    system_prompt: String,
    timeout: Duration,
}

impl OpenAiReasoner {
    pub fn from_config(config: &ReasonerConfig) -> Result<Self, ReasoningError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ReasoningError::MissingApiKey)?;
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            system_prompt: config.system_prompt.clone(),
            timeout,
        })
    }

    fn messages(&self, history: &[Turn]) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if !self.system_prompt.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: self.system_prompt.clone(),
            });
        }
        messages.extend(history.iter().map(to_chat_message));
        messages
    }
}

fn to_chat_message(turn: &Turn) -> ChatMessage {
    match turn.role {
        Role::Request => ChatMessage {
            role: "user",
            content: turn.content.clone(),
        },
        Role::Reasoning => ChatMessage {
            role: "assistant",
            content: turn.content.clone(),
        },
        Role::Observation => ChatMessage {
            role: "user",
            content: format!("Observation:\n{}", turn.content),
        },
    }
}

#[async_trait]
impl Reasoner for OpenAiReasoner {
    async fn reason(&self, history: &[Turn]) -> Result<String, ReasoningError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| ReasoningError::InvalidResponse("API key is not a valid header".into()))?;
        headers.insert(AUTHORIZATION, auth);

        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": self.messages(history),
        });

        debug!(model = %self.model, turns = history.len(), "sending chat completion");
        let resp = self
            .http
            .post(&self.url)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ReasoningError::Timeout(self.timeout)
                } else {
                    ReasoningError::Http(e)
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ReasoningError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = resp.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .ok_or_else(|| ReasoningError::InvalidResponse("response has no message content".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_api_key() {
        let err = OpenAiReasoner::from_config(&ReasonerConfig::default()).unwrap_err();
        assert!(matches!(err, ReasoningError::MissingApiKey));
    }

    #[test]
    fn test_message_mapping() {
        let config = ReasonerConfig {
            api_key: Some("sk-test".to_string()),
            base_url: "http://localhost:8080/v1/".to_string(),
            system_prompt: "be brief".to_string(),
            ..Default::default()
        };
        let reasoner = OpenAiReasoner::from_config(&config).unwrap();
        assert_eq!(reasoner.url, "http://localhost:8080/v1/chat/completions");

        let history = vec![
            Turn::request("plot it"),
            Turn::reasoning("```python\nx\n```"),
            Turn::observation("NameError"),
        ];
        let roles: Vec<_> = reasoner
            .messages(&history)
            .into_iter()
            .map(|m| (m.role, m.content))
            .collect();
        assert_eq!(
            roles,
            vec![
                ("system", "be brief".to_string()),
                ("user", "plot it".to_string()),
                ("assistant", "```python\nx\n```".to_string()),
                ("user", "Observation:\nNameError".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_response() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"id": "x", "choices": [{"index": 0, "message": {"role": "assistant", "content": "hi"}}]}"#,
        )
        .unwrap();
        assert_eq!(
            parsed.choices[0].message.as_ref().unwrap().content.as_deref(),
            Some("hi")
        );
    }
}
