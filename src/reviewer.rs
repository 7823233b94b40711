use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::types::{Intent, IntentContext};

pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";
pub const DEFAULT_MODEL: &str = "deepseek-chat";

const SYSTEM_PROMPT: &str = "You are an intent classifier for a Script Rehearsal App.
User is rehearsing lines. You need to analyze if their input contains a CONTROL COMMAND.

Possible Intents:
- STOP: User wants to stop/quit/exit. (e.g. \"我不练了\", \"退出\", \"停止\")
- RESTART: User wants to start over. (e.g. \"重来\", \"重新开始\")
- CHANGE_ROLE: User wants to switch role. (e.g. \"我想演甲\", \"换个角色\")
- CHANGE_LEVEL: User wants to change difficulty/mastery. (e.g. \"太难了\", \"不需要提示了\")
- NONE: User is just determining lines or saying something irrelevant to control.

Return ONLY the Intent Enum String.";

#[derive(Debug, Deserialize)]
struct LlmResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: String,
}

/// Decides whether a recognized utterance is a control command. Never fails:
/// anything the classifier cannot answer is `Intent::None`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Reviewer: Send + Sync {
    async fn judge_intent(&self, text: &str, context: &IntentContext) -> Intent;
}

/// OpenAI-compatible chat-completions classifier.
pub struct ReviewerClient {
    client: Client,
    api_key: SecretString,
    base_url: String,
    model: String,
}

impl ReviewerClient {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn classify(&self, text: &str, context: &IntentContext) -> Result<Intent> {
        let context = serde_json::to_string(context)?;
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": format!("User Input: \"{text}\"\nContext: {context}") }
            ],
            "temperature": 0.1,
            "stream": false
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .context("classification request failed")?
            .error_for_status()?
            .json::<LlmResponse>()
            .await
            .context("unexpected classification response")?;

        let answer = &resp
            .choices
            .first()
            .ok_or_else(|| anyhow::anyhow!("No response from LLM"))?
            .message
            .content;
        let intent = Intent::from_label(answer);
        if intent == Intent::None && answer.trim() != Intent::None.label() {
            tracing::warn!("classifier answered with an unknown label: {:?}", answer);
        }
        Ok(intent)
    }
}

#[async_trait]
impl Reviewer for ReviewerClient {
    async fn judge_intent(&self, text: &str, context: &IntentContext) -> Intent {
        if text.trim().chars().count() < 2 {
            return Intent::None;
        }
        match self.classify(text, context).await {
            Ok(intent) => {
                tracing::info!("intent for {:?}: {:?}", text, intent);
                intent
            }
            Err(e) => {
                tracing::warn!("intent classification failed: {:#}", e);
                Intent::None
            }
        }
    }
}
