use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Which of the three chat calls a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatStage {
    UserLookup,
    ConversationOpen,
    MessageSend,
}

impl std::fmt::Display for ChatStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ChatStage::UserLookup => "user lookup",
            ChatStage::ConversationOpen => "conversation open",
            ChatStage::MessageSend => "message send",
        })
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("chat user lookup failed: {0}")]
    UserLookup(String),
    #[error("chat conversation open failed: {0}")]
    ConversationOpen(String),
    #[error("chat message send failed: {0}")]
    MessageSend(String),
    #[error("chat {stage} timed out after {after:?}")]
    Timeout { stage: ChatStage, after: Duration },
    #[error("chat integration is not configured")]
    NotConfigured,
}

impl ChatError {
    fn at(stage: ChatStage, message: String) -> Self {
        match stage {
            ChatStage::UserLookup => ChatError::UserLookup(message),
            ChatStage::ConversationOpen => ChatError::ConversationOpen(message),
            ChatStage::MessageSend => ChatError::MessageSend(message),
        }
    }
}

/// Structured content rendered by the chat client under the message text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Header {
        text: String,
        style: String,
    },
    Text {
        text: String,
        markdown: bool,
    },
    Divider,
    Description {
        term: String,
        content: BlockText,
        accent: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockText {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    pub markdown: bool,
}

impl Block {
    pub fn header(text: impl Into<String>) -> Self {
        Block::Header {
            text: text.into(),
            style: "blue".to_string(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Block::Text {
            text: text.into(),
            markdown: true,
        }
    }

    pub fn description(term: impl Into<String>, text: impl Into<String>) -> Self {
        Block::Description {
            term: term.into(),
            content: BlockText {
                kind: "text".to_string(),
                text: text.into(),
                markdown: false,
            },
            accent: true,
        }
    }
}

/// A rendered notification: fallback text plus structured blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub text: String,
    pub blocks: Vec<Block>,
}

#[async_trait]
pub trait ChatClient: Send + Sync + 'static {
    /// Resolves the chat-side user id for an email address.
    async fn find_user_by_email(&self, email: &str) -> Result<String, ChatError>;

    /// Opens (or returns the existing) direct conversation with a chat user.
    async fn open_conversation(&self, chat_user_id: &str) -> Result<String, ChatError>;

    async fn send_message(
        &self,
        conversation_id: &str,
        message: &ChatMessage,
    ) -> Result<(), ChatError>;
}

/// Stand-in used when no chat credentials are configured; every delivery
/// fails so notifications are still recorded.
pub struct DisabledChatClient;

#[async_trait]
impl ChatClient for DisabledChatClient {
    async fn find_user_by_email(&self, _email: &str) -> Result<String, ChatError> {
        Err(ChatError::NotConfigured)
    }

    async fn open_conversation(&self, _chat_user_id: &str) -> Result<String, ChatError> {
        Err(ChatError::NotConfigured)
    }

    async fn send_message(
        &self,
        _conversation_id: &str,
        _message: &ChatMessage,
    ) -> Result<(), ChatError> {
        Err(ChatError::NotConfigured)
    }
}

pub struct HttpChatClient {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpChatClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build chat HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/v1/{}", self.base_url, method)
    }
}

#[async_trait]
impl ChatClient for HttpChatClient {
    async fn find_user_by_email(&self, email: &str) -> Result<String, ChatError> {
        let stage = ChatStage::UserLookup;
        let response = self
            .client
            .get(self.url("users.find_by_email"))
            .bearer_auth(&self.token)
            .query(&[("email", email)])
            .send()
            .await
            .map_err(|err| ChatError::at(stage, err.to_string()))?;

        let body = read_success_body(response)
            .await
            .map_err(|message| ChatError::at(stage, message))?;
        id_at(&body, "/user/id")
            .ok_or_else(|| ChatError::at(stage, "response is missing user.id".to_string()))
    }

    async fn open_conversation(&self, chat_user_id: &str) -> Result<String, ChatError> {
        let stage = ChatStage::ConversationOpen;
        let response = self
            .client
            .post(self.url("conversations.open"))
            .bearer_auth(&self.token)
            .json(&json!({ "user_id": chat_user_id }))
            .send()
            .await
            .map_err(|err| ChatError::at(stage, err.to_string()))?;

        let body = read_success_body(response)
            .await
            .map_err(|message| ChatError::at(stage, message))?;
        id_at(&body, "/conversation/id").ok_or_else(|| {
            ChatError::at(stage, "response is missing conversation.id".to_string())
        })
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        message: &ChatMessage,
    ) -> Result<(), ChatError> {
        let stage = ChatStage::MessageSend;
        let response = self
            .client
            .post(self.url("messages.send"))
            .bearer_auth(&self.token)
            .json(&json!({
                "conversation_id": conversation_id,
                "text": message.text,
                "blocks": message.blocks,
            }))
            .send()
            .await
            .map_err(|err| ChatError::at(stage, err.to_string()))?;

        read_success_body(response)
            .await
            .map(|_| ())
            .map_err(|message| ChatError::at(stage, message))
    }
}

/// Non-2xx statuses and bodies without `"success": true` are failures.
async fn read_success_body(response: reqwest::Response) -> Result<Value, String> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|err| format!("failed to read response body: {err}"))?;

    if !status.is_success() {
        return Err(format!("status {status}: {text}"));
    }

    let body: Value =
        serde_json::from_str(&text).map_err(|err| format!("invalid response body: {err}"))?;

    if body.get("success").and_then(Value::as_bool) != Some(true) {
        let reason = body
            .pointer("/error/message")
            .or_else(|| body.pointer("/error/code"))
            .and_then(Value::as_str)
            .unwrap_or("response not marked successful");
        return Err(reason.to_string());
    }

    Ok(body)
}

/// Chat ids come back as numbers or strings; both are kept as strings.
fn id_at(body: &Value, pointer: &str) -> Option<String> {
    match body.pointer(pointer)? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}
