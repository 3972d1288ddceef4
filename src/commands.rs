// commands.rs
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dispatch::EventHandler;
use crate::Notification;

pub const CHANNEL_CHAT_MESSAGE_V1: &str = "channel.chat.message.v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessageCondition {
    pub broadcaster_user_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessageEvent {
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
    pub broadcaster_user_name: String,
    pub chatter_user_id: String,
    pub chatter_user_login: String,
    pub chatter_user_name: String,
    pub message_id: String,
    pub message: ChatMessage,
    #[serde(default)]
    pub message_type: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub badges: Vec<ChatBadge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub text: String,
    #[serde(default)]
    pub fragments: Vec<ChatFragment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatFragment {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatBadge {
    pub set_id: String,
    pub id: String,
    #[serde(default)]
    pub info: String,
}

#[derive(Debug, Clone)]
pub struct CommandProcessor {
    command_regex: Regex,
}

impl CommandProcessor {
    pub fn new(prefix: &str) -> Result<Self, regex::Error> {
        // Matches <prefix> followed by a command word at the start of the message
        let command_regex = Regex::new(&format!(r"^\s*{}(\w+)", regex::escape(prefix)))?;

        Ok(Self { command_regex })
    }

    pub fn parse_command(&self, text: &str) -> Option<String> {
        if let Some(captures) = self.command_regex.captures(text) {
            if let Some(command) = captures.get(1) {
                return Some(command.as_str().to_lowercase());
            }
        }
        None
    }
}

/// Logs chat commands seen in `channel.chat.message` notifications.
#[derive(Debug, Clone)]
pub struct ChatCommandHandler {
    processor: CommandProcessor,
}

impl ChatCommandHandler {
    pub fn new(prefix: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            processor: CommandProcessor::new(prefix)?,
        })
    }
}

#[async_trait]
impl EventHandler for ChatCommandHandler {
    type Event = ChatMessageEvent;
    type Condition = ChatMessageCondition;

    async fn handle(
        &self,
        notification: Notification<ChatMessageEvent, ChatMessageCondition>,
    ) -> anyhow::Result<()> {
        let event = &notification.event;

        match self.processor.parse_command(&event.message.text) {
            Some(command) => info!(
                broadcaster_id = %event.broadcaster_user_id,
                chatter_id = %event.chatter_user_id,
                chatter = %event.chatter_user_login,
                %command,
                "chat command received"
            ),
            None => debug!(
                broadcaster_id = %event.broadcaster_user_id,
                chatter_id = %event.chatter_user_id,
                message_id = %event.message_id,
                "chat message without command"
            ),
        }

        Ok(())
    }
}
