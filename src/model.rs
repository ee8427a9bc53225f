//! Wire types of the chat service.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::options::TurnOptions;

pub const CHAT_MODE_NORMAL: &str = "normal";
pub const CHAT_TYPE_TEXT: &str = "t2t";
pub const DEFAULT_SESSION_TITLE: &str = "New Session";

/// Role of the message sender. Turns are only ever sent as the user.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
}

/// Body of `GET /v1/auths/`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub token: Option<String>,
}

/// Body of `POST /v2/chats/new`.
#[derive(Debug, Clone, Serialize)]
pub struct NewChatRequest {
    pub title: String,
    pub models: Vec<String>,
    pub chat_mode: String,
    pub chat_type: String,
    /// Milliseconds since the epoch.
    pub timestamp: i64,
}

impl NewChatRequest {
    pub fn new(model: &str) -> Self {
        Self {
            title: DEFAULT_SESSION_TITLE.to_string(),
            models: vec![model.to_string()],
            chat_mode: CHAT_MODE_NORMAL.to_string(),
            chat_type: CHAT_TYPE_TEXT.to_string(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewChatResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<NewChatData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewChatData {
    pub id: String,
}

/// Body of `POST /v2/chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct TurnRequest {
    pub stream: bool,
    pub incremental_output: bool,
    pub chat_id: String,
    pub chat_mode: String,
    pub model: String,
    pub parent_id: Option<String>,
    pub messages: Vec<TurnMessage>,
    /// Seconds since the epoch.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnMessage {
    /// Per-message correlation id.
    pub fid: String,
    #[serde(rename = "parentId")]
    pub parent_id: Option<String>,
    #[serde(rename = "childrenIds")]
    pub children_ids: Vec<String>,
    pub role: Role,
    pub content: String,
    pub user_action: String,
    pub files: Vec<Value>,
    pub timestamp: i64,
    pub models: Vec<String>,
    pub chat_type: String,
    pub feature_config: FeatureConfig,
    pub extra: MessageExtra,
    pub sub_chat_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureConfig {
    pub thinking_enabled: bool,
    pub output_schema: String,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            thinking_enabled: false,
            output_schema: "phase".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageExtra {
    pub meta: MessageMeta,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageMeta {
    #[serde(rename = "subChatType")]
    pub sub_chat_type: String,
}

impl TurnRequest {
    /// Build the request for one user message.
    pub fn new(
        chat_id: &str,
        parent_id: Option<&str>,
        model: &str,
        content: &str,
        options: TurnOptions,
    ) -> Self {
        let (stream, incremental_output) = options.resolve();
        let timestamp = Utc::now().timestamp();
        let parent_id = parent_id.map(str::to_string);

        Self {
            stream,
            incremental_output,
            chat_id: chat_id.to_string(),
            chat_mode: CHAT_MODE_NORMAL.to_string(),
            model: model.to_string(),
            parent_id: parent_id.clone(),
            messages: vec![TurnMessage {
                fid: Uuid::new_v4().to_string(),
                parent_id,
                children_ids: Vec::new(),
                role: Role::User,
                content: content.to_string(),
                user_action: "chat".to_string(),
                files: Vec::new(),
                timestamp,
                models: vec![model.to_string()],
                chat_type: CHAT_TYPE_TEXT.to_string(),
                feature_config: FeatureConfig::default(),
                extra: MessageExtra {
                    meta: MessageMeta {
                        sub_chat_type: CHAT_TYPE_TEXT.to_string(),
                    },
                },
                sub_chat_type: CHAT_TYPE_TEXT.to_string(),
            }],
            timestamp,
        }
    }
}
