use serde::Deserialize;
use serde_json::Value;

/// One raw line of the log, before session/project resolution (spec.md §6
/// wire format). Unknown extra keys and unknown value shapes within a known
/// field are tolerated — `#[serde(other)]` variants and `#[serde(default)]`
/// fields absorb schema drift rather than failing the line.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type")]
#[serde(rename_all = "kebab-case")]
pub(crate) enum ClaudeRecord {
    User(UserRecord),
    Assistant(AssistantRecord),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UserRecord {
    pub uuid: String,
    pub parent_uuid: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    pub timestamp: String,
    pub message: UserMessage,
    #[serde(default)]
    pub is_sidechain: bool,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub user_type: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub git_branch: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub(crate) struct UserMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(deserialize_with = "deserialize_content_as_json")]
    pub content: Value,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AssistantRecord {
    pub uuid: String,
    pub parent_uuid: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    pub timestamp: String,
    pub message: AssistantMessage,
    #[serde(default)]
    pub is_sidechain: bool,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub user_type: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub git_branch: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub(crate) struct AssistantMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(deserialize_with = "deserialize_content_as_json")]
    pub content: Value,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize, Clone)]
pub(crate) struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    #[serde(default)]
    pub service_tier: Option<String>,
}

/// `message.content` may be a bare string or a list of content blocks
/// (spec.md §4.B); this crate keeps it as opaque JSON and leaves block-level
/// interpretation (text vs tool_use vs thinking) to [`crate::claude::extract`].
fn deserialize_content_as_json<'de, D>(deserializer: D) -> std::result::Result<Value, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer)
}
