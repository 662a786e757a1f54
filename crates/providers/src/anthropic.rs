//! The reasoning service: Anthropic's Messages API.
//!
//! One `complete()` call is one turn. The system prompt goes out as text
//! blocks with `cache_control` on the cache-boundary segment, actions as
//! `tools`, and requested actions come back as `tool_use` blocks. Results
//! are returned as `tool_result` blocks on the next user message.
//!
//! Usage is reported per turn, including prompt-cache reads and writes.

use async_trait::async_trait;
use buildloop_config::AppConfig;
use buildloop_core::error::ProviderError;
use buildloop_core::message::{ActionCall, Message, Role};
use buildloop_core::provider::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const DEFAULT_MAX_TOKENS: u32 = 8192;
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl AnthropicProvider {
    /// Create a provider whose calls time out after `timeout`.
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
            timeout,
        })
    }

    /// Build from configuration: key, base URL and request timeout.
    pub fn from_config(config: &AppConfig) -> Result<Self, ProviderError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            ProviderError::NotConfigured(
                "no API key; set BUILDLOOP_API_KEY or ANTHROPIC_API_KEY".into(),
            )
        })?;
        Ok(Self::new(api_key, config.provider.request_timeout())?
            .with_base_url(&config.provider.base_url))
    }

    /// Point at another endpoint, such as a proxy or a local stub.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// System instructions as text blocks. The boundary segment is marked
    /// so everything up to it is cached across calls.
    fn to_api_system(system: &SystemPrompt) -> Vec<SystemBlock> {
        system
            .segments
            .iter()
            .filter(|s| !s.text.is_empty())
            .map(|s| SystemBlock {
                kind: "text",
                text: s.text.clone(),
                cache_control: s.cache_boundary.then_some(CacheControl { kind: "ephemeral" }),
            })
            .collect()
    }

    /// Convert messages to Anthropic API format with content blocks.
    fn to_api_messages(messages: &[Message]) -> Vec<AnthropicMessage> {
        let mut result = Vec::with_capacity(messages.len());

        for msg in messages {
            match msg.role {
                Role::User => {
                    result.push(AnthropicMessage {
                        role: "user".into(),
                        content: AnthropicContent::Text(msg.content.clone()),
                    });
                }
                Role::Assistant => {
                    if msg.action_calls.is_empty() {
                        result.push(AnthropicMessage {
                            role: "assistant".into(),
                            content: AnthropicContent::Text(msg.content.clone()),
                        });
                    } else {
                        let mut blocks: Vec<ContentBlock> = Vec::new();
                        if !msg.content.is_empty() {
                            blocks.push(ContentBlock::Text {
                                text: msg.content.clone(),
                            });
                        }
                        for call in &msg.action_calls {
                            blocks.push(ContentBlock::ToolUse {
                                id: call.id.clone(),
                                name: call.name.clone(),
                                input: call.input.clone(),
                            });
                        }
                        result.push(AnthropicMessage {
                            role: "assistant".into(),
                            content: AnthropicContent::Blocks(blocks),
                        });
                    }
                }
                Role::Tool => {
                    // Results go back as one user turn; a trailing
                    // instruction rides along as a text block.
                    let mut blocks: Vec<ContentBlock> = msg
                        .action_results
                        .iter()
                        .map(|r| ContentBlock::ToolResult {
                            tool_use_id: r.call_id.clone(),
                            content: r.content.clone(),
                            is_error: r.is_error,
                        })
                        .collect();
                    if !msg.content.is_empty() {
                        blocks.push(ContentBlock::Text {
                            text: msg.content.clone(),
                        });
                    }
                    result.push(AnthropicMessage {
                        role: "user".into(),
                        content: AnthropicContent::Blocks(blocks),
                    });
                }
            }
        }

        result
    }

    /// Convert action definitions to Anthropic tool format.
    fn to_api_tools(actions: &[ActionDefinition]) -> Vec<AnthropicTool> {
        actions
            .iter()
            .map(|a| AnthropicTool {
                name: a.name.clone(),
                description: a.description.clone(),
                input_schema: a.parameters.clone(),
            })
            .collect()
    }

    fn build_body(request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature,
        });

        let system = Self::to_api_system(&request.system);
        if !system.is_empty() {
            body["system"] = serde_json::json!(system);
        }

        if !request.actions.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.actions));
        }

        body
    }

    /// Map a non-success HTTP status to a provider error.
    fn status_error(status: u16, retry_after: Option<u64>, body: String) -> ProviderError {
        match status {
            429 => ProviderError::RateLimited {
                retry_after_secs: retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
            },
            401 | 403 => ProviderError::AuthenticationFailed("Invalid Anthropic API key".into()),
            _ => ProviderError::ApiError {
                status_code: status,
                message: body,
            },
        }
    }

    fn stop_reason(raw: Option<&str>) -> StopReason {
        match raw {
            Some("end_turn") => StopReason::EndTurn,
            Some("tool_use") => StopReason::ToolUse,
            Some("max_tokens") => StopReason::MaxTokens,
            Some("stop_sequence") => StopReason::StopSequence,
            Some(other) => StopReason::Other(other.to_string()),
            None => StopReason::Other("unknown".into()),
        }
    }

    /// Convert Anthropic API response to our ProviderResponse.
    fn response_to_provider_response(resp: AnthropicResponse) -> ProviderResponse {
        let mut narration = String::new();
        let mut calls = Vec::new();

        for block in resp.content {
            match block {
                ResponseContentBlock::Text { text } => {
                    if !narration.is_empty() {
                        narration.push('\n');
                    }
                    narration.push_str(&text);
                }
                ResponseContentBlock::ToolUse { id, name, input } => {
                    calls.push(ActionCall { id, name, input });
                }
                ResponseContentBlock::Unsupported => {}
            }
        }

        let usage = Usage {
            input_tokens: resp.usage.input_tokens,
            output_tokens: resp.usage.output_tokens,
            cache_read_tokens: resp.usage.cache_read_input_tokens.unwrap_or(0),
            cache_write_tokens: resp.usage.cache_creation_input_tokens.unwrap_or(0),
        };

        let mut message = Message::assistant_with_calls(narration, calls);
        message.id = resp.id;

        ProviderResponse {
            message,
            stop_reason: Self::stop_reason(resp.stop_reason.as_deref()),
            usage,
            model: resp.model,
        }
    }
}

#[async_trait]
impl buildloop_core::Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/messages", self.base_url);
        let body = Self::build_body(&request);

        debug!(
            provider = "anthropic",
            model = %request.model,
            messages = request.messages.len(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(self.timeout.as_secs())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if status != 200 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(Self::status_error(status, retry_after, error_body));
        }

        let api_resp: AnthropicResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(self.timeout.as_secs())
            } else {
                ProviderError::MalformedResponse(format!("Failed to parse Anthropic response: {e}"))
            }
        })?;

        Ok(Self::response_to_provider_response(api_resp))
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize)]
struct SystemBlock {
    #[serde(rename = "type")]
    kind: &'static str,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

#[derive(Debug, Serialize)]
struct CacheControl {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    model: String,
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// Thinking and any block type this client does not use.
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
    #[serde(default)]
    cache_creation_input_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildloop_core::message::ActionResult;
    use buildloop_core::Provider;

    fn provider() -> AnthropicProvider {
        AnthropicProvider::new("sk-ant-test", Duration::from_secs(600)).unwrap()
    }

    fn parse(json: &str) -> ProviderResponse {
        let resp: AnthropicResponse = serde_json::from_str(json).unwrap();
        AnthropicProvider::response_to_provider_response(resp)
    }

    #[test]
    fn constructor() {
        let provider = provider();
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.base_url, DEFAULT_BASE_URL);
        assert_eq!(provider.timeout, Duration::from_secs(600));
    }

    #[test]
    fn constructor_with_base_url() {
        let provider = provider().with_base_url("https://custom.proxy.com/v1/");
        assert_eq!(provider.base_url, "https://custom.proxy.com/v1");
    }

    #[test]
    fn from_config_requires_key() {
        let config = AppConfig::default();
        assert!(matches!(
            AnthropicProvider::from_config(&config),
            Err(ProviderError::NotConfigured(_))
        ));

        let mut config = AppConfig {
            api_key: Some("sk-ant".into()),
            ..AppConfig::default()
        };
        config.provider.request_timeout_secs = 42;
        let provider = AnthropicProvider::from_config(&config).unwrap();
        assert_eq!(provider.timeout, Duration::from_secs(42));
    }

    #[test]
    fn system_segments_mark_cache_boundary() {
        let system = SystemPrompt::new()
            .cached("role preamble")
            .cached("action guide")
            .dynamic("file: src/lib.rs");
        let body = AnthropicProvider::build_body(&ProviderRequest {
            model: "claude-sonnet-4".into(),
            system,
            messages: vec![Message::user("go")],
            temperature: 0.2,
            max_tokens: None,
            actions: vec![],
        });

        let blocks = body["system"].as_array().unwrap();
        assert_eq!(blocks.len(), 3);
        assert!(blocks[0].get("cache_control").is_none());
        assert_eq!(blocks[1]["cache_control"]["type"], "ephemeral");
        assert!(blocks[2].get("cache_control").is_none());
        assert_eq!(blocks[2]["text"], "file: src/lib.rs");
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn message_conversion_with_action_calls() {
        let msg = Message::assistant_with_calls(
            "Let me look",
            vec![ActionCall {
                id: "toolu_123".into(),
                name: "fetch_contract".into(),
                input: serde_json::json!({"contract_type": "style"}),
            }],
        );
        let api_msgs = AnthropicProvider::to_api_messages(&[msg]);
        assert_eq!(api_msgs.len(), 1);
        assert_eq!(api_msgs[0].role, "assistant");
        match &api_msgs[0].content {
            AnthropicContent::Blocks(blocks) => {
                assert_eq!(blocks.len(), 2);
                match &blocks[1] {
                    ContentBlock::ToolUse { id, name, input } => {
                        assert_eq!(id, "toolu_123");
                        assert_eq!(name, "fetch_contract");
                        assert_eq!(input["contract_type"], "style");
                    }
                    _ => panic!("Expected tool_use block"),
                }
            }
            _ => panic!("Expected blocks content"),
        }
    }

    #[test]
    fn message_conversion_results_with_instruction() {
        let msg = Message::action_results(
            vec![
                ActionResult::error("toolu_1", "output truncated"),
                ActionResult::from_value("toolu_2", &serde_json::json!({"ok": true}), false),
            ],
            Some("Retry with shorter output.".into()),
        );
        let api_msgs = AnthropicProvider::to_api_messages(&[msg]);
        assert_eq!(api_msgs[0].role, "user");
        let AnthropicContent::Blocks(blocks) = &api_msgs[0].content else {
            panic!("Expected blocks content");
        };
        assert_eq!(blocks.len(), 3);
        assert!(matches!(
            &blocks[0],
            ContentBlock::ToolResult { tool_use_id, is_error: true, .. } if tool_use_id == "toolu_1"
        ));
        assert!(matches!(&blocks[1], ContentBlock::ToolResult { is_error: false, .. }));
        assert!(matches!(&blocks[2], ContentBlock::Text { text } if text == "Retry with shorter output."));
    }

    #[test]
    fn action_definition_conversion() {
        let actions = vec![ActionDefinition {
            name: "note".into(),
            description: "Record a note".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            }),
        }];
        let api_tools = AnthropicProvider::to_api_tools(&actions);
        assert_eq!(api_tools.len(), 1);
        assert_eq!(api_tools[0].name, "note");
        assert_eq!(api_tools[0].input_schema["type"].as_str(), Some("object"));
    }

    #[test]
    fn parse_tool_use_response_with_cache_usage() {
        let pr = parse(
            r#"{
                "id": "msg_02",
                "model": "claude-sonnet-4-20250514",
                "content": [
                    {"type": "thinking", "thinking": "hmm", "signature": "x"},
                    {"type": "text", "text": "Submitting"},
                    {"type": "tool_use", "id": "toolu_abc", "name": "submit_plan", "input": {"summary": "x"}}
                ],
                "usage": {
                    "input_tokens": 120,
                    "output_tokens": 40,
                    "cache_read_input_tokens": 900,
                    "cache_creation_input_tokens": 30
                },
                "stop_reason": "tool_use"
            }"#,
        );
        assert_eq!(pr.message.id, "msg_02");
        assert_eq!(pr.message.content, "Submitting");
        assert_eq!(pr.message.action_calls.len(), 1);
        assert_eq!(pr.message.action_calls[0].name, "submit_plan");
        assert_eq!(pr.stop_reason, StopReason::ToolUse);
        assert_eq!(
            pr.usage,
            Usage {
                input_tokens: 120,
                output_tokens: 40,
                cache_read_tokens: 900,
                cache_write_tokens: 30,
            }
        );
    }

    #[test]
    fn parse_truncated_response_without_cache_fields() {
        let pr = parse(
            r#"{
                "id": "msg_03",
                "model": "claude-sonnet-4-20250514",
                "content": [{"type": "text", "text": "partial"}],
                "usage": {"input_tokens": 10, "output_tokens": 8192},
                "stop_reason": "max_tokens"
            }"#,
        );
        assert!(pr.stop_reason.is_truncated());
        assert_eq!(pr.usage.cache_read_tokens, 0);
        assert_eq!(pr.usage.cache_write_tokens, 0);
    }

    #[test]
    fn stop_reason_mapping() {
        assert_eq!(AnthropicProvider::stop_reason(Some("end_turn")), StopReason::EndTurn);
        assert_eq!(AnthropicProvider::stop_reason(Some("stop_sequence")), StopReason::StopSequence);
        assert_eq!(
            AnthropicProvider::stop_reason(Some("refusal")),
            StopReason::Other("refusal".into())
        );
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            AnthropicProvider::status_error(429, Some(30), String::new()),
            ProviderError::RateLimited { retry_after_secs: 30 }
        ));
        assert!(matches!(
            AnthropicProvider::status_error(429, None, String::new()),
            ProviderError::RateLimited { retry_after_secs: DEFAULT_RETRY_AFTER_SECS }
        ));
        assert!(matches!(
            AnthropicProvider::status_error(401, None, String::new()),
            ProviderError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            AnthropicProvider::status_error(529, None, "Overloaded".into()),
            ProviderError::ApiError { status_code: 529, .. }
        ));
    }
}
