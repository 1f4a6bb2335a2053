//! MCP server for avatar control using rmcp.
//!
//! Exposes tools for agent integration: avatar_say, avatar_set_emotion,
//! avatar_toggle_active, avatar_status, avatar_cancel, avatar_voices,
//! avatar_set_voice. Each tool is a thin HTTP proxy to the control API,
//! so the MCP transport and the avatar service share one code path.

use std::net::SocketAddr;
use std::time::Duration;

use rmcp::handler::server::tool::{Parameters, ToolRouter};
use rmcp::model::{CallToolResult, Content, ServerCapabilities, ServerInfo};
use rmcp::transport::sse_server::SseServerConfig;
use rmcp::transport::SseServer;
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// --- Tool parameter structs ---

#[derive(Debug, Deserialize, rmcp::schemars::JsonSchema)]
pub struct SayRequest {
    #[schemars(description = "The message the avatar should say aloud")]
    pub text: String,
}

#[derive(Debug, Deserialize, rmcp::schemars::JsonSchema)]
pub struct SetEmotionRequest {
    #[schemars(description = "Emotion to display: 'neutral', 'happy', 'sad', 'surprised' or 'thinking'")]
    pub emotion: String,
}

#[derive(Debug, Deserialize, rmcp::schemars::JsonSchema)]
pub struct SetVoiceRequest {
    #[schemars(description = "Voice name (e.g., 'ff_siwis', 'af_heart', 'am_adam')")]
    pub voice: String,
}

// --- MCP Server handler ---

#[derive(Clone)]
pub struct AvatarMcp {
    api_port: u16,
    http_client: reqwest::Client,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl AvatarMcp {
    pub fn new(api_port: u16) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            api_port,
            http_client,
            tool_router: Self::tool_router(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.api_port)
    }

    #[tool(description = "Make the avatar say a message aloud (animated, with TTS when available).\n\nArgs:\n    text: The message to say")]
    async fn avatar_say(
        &self,
        Parameters(req): Parameters<SayRequest>,
    ) -> Result<CallToolResult, McpError> {
        match self
            .http_client
            .post(self.url("/say"))
            .json(&json!({ "text": req.text }))
            .send()
            .await
        {
            Ok(resp) => {
                if let Ok(data) = resp.json::<serde_json::Value>().await {
                    if data["status"].as_str() == Some("error") {
                        return Ok(CallToolResult::success(vec![Content::text(format!(
                            "Error: {}",
                            data["error"].as_str().unwrap_or("unknown")
                        ))]));
                    }
                }
                let preview: String = req.text.chars().take(80).collect();
                Ok(CallToolResult::success(vec![Content::text(format!(
                    "Saying: {preview}"
                ))]))
            }
            Err(e) => Ok(CallToolResult::success(vec![Content::text(format!(
                "Avatar unreachable: {e}"
            ))])),
        }
    }

    #[tool(description = "Set the avatar's emotion.\n\nArgs:\n    emotion: 'neutral', 'happy', 'sad', 'surprised' or 'thinking'")]
    async fn avatar_set_emotion(
        &self,
        Parameters(req): Parameters<SetEmotionRequest>,
    ) -> Result<CallToolResult, McpError> {
        match self
            .http_client
            .post(self.url("/emotion"))
            .json(&json!({ "emotion": req.emotion }))
            .send()
            .await
        {
            Ok(resp) => {
                if let Ok(data) = resp.json::<serde_json::Value>().await {
                    if data["status"].as_str() == Some("error") {
                        return Ok(CallToolResult::success(vec![Content::text(format!(
                            "Error: {}",
                            data["error"].as_str().unwrap_or("unknown")
                        ))]));
                    }
                }
                Ok(CallToolResult::success(vec![Content::text(format!(
                    "Emotion set to: {}",
                    req.emotion
                ))]))
            }
            Err(e) => Ok(CallToolResult::success(vec![Content::text(format!(
                "Avatar unreachable: {e}"
            ))])),
        }
    }

    #[tool(description = "Toggle the avatar between active and inactive. Deactivating resets emotion, speech and message.")]
    async fn avatar_toggle_active(&self) -> Result<CallToolResult, McpError> {
        match self.http_client.post(self.url("/active-toggle")).send().await {
            Ok(_) => Ok(CallToolResult::success(vec![Content::text(
                "Avatar active state toggled",
            )])),
            Err(e) => Ok(CallToolResult::success(vec![Content::text(format!(
                "Avatar unreachable: {e}"
            ))])),
        }
    }

    #[tool(description = "Get the avatar's current state: active, emotion, speaking, message, pose, speech availability.")]
    async fn avatar_status(&self) -> Result<CallToolResult, McpError> {
        match self.http_client.get(self.url("/status")).send().await {
            Ok(resp) => match resp.json::<serde_json::Value>().await {
                Ok(data) => {
                    let state = &data["state"];
                    let status = format!(
                        "Avatar status:\n- Active: {}\n- Emotion: {}\n- Speaking: {}\n- Message: {}\n- Speech backend: {}",
                        state["active"].as_bool().unwrap_or(false),
                        state["emotion"].as_str().unwrap_or("unknown"),
                        state["speaking"].as_bool().unwrap_or(false),
                        state["message"].as_str().unwrap_or(""),
                        if data["speech_available"].as_bool().unwrap_or(false) {
                            "available"
                        } else {
                            "unavailable"
                        },
                    );
                    Ok(CallToolResult::success(vec![Content::text(status)]))
                }
                Err(e) => Ok(CallToolResult::success(vec![Content::text(format!(
                    "Bad status response: {e}"
                ))])),
            },
            Err(e) => Ok(CallToolResult::success(vec![Content::text(format!(
                "Avatar unreachable: {e}"
            ))])),
        }
    }

    #[tool(description = "Stop the avatar mid-sentence: cancels speech and the speaking animation.")]
    async fn avatar_cancel(&self) -> Result<CallToolResult, McpError> {
        match self.http_client.post(self.url("/cancel")).send().await {
            Ok(_) => Ok(CallToolResult::success(vec![Content::text("Cancelled")])),
            Err(e) => Ok(CallToolResult::success(vec![Content::text(format!(
                "Avatar unreachable: {e}"
            ))])),
        }
    }

    #[tool(description = "List the TTS voices the avatar can use.")]
    async fn avatar_voices(&self) -> Result<CallToolResult, McpError> {
        match self.http_client.get(self.url("/voices")).send().await {
            Ok(resp) => match resp.json::<Vec<String>>().await {
                Ok(voices) if voices.is_empty() => Ok(CallToolResult::success(vec![
                    Content::text("No voices available (speech backend not loaded)."),
                ])),
                Ok(voices) => {
                    let text = format!(
                        "Available voices:\n{}",
                        voices
                            .iter()
                            .map(|v| format!("- {v}"))
                            .collect::<Vec<_>>()
                            .join("\n")
                    );
                    Ok(CallToolResult::success(vec![Content::text(text)]))
                }
                Err(e) => Ok(CallToolResult::success(vec![Content::text(format!(
                    "Bad voices response: {e}"
                ))])),
            },
            Err(e) => Ok(CallToolResult::success(vec![Content::text(format!(
                "Avatar unreachable: {e}"
            ))])),
        }
    }

    #[tool(description = "Set the avatar's TTS voice.\n\nArgs:\n    voice: Voice name (e.g., 'ff_siwis', 'af_heart', 'am_adam')")]
    async fn avatar_set_voice(
        &self,
        Parameters(req): Parameters<SetVoiceRequest>,
    ) -> Result<CallToolResult, McpError> {
        match self
            .http_client
            .post(self.url("/set-voice"))
            .json(&json!({ "voice": req.voice }))
            .send()
            .await
        {
            Ok(resp) => {
                if let Ok(data) = resp.json::<serde_json::Value>().await {
                    if data["status"].as_str() == Some("ok") {
                        return Ok(CallToolResult::success(vec![Content::text(format!(
                            "Voice set to: {}",
                            req.voice
                        ))]));
                    }
                    return Ok(CallToolResult::success(vec![Content::text(format!(
                        "Error: {}",
                        data["error"].as_str().unwrap_or("unknown")
                    ))]));
                }
                Ok(CallToolResult::success(vec![Content::text(format!(
                    "Voice set to: {}",
                    req.voice
                ))]))
            }
            Err(e) => Ok(CallToolResult::success(vec![Content::text(format!(
                "Failed to set voice: {e}"
            ))])),
        }
    }
}

#[tool_handler]
impl ServerHandler for AvatarMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Animated avatar control interface. Use avatar_say to speak, avatar_set_emotion for expressions, avatar_status to inspect state.".into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

/// Start the MCP SSE server on the given port (runs in background).
pub async fn start(port: u16, api_port: u16) {
    let addr: SocketAddr = ([127, 0, 0, 1], port).into();

    let config = SseServerConfig {
        bind: addr,
        sse_path: "/sse".to_string(),
        post_path: "/message".to_string(),
        ct: CancellationToken::new(),
        sse_keep_alive: Some(Duration::from_secs(15)),
    };

    match SseServer::serve_with_config(config).await {
        Ok(sse_server) => {
            info!("MCP SSE server listening on http://{addr}/sse");
            sse_server.with_service(move || AvatarMcp::new(api_port));
        }
        Err(e) => {
            warn!("Failed to start MCP server on {addr}: {e}");
        }
    }
}
