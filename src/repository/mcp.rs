//! MCP client over stdio
//!
//! Messages are newline-delimited JSON-RPC 2.0. Requests are issued one at a
//! time per session, so the reader simply skips notifications and any
//! message whose id does not match the request in flight.

use super::{McpError, RepositoryFetcher};
use crate::config::McpConfig;
use crate::metrics::METRICS;
use async_trait::async_trait;
use chrono::Utc;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// MCP protocol revision sent during initialization
pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Tool advertised by the server
#[derive(Debug, Clone, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListToolsResult {
    #[serde(default)]
    tools: Vec<ToolInfo>,
    #[serde(default, rename = "nextCursor")]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallToolResult {
    #[serde(default)]
    content: Vec<ToolContent>,
    #[serde(default, rename = "isError")]
    is_error: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ToolContent {
    Text { text: String },
    #[serde(other)]
    Other,
}

/// Join the text parts of a tool result, parsing them as JSON when possible
fn tool_payload(tool: &str, result: CallToolResult) -> Result<Value, McpError> {
    let text = result
        .content
        .into_iter()
        .filter_map(|item| match item {
            ToolContent::Text { text } => Some(text),
            ToolContent::Other => None,
        })
        .collect::<Vec<_>>()
        .join("\n");

    if result.is_error {
        return Err(McpError::Tool {
            tool: tool.to_string(),
            message: text,
        });
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(value) => Ok(value),
        Err(_) => Ok(Value::String(text)),
    }
}

/// JSON-RPC session over any line-oriented byte stream
pub struct McpSession<R, W> {
    reader: R,
    writer: W,
    next_id: u64,
    timeout: Duration,
}

impl<R, W> McpSession<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W, timeout: Duration) -> Self {
        Self {
            reader,
            writer,
            next_id: 1,
            timeout,
        }
    }

    async fn write_message(&mut self, message: &JsonRpcRequest<'_>) -> Result<(), McpError> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn read_response(&mut self, id: u64) -> Result<JsonRpcResponse, McpError> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                return Err(McpError::Transport("Server closed the connection".to_string()));
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let response: JsonRpcResponse = match serde_json::from_str(trimmed) {
                Ok(response) => response,
                Err(e) => {
                    warn!("Ignoring unparseable line from MCP server: {}", e);
                    continue;
                }
            };

            match response.id.as_ref().and_then(Value::as_u64) {
                Some(response_id) if response_id == id => return Ok(response),
                _ => debug!("Skipping MCP message that does not answer request {}", id),
            }
        }
    }

    /// Send a request and wait for its response
    pub async fn request(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, McpError> {
        let id = self.next_id;
        self.next_id += 1;

        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: Some(id),
            method,
            params,
        };

        debug!("MCP request {} ({})", id, method);

        let timeout = self.timeout;
        let response = tokio::time::timeout(timeout, async {
            self.write_message(&request).await?;
            self.read_response(id).await
        })
        .await
        .map_err(|_| McpError::Timeout(method.to_string()))??;

        if let Some(error) = response.error {
            return Err(McpError::Server {
                code: error.code,
                message: error.message,
            });
        }

        response
            .result
            .ok_or_else(|| McpError::Protocol(format!("Missing result in {} response", method)))
    }

    /// Send a notification (no response expected)
    pub async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let notification = JsonRpcRequest {
            jsonrpc: "2.0",
            id: None,
            method,
            params,
        };
        self.write_message(&notification).await
    }

    /// Perform the initialize handshake and return the server's reply
    pub async fn initialize(&mut self) -> Result<Value, McpError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        let result = self.request("initialize", Some(params)).await?;
        self.notify("notifications/initialized", None).await?;
        Ok(result)
    }

    /// List every tool, following pagination cursors
    pub async fn list_tools(&mut self) -> Result<Vec<ToolInfo>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = self.request("tools/list", params).await?;
            let page: ListToolsResult = serde_json::from_value(result)
                .map_err(|e| McpError::Protocol(format!("Invalid tools/list result: {}", e)))?;

            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(tools)
    }

    /// Call a tool and return its payload
    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<Value, McpError> {
        debug!("Calling MCP tool {} with {}", name, arguments);

        let result = self
            .request("tools/call", Some(json!({ "name": name, "arguments": arguments })))
            .await?;
        let result: CallToolResult = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("Invalid tools/call result: {}", e)))?;

        tool_payload(name, result)
    }
}

/// MCP server child process with an initialized session
pub struct McpClient {
    child: Child,
    session: McpSession<BufReader<ChildStdout>, ChildStdin>,
    tools: Vec<ToolInfo>,
}

impl McpClient {
    /// Start the server, perform the handshake and list its tools
    pub async fn spawn(config: &McpConfig) -> Result<Self, McpError> {
        info!("Starting MCP server: {} {}", config.command, config.args.join(" "));

        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        if let Some(ref token) = config.github_token {
            command.env("GITHUB_PERSONAL_ACCESS_TOKEN", token.expose_secret());
        }

        let mut child = command
            .spawn()
            .map_err(|e| {
                McpError::Transport(format!("Failed to spawn {}: {}", config.command, e))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Transport("Failed to capture stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Transport("Failed to capture stdout".to_string()))?;

        let mut session = McpSession::new(BufReader::new(stdout), stdin, config.timeout());
        session.initialize().await?;
        let tools = session.list_tools().await?;

        info!("MCP client initialized with {} tools", tools.len());

        Ok(Self {
            child,
            session,
            tools,
        })
    }

    pub fn tools(&self) -> &[ToolInfo] {
        &self.tools
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }

    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<Value, McpError> {
        if !self.has_tool(name) {
            warn!("Tool {} was not advertised by the MCP server", name);
        }
        self.session.call_tool(name, arguments).await
    }

    /// Close stdin and stop the server
    pub async fn close(mut self) {
        let _ = self.session.writer.shutdown().await;
        if let Err(e) = self.child.kill().await {
            debug!("MCP server already exited: {}", e);
        }
    }
}

/// Arguments for the metadata tool
fn info_arguments(tool: &str, owner: &str, name: &str) -> Value {
    if tool == "search_repositories" {
        json!({ "query": format!("repo:{}/{}", owner, name) })
    } else {
        json!({ "owner": owner, "repo": name })
    }
}

/// Repository fetcher backed by a lazily started MCP server
pub struct McpRepositoryFetcher {
    config: McpConfig,
    client: Mutex<Option<McpClient>>,
}

impl McpRepositoryFetcher {
    pub fn new(config: McpConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
        }
    }

    async fn fetch_with(
        &self,
        client: &mut McpClient,
        owner: &str,
        name: &str,
    ) -> Result<Value, McpError> {
        let repository = client
            .call_tool(&self.config.info_tool, info_arguments(&self.config.info_tool, owner, name))
            .await?;
        let structure = client
            .call_tool(
                &self.config.listing_tool,
                json!({ "owner": owner, "repo": name, "path": "" }),
            )
            .await?;

        Ok(json!({
            "repository": repository,
            "structure": structure,
            "fetched_at": Utc::now().to_rfc3339(),
        }))
    }
}

#[async_trait]
impl RepositoryFetcher for McpRepositoryFetcher {
    async fn fetch_structure(&self, owner: &str, name: &str) -> Result<Value, McpError> {
        info!("Fetching repository structure for {}/{}", owner, name);

        let mut guard = self.client.lock().await;
        if guard.is_none() {
            match McpClient::spawn(&self.config).await {
                Ok(client) => *guard = Some(client),
                Err(e) => {
                    METRICS.record_fetch(false);
                    return Err(e);
                }
            }
        }

        let result = match guard.as_mut() {
            Some(client) => self.fetch_with(client, owner, name).await,
            None => Err(McpError::Transport("MCP client not connected".to_string())),
        };

        if let Err(ref e) = result {
            if e.is_connection_error() {
                warn!("Dropping MCP connection after error: {}", e);
                if let Some(client) = guard.take() {
                    client.close().await;
                }
            }
        }

        METRICS.record_fetch(result.is_ok());
        result
    }

    async fn close(&self) {
        if let Some(client) = self.client.lock().await.take() {
            client.close().await;
        }
    }
}
