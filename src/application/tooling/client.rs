//! Client for one remote tool server.
//!
//! Wraps a [`StdioTransport`], performs the `initialize` handshake, lists
//! and caches tool schemas, and translates them into registry descriptors.

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::error::{RemoteToolError, TransportError};
use super::transport::StdioTransport;
use crate::config::ServerLaunchConfig;
use crate::domain::types::{RemoteOrigin, ToolInfo, ToolParamType, ToolParameter};

pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Tool description as reported by a remote server's `tools/list`.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl RemoteToolSchema {
    /// Translate into a registry descriptor.
    ///
    /// The registered name is prefixed `mcp_<server>_` and the description
    /// `[MCP:<server>] ` so the model can tell remote tools apart.
    /// Parameters come from the schema's `properties`; membership in
    /// `required` sets the required flag. No callback is attached here:
    /// the agent installs the dispatching closure when it registers the
    /// descriptor.
    pub fn to_tool_info(&self, server: &str) -> ToolInfo {
        let mut parameters = Vec::new();
        if let Some(properties) = self.input_schema.get("properties").and_then(Value::as_object)
        {
            let required = self
                .input_schema
                .get("required")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for (param_name, param_schema) in properties {
                let kind = param_schema
                    .get("type")
                    .and_then(Value::as_str)
                    .map(ToolParamType::from_schema_type)
                    .unwrap_or(ToolParamType::String);
                let is_required = required
                    .iter()
                    .any(|entry| entry.as_str() == Some(param_name.as_str()));
                let description = param_schema
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default();

                let mut parameter = ToolParameter::new(param_name.clone(), kind)
                    .describe(description);
                if !is_required {
                    parameter = parameter.optional();
                }
                parameters.push(parameter);
            }
        }

        ToolInfo {
            name: format!("mcp_{server}_{}", self.name),
            description: format!("[MCP:{server}] {}", self.description),
            parameters,
            callback: None,
            atomic: true,
            remote_origin: Some(RemoteOrigin {
                server: server.to_string(),
                tool: self.name.clone(),
            }),
        }
    }
}

pub struct RemoteToolClient {
    name: String,
    transport: StdioTransport,
    server_info: Value,
    cached_tools: Option<Vec<RemoteToolSchema>>,
    last_error: Option<String>,
}

impl RemoteToolClient {
    pub fn new(name: impl Into<String>, config: ServerLaunchConfig) -> Self {
        let name = name.into();
        Self {
            transport: StdioTransport::new(name.clone(), config),
            name,
            server_info: Value::Null,
            cached_tools: None,
            last_error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server_info(&self) -> &Value {
        &self.server_info
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_connected(&mut self) -> bool {
        self.transport.is_connected()
    }

    /// Launch the server and run the `initialize` handshake.
    pub async fn connect(&mut self) -> Result<(), RemoteToolError> {
        self.last_error = None;

        if let Err(err) = self.transport.connect().await {
            self.last_error = Some(err.to_string());
            return Err(err.into());
        }

        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {},
        });
        let response = match self.transport.send_request("initialize", params).await {
            Ok(response) => response,
            Err(err) => {
                self.last_error = Some(err.to_string());
                self.transport.disconnect().await;
                return Err(err.into());
            }
        };

        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            self.last_error = Some(format!("initialization failed: {message}"));
            self.transport.disconnect().await;
            return Err(RemoteToolError::Handshake {
                server: self.name.clone(),
                message,
            });
        }

        self.server_info = response
            .get("result")
            .and_then(|result| result.get("serverInfo"))
            .cloned()
            .unwrap_or_else(|| json!({}));
        info!(server = %self.name, "connected to tool server");
        Ok(())
    }

    /// Stop the server process and drop the cached schemas.
    pub async fn disconnect(&mut self) {
        self.transport.disconnect().await;
        self.cached_tools = None;
    }

    /// Tear down the dead transport and connect again. The launch config is
    /// retained by the transport, so a fresh child is spawned.
    pub async fn reconnect(&mut self) -> Result<(), RemoteToolError> {
        debug!(server = %self.name, "reconnecting to tool server");
        self.disconnect().await;
        self.connect().await
    }

    /// List the server's tools, from cache unless `refresh` is set.
    pub async fn list_tools(
        &mut self,
        refresh: bool,
    ) -> Result<Vec<RemoteToolSchema>, RemoteToolError> {
        if !refresh {
            if let Some(cached) = &self.cached_tools {
                return Ok(cached.clone());
            }
        }

        let response = self.transport.send_request("tools/list", json!({})).await?;
        if response.get("error").is_some() {
            warn!(server = %self.name, "tools/list returned an error");
            return Ok(Vec::new());
        }

        let mut tools = Vec::new();
        if let Some(items) = response
            .get("result")
            .and_then(|result| result.get("tools"))
            .and_then(Value::as_array)
        {
            for item in items {
                tools.push(RemoteToolSchema {
                    name: item
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    description: item
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    input_schema: item.get("inputSchema").cloned().unwrap_or_else(|| json!({})),
                });
            }
        }

        self.cached_tools = Some(tools.clone());
        Ok(tools)
    }

    /// Invoke one tool on the server.
    ///
    /// A JSON-RPC `error` response comes back as `Ok(json!({"error": ...}))`
    /// so the model can reason about it; transport failures are real errors
    /// the caller may retry after a reconnect.
    pub async fn call_tool(
        &mut self,
        tool: &str,
        arguments: Value,
    ) -> Result<Value, RemoteToolError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected {
                server: self.name.clone(),
            }
            .into());
        }

        debug!(server = %self.name, tool, "calling remote tool");
        let response = self
            .transport
            .send_request("tools/call", json!({ "name": tool, "arguments": arguments }))
            .await?;

        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Ok(json!({ "error": message }));
        }

        Ok(response
            .get("result")
            .cloned()
            .unwrap_or_else(|| json!({})))
    }
}
