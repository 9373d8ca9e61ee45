mod cli;
mod sse;
mod stdio;
mod tools;

pub use cli::App;

use crate::prelude::*;
use crate::zotero::ZoteroClient;
use serde::{Deserialize, Serialize};
use zotero_mcp_core::error::ZoteroError;

// JSON-RPC 2.0 types
#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    id: Option<serde_json::Value>,
    method: String,
    params: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    jsonrpc: String,
    id: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

// MCP Protocol types
#[derive(Debug, Serialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// Process-lifetime server state: the CLI globals plus the one shared
/// upstream client every tool call executes through.
///
/// Construction failure (missing credentials) is kept, not raised, so the
/// server still starts and each call simply reports the auth error.
pub struct ServerState {
    pub global: crate::Global,
    client: Result<ZoteroClient, ZoteroError>,
}

impl ServerState {
    pub fn from_env(global: crate::Global) -> Self {
        Self {
            global,
            client: ZoteroClient::from_env(),
        }
    }

    pub(crate) fn client(&self) -> Result<&ZoteroClient, ZoteroError> {
        self.client.as_ref().map_err(Clone::clone)
    }

    #[cfg(test)]
    pub(crate) fn for_tests(
        global: crate::Global,
        client: Result<ZoteroClient, ZoteroError>,
    ) -> Self {
        Self { global, client }
    }
}

pub async fn run(app: App, global: crate::Global) -> Result<()> {
    let state = ServerState::from_env(global);
    match app.command {
        cli::Commands::Stdio => stdio::run_stdio(state).await,
        cli::Commands::Sse(options) => sse::run_sse(options, state).await,
    }
}

pub async fn handle_request(request_str: &str, state: &ServerState) -> JsonRpcResponse {
    let request: JsonRpcRequest = match serde_json::from_str(request_str) {
        Ok(req) => req,
        Err(e) => {
            return JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                id: None,
                result: None,
                error: Some(JsonRpcError {
                    code: -32700,
                    message: format!("Parse error: {e}"),
                    data: None,
                }),
            };
        }
    };

    let result = match request.method.as_str() {
        "initialize" => tools::handle_initialize(),
        "tools/list" => tools::handle_tools_list(),
        "tools/call" => tools::handle_tools_call(request.params, state).await,
        method => Err(JsonRpcError {
            code: -32601,
            message: format!("Method not found: {method}"),
            data: None,
        }),
    };

    match result {
        Ok(value) => JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: request.id,
            result: Some(value),
            error: None,
        },
        Err(error) => JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: request.id,
            result: None,
            error: Some(error),
        },
    }
}
