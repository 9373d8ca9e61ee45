mod zotero;

use serde::{Deserialize, Serialize};

// Re-export types needed by tool handlers
pub use super::{JsonRpcError, Tool};

// MCP Protocol types for tools
#[derive(Debug, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ServerCapabilities {
    pub tools: Option<ToolsCapability>,
}

#[derive(Debug, Serialize)]
pub struct ToolsCapability {}

#[derive(Debug, Serialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

#[derive(Debug, Serialize)]
pub struct ToolsList {
    pub tools: Vec<Tool>,
}

#[derive(Debug, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    pub arguments: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct CallToolResult {
    pub content: Vec<Content>,
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum Content {
    #[serde(rename = "text")]
    Text { text: String },
}

pub fn handle_initialize() -> Result<serde_json::Value, JsonRpcError> {
    let result = InitializeResult {
        protocol_version: "2024-11-05".to_string(),
        capabilities: ServerCapabilities {
            tools: Some(ToolsCapability {}),
        },
        server_info: ServerInfo {
            name: "zotero-mcp".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    };

    serde_json::to_value(result).map_err(|e| JsonRpcError {
        code: -32603,
        message: format!("Internal error: {e}"),
        data: None,
    })
}

pub fn handle_tools_list() -> Result<serde_json::Value, JsonRpcError> {
    let tools = vec![
        Tool {
            name: "zotero_search_items".to_string(),
            description: "Search and list items in the personal Zotero library. A query that is exactly a DOI or an arXiv identifier (id, abs URL, or pdf URL) is narrowed to an exact match on that identifier. Results include total count and, for paged results, the next_start offset. Requires ZOTERO_API_KEY and ZOTERO_USER_ID environment variables.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "query": {
                        "type": "string",
                        "minLength": 1,
                        "description": "Search text, DOI, or arXiv identifier"
                    },
                    "limit": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": 100,
                        "default": 25,
                        "description": "Maximum number of results per page"
                    },
                    "sort": {
                        "type": "string",
                        "default": "relevance",
                        "description": "Sort key; falls back to dateModified if the upstream rejects it (reported via sort_used)"
                    },
                    "start": {
                        "type": "integer",
                        "minimum": 0,
                        "default": 0,
                        "description": "Result offset for pagination"
                    },
                    "offset": {
                        "type": "integer",
                        "minimum": 0,
                        "description": "Alias of start; provide at most one of the two"
                    },
                    "tags": {
                        "type": "array",
                        "items": {"type": "string", "minLength": 1},
                        "uniqueItems": true,
                        "description": "Restrict results to items carrying every listed tag"
                    }
                },
                "required": ["query"]
            }),
        },
        Tool {
            name: "zotero_get_item".to_string(),
            description: "Fetch metadata for a single item in the personal Zotero library, including its child attachments.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "item_key": {
                        "type": "string",
                        "minLength": 1,
                        "description": "Key of the item to fetch"
                    }
                },
                "required": ["item_key"]
            }),
        },
        Tool {
            name: "zotero_create_item".to_string(),
            description: "Create a new item in the personal Zotero library. The item-type template is fetched from the API and the provided fields are merged over it.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "item_type": {
                        "type": "string",
                        "minLength": 1,
                        "description": "Zotero item type (e.g. journalArticle, book, report)"
                    },
                    "title": {"type": "string", "minLength": 1},
                    "creators": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "additionalProperties": false,
                            "properties": {
                                "creator_type": {"type": "string", "minLength": 1},
                                "name": {"type": "string", "minLength": 1},
                                "first_name": {"type": "string", "minLength": 1},
                                "last_name": {"type": "string", "minLength": 1}
                            },
                            "required": ["creator_type"]
                        }
                    },
                    "date": {"type": "string"},
                    "doi": {"type": "string"},
                    "url": {"type": "string"},
                    "abstract": {"type": "string"},
                    "tags": {
                        "type": "array",
                        "items": {"type": "string", "minLength": 1},
                        "uniqueItems": true
                    },
                    "extra": {"type": "string"}
                },
                "required": ["item_type", "title"]
            }),
        },
        Tool {
            name: "zotero_list_collections".to_string(),
            description: "List collections in the personal Zotero library with pagination.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "limit": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": 100,
                        "default": 25
                    },
                    "start": {"type": "integer", "minimum": 0, "default": 0}
                }
            }),
        },
        Tool {
            name: "zotero_add_item_to_collection".to_string(),
            description: "Add an item to a collection by collection key or name. Names are resolved case-insensitively across every collections page; an ambiguous name is rejected with the candidate keys.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "item_key": {"type": "string", "minLength": 1},
                    "collection_key": {"type": "string", "minLength": 1},
                    "collection_name": {"type": "string", "minLength": 1}
                },
                "required": ["item_key"]
            }),
        },
        Tool {
            name: "zotero_upload_attachment".to_string(),
            description: "Upload a file attachment and link it to an existing item. Provide exactly one byte source: a local file path, a remote URL (fetched with bounded retries), or inline base64 bytes with an explicit filename. Content type is inferred when omitted. On partial failure after the attachment item was created, the error details include the attachment_key.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "item_key": {"type": "string", "minLength": 1},
                    "file_path": {"type": "string", "minLength": 1},
                    "file_url": {"type": "string", "minLength": 1},
                    "file_bytes_base64": {"type": "string", "minLength": 1},
                    "filename": {"type": "string", "minLength": 1},
                    "title": {"type": "string"},
                    "content_type": {"type": "string"}
                },
                "required": ["item_key"],
                "anyOf": [
                    {"required": ["item_key", "file_path"]},
                    {"required": ["item_key", "file_url"]},
                    {"required": ["item_key", "file_bytes_base64", "filename"]}
                ]
            }),
        },
        Tool {
            name: "zotero_attach_arxiv_pdf".to_string(),
            description: "Resolve an arXiv identifier (or abs/pdf URL) to its canonical PDF, fetch it, and attach it to an existing item using the same upload protocol as zotero_upload_attachment.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "item_key": {"type": "string", "minLength": 1},
                    "arxiv_id": {"type": "string", "minLength": 1},
                    "title": {"type": "string"}
                },
                "required": ["item_key", "arxiv_id"]
            }),
        },
        Tool {
            name: "zotero_get_sort_values".to_string(),
            description: "Return the server's known Zotero sort values together with the default and the fallback applied when a sort key is rejected.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {}
            }),
        },
    ];

    let result = ToolsList { tools };

    serde_json::to_value(result).map_err(|e| JsonRpcError {
        code: -32603,
        message: format!("Internal error: {e}"),
        data: None,
    })
}

pub async fn handle_tools_call(
    params: Option<serde_json::Value>,
    state: &super::ServerState,
) -> Result<serde_json::Value, JsonRpcError> {
    let params: CallToolParams = serde_json::from_value(params.unwrap_or(serde_json::Value::Null))
        .map_err(|e| JsonRpcError {
            code: -32602,
            message: format!("Invalid params: {e}"),
            data: None,
        })?;

    match params.name.as_str() {
        "zotero_search_items" => zotero::handle_search_items(params.arguments, state).await,
        "zotero_get_item" => zotero::handle_get_item(params.arguments, state).await,
        "zotero_create_item" => zotero::handle_create_item(params.arguments, state).await,
        "zotero_list_collections" => zotero::handle_list_collections(params.arguments, state).await,
        "zotero_add_item_to_collection" => {
            zotero::handle_add_item_to_collection(params.arguments, state).await
        }
        "zotero_upload_attachment" => {
            zotero::handle_upload_attachment(params.arguments, state).await
        }
        "zotero_attach_arxiv_pdf" => zotero::handle_attach_arxiv_pdf(params.arguments, state).await,
        "zotero_get_sort_values" => zotero::handle_get_sort_values(params.arguments, state).await,
        _ => Err(JsonRpcError {
            code: -32602,
            message: format!("Unknown tool: {}", params.name),
            data: None,
        }),
    }
}
