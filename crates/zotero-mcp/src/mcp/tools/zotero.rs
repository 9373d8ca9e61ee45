use crate::prelude::eprintln;
use serde::Deserialize;

use zotero_mcp_core::error::ZoteroError;
use zotero_mcp_core::events::ClientEvent;
use zotero_mcp_core::items::{CreateItemInput, CreatorOutput};
use zotero_mcp_core::search::{DEFAULT_SORT, FALLBACK_SORT, KNOWN_SORT_VALUES};

use super::super::ServerState;
use super::{CallToolResult, Content, JsonRpcError};
use crate::zotero::attachment::UploadRequest;
use crate::zotero::search::SearchParams;
use crate::zotero::{self, CallContext};

fn parse_args<T: serde::de::DeserializeOwned>(
    arguments: Option<serde_json::Value>,
) -> Result<T, JsonRpcError> {
    serde_json::from_value(arguments.unwrap_or(serde_json::Value::Null)).map_err(|e| {
        JsonRpcError {
            code: -32602,
            message: format!("Invalid arguments: {e}"),
            data: None,
        }
    })
}

fn internal(e: serde_json::Error) -> JsonRpcError {
    JsonRpcError {
        code: -32603,
        message: format!("Internal error: {e}"),
        data: None,
    }
}

/// Wrap a data-function outcome into the documented `{ok, data, error}`
/// envelope inside the MCP tool-result shape, emitting the completion
/// event either way. Every error code is the 1:1 mapping of the
/// normalized error kind.
fn respond<T: serde::Serialize>(
    ctx: &CallContext,
    tool: &str,
    outcome: Result<T, ZoteroError>,
) -> Result<serde_json::Value, JsonRpcError> {
    let (envelope, failed) = match outcome {
        Ok(data) => {
            let data = serde_json::to_value(data).map_err(internal)?;
            ClientEvent::ToolCompleted {
                correlation_id: &ctx.correlation_id,
                tool,
                ok: true,
                code: None,
                duration_ms: ctx.elapsed_ms(),
            }
            .emit();
            (
                serde_json::json!({"ok": true, "data": data, "error": null}),
                false,
            )
        }
        Err(error) => {
            ClientEvent::ToolCompleted {
                correlation_id: &ctx.correlation_id,
                tool,
                ok: false,
                code: Some(error.kind.code()),
                duration_ms: ctx.elapsed_ms(),
            }
            .emit();
            (
                serde_json::json!({
                    "ok": false,
                    "data": null,
                    "error": {
                        "code": error.kind.code(),
                        "message": error.message,
                        "details": error.details_json(),
                    }
                }),
                true,
            )
        }
    };

    let text = serde_json::to_string_pretty(&envelope).map_err(internal)?;
    let result = CallToolResult {
        content: vec![Content::Text { text }],
        is_error: failed.then_some(true),
    };
    serde_json::to_value(result).map_err(internal)
}

fn begin(tool: &str) -> CallContext {
    let ctx = CallContext::new();
    ClientEvent::ToolCall {
        correlation_id: &ctx.correlation_id,
        tool,
    }
    .emit();
    ctx
}

/// Handle the item search tool via MCP
pub async fn handle_search_items(
    arguments: Option<serde_json::Value>,
    state: &ServerState,
) -> Result<serde_json::Value, JsonRpcError> {
    #[derive(Deserialize)]
    struct SearchArgs {
        query: String,
        limit: Option<u64>,
        sort: Option<String>,
        start: Option<u64>,
        offset: Option<u64>,
        tags: Option<Vec<String>>,
    }

    let args: SearchArgs = parse_args(arguments)?;
    let ctx = begin("zotero_search_items");

    if state.global.verbose {
        eprintln!(
            "Calling zotero_search_items: query={}, limit={:?}",
            args.query, args.limit
        );
    }

    let outcome = async {
        let client = state.client()?;
        let params = SearchParams::validate(
            &args.query,
            args.limit,
            args.sort.as_deref(),
            args.start,
            args.offset,
            args.tags,
        )?;
        zotero::search_items_data(client, &ctx, params).await
    }
    .await;

    respond(&ctx, "zotero_search_items", outcome)
}

/// Handle the single-item fetch tool via MCP
pub async fn handle_get_item(
    arguments: Option<serde_json::Value>,
    state: &ServerState,
) -> Result<serde_json::Value, JsonRpcError> {
    #[derive(Deserialize)]
    struct GetArgs {
        item_key: String,
    }

    let args: GetArgs = parse_args(arguments)?;
    let ctx = begin("zotero_get_item");

    let outcome = async {
        let client = state.client()?;
        let item = zotero::get_item_data(client, &ctx, &args.item_key).await?;
        Ok(serde_json::json!({ "item": item }))
    }
    .await;

    respond(&ctx, "zotero_get_item", outcome)
}

/// Handle the item creation tool via MCP
pub async fn handle_create_item(
    arguments: Option<serde_json::Value>,
    state: &ServerState,
) -> Result<serde_json::Value, JsonRpcError> {
    #[derive(Deserialize)]
    struct CreateArgs {
        item_type: String,
        title: String,
        creators: Option<Vec<CreatorOutput>>,
        date: Option<String>,
        doi: Option<String>,
        url: Option<String>,
        #[serde(rename = "abstract")]
        abstract_note: Option<String>,
        tags: Option<Vec<String>>,
        extra: Option<String>,
    }

    let args: CreateArgs = parse_args(arguments)?;
    let ctx = begin("zotero_create_item");

    let input = CreateItemInput {
        item_type: args.item_type,
        title: args.title,
        creators: args.creators.unwrap_or_default(),
        date: args.date,
        doi: args.doi,
        url: args.url,
        abstract_note: args.abstract_note,
        tags: args.tags.unwrap_or_default(),
        extra: args.extra,
    };

    let outcome = async {
        let client = state.client()?;
        zotero::create_item_data(client, &ctx, input).await
    }
    .await;

    respond(&ctx, "zotero_create_item", outcome)
}

/// Handle the collection listing tool via MCP
pub async fn handle_list_collections(
    arguments: Option<serde_json::Value>,
    state: &ServerState,
) -> Result<serde_json::Value, JsonRpcError> {
    #[derive(Deserialize, Default)]
    #[serde(default)]
    struct ListArgs {
        limit: Option<u64>,
        start: Option<u64>,
    }

    let args: ListArgs = match arguments {
        Some(value) if !value.is_null() => parse_args(Some(value))?,
        _ => ListArgs::default(),
    };
    let ctx = begin("zotero_list_collections");

    let outcome = async {
        let client = state.client()?;
        zotero::list_collections_data(
            client,
            &ctx,
            args.limit.unwrap_or(25),
            args.start.unwrap_or(0),
        )
        .await
    }
    .await;

    respond(&ctx, "zotero_list_collections", outcome)
}

/// Handle the add-to-collection tool via MCP
pub async fn handle_add_item_to_collection(
    arguments: Option<serde_json::Value>,
    state: &ServerState,
) -> Result<serde_json::Value, JsonRpcError> {
    #[derive(Deserialize)]
    struct AddArgs {
        item_key: String,
        collection_key: Option<String>,
        collection_name: Option<String>,
    }

    let args: AddArgs = parse_args(arguments)?;
    let ctx = begin("zotero_add_item_to_collection");

    let outcome = async {
        let client = state.client()?;
        zotero::add_item_to_collection_data(
            client,
            &ctx,
            &args.item_key,
            args.collection_key.as_deref(),
            args.collection_name.as_deref(),
        )
        .await
    }
    .await;

    respond(&ctx, "zotero_add_item_to_collection", outcome)
}

/// Handle the attachment upload tool via MCP
pub async fn handle_upload_attachment(
    arguments: Option<serde_json::Value>,
    state: &ServerState,
) -> Result<serde_json::Value, JsonRpcError> {
    #[derive(Deserialize)]
    struct UploadArgs {
        item_key: String,
        file_path: Option<String>,
        file_url: Option<String>,
        file_bytes_base64: Option<String>,
        filename: Option<String>,
        title: Option<String>,
        content_type: Option<String>,
    }

    let args: UploadArgs = parse_args(arguments)?;
    let ctx = begin("zotero_upload_attachment");

    if state.global.verbose {
        eprintln!(
            "Calling zotero_upload_attachment: item_key={}, source={}",
            args.item_key,
            if args.file_path.is_some() {
                "file_path"
            } else if args.file_url.is_some() {
                "file_url"
            } else {
                "file_bytes_base64"
            }
        );
    }

    let request = UploadRequest {
        item_key: args.item_key,
        file_path: args.file_path,
        file_url: args.file_url,
        file_bytes_base64: args.file_bytes_base64,
        filename: args.filename,
        title: args.title,
        content_type: args.content_type,
    };

    let outcome = async {
        let client = state.client()?;
        zotero::upload_attachment_data(client, &ctx, request).await
    }
    .await;

    respond(&ctx, "zotero_upload_attachment", outcome)
}

/// Handle the arXiv PDF attach tool via MCP
pub async fn handle_attach_arxiv_pdf(
    arguments: Option<serde_json::Value>,
    state: &ServerState,
) -> Result<serde_json::Value, JsonRpcError> {
    #[derive(Deserialize)]
    struct ArxivArgs {
        item_key: String,
        arxiv_id: String,
        title: Option<String>,
    }

    let args: ArxivArgs = parse_args(arguments)?;
    let ctx = begin("zotero_attach_arxiv_pdf");

    let outcome = async {
        let client = state.client()?;
        zotero::attach_arxiv_pdf_data(
            client,
            &ctx,
            &args.item_key,
            &args.arxiv_id,
            args.title.as_deref(),
        )
        .await
    }
    .await;

    respond(&ctx, "zotero_attach_arxiv_pdf", outcome)
}

/// Handle the sort-values tool via MCP
pub async fn handle_get_sort_values(
    _arguments: Option<serde_json::Value>,
    _state: &ServerState,
) -> Result<serde_json::Value, JsonRpcError> {
    let ctx = begin("zotero_get_sort_values");

    let outcome: Result<serde_json::Value, ZoteroError> = Ok(serde_json::json!({
        "values": KNOWN_SORT_VALUES,
        "default": DEFAULT_SORT,
        "fallback": FALLBACK_SORT,
    }));

    respond(&ctx, "zotero_get_sort_values", outcome)
}
