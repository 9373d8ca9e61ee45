use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use serde::Serialize;

use zotero_mcp_core::error::ZoteroError;
use zotero_mcp_core::events::ClientEvent;
use zotero_mcp_core::items::{coerce_template, extract_created_key};
use zotero_mcp_core::search::{build_arxiv_pdf_url, normalize_arxiv_id};
use zotero_mcp_core::upload::{
    check_upload_size, filename_from_content_disposition, filename_from_url, infer_content_type,
    md5_hex, parse_upload_authorization, validate_source_count, UploadAuthorization, UploadState,
};

use crate::prelude::{println, *};
use crate::zotero::client::ZoteroClient;
use crate::zotero::transport::RequestSpec;
use crate::zotero::{encode_path, CallContext};

/// Attachment subcommands
#[derive(Debug, clap::Subcommand)]
pub enum AttachmentCommands {
    /// Upload a file and attach it to an existing item
    #[clap(name = "upload")]
    Upload {
        /// Parent item key
        item_key: String,

        /// Local file to upload
        #[arg(long)]
        file_path: Option<PathBuf>,

        /// Remote file to fetch and upload
        #[arg(long)]
        file_url: Option<String>,

        /// Inline base64 payload (requires --filename)
        #[arg(long)]
        file_bytes_base64: Option<String>,

        /// Attachment filename
        #[arg(long)]
        filename: Option<String>,

        /// Attachment title (defaults to the filename)
        #[arg(long)]
        title: Option<String>,

        /// Content type (inferred from the filename when omitted)
        #[arg(long)]
        content_type: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Fetch an arXiv PDF and attach it to an existing item
    #[clap(name = "arxiv")]
    Arxiv {
        /// Parent item key
        item_key: String,

        /// arXiv identifier, abs URL, or pdf URL
        arxiv_id: String,

        /// Attachment title (defaults to the filename)
        #[arg(long)]
        title: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// One attachment upload as requested by a tool caller. Exactly one byte
/// source must be set.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub item_key: String,
    pub file_path: Option<String>,
    pub file_url: Option<String>,
    pub file_bytes_base64: Option<String>,
    pub filename: Option<String>,
    pub title: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct UploadOutput {
    pub attachment_key: String,
    pub parent_item_key: String,
    pub title: String,
    pub content_type: String,
    pub size: u64,
    pub version: u64,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ArxivOutput {
    #[serde(flatten)]
    pub upload: UploadOutput,
    pub arxiv_id: String,
    pub pdf_url: String,
}

/// Bytes plus the metadata resolved alongside them, gathered before the
/// upload protocol starts.
struct ResolvedSource {
    bytes: Vec<u8>,
    filename: Option<String>,
    content_type: Option<String>,
    mtime_secs: u64,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

fn validate_http_url(url: &str) -> Result<(), ZoteroError> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| ZoteroError::validation("file_url must be http or https."))?;
    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    if host.is_empty() {
        return Err(ZoteroError::validation("file_url must include a host."));
    }
    Ok(())
}

/// Gather the attachment bytes from whichever source was provided. A remote
/// URL performs its own bounded-retry fetch here, before the protocol's
/// first step.
async fn resolve_source(
    client: &ZoteroClient,
    ctx: &CallContext,
    request: &UploadRequest,
) -> Result<ResolvedSource, ZoteroError> {
    let file_path = request.file_path.as_deref().map(str::trim).filter(|p| !p.is_empty());
    let file_url = request.file_url.as_deref().map(str::trim).filter(|u| !u.is_empty());
    let file_bytes = request.file_bytes_base64.as_deref().map(str::trim).filter(|b| !b.is_empty());
    validate_source_count(file_path.is_some(), file_url.is_some(), file_bytes.is_some())?;
    let max_bytes = client.upload_max_bytes();

    if let Some(path) = file_path {
        let metadata = tokio::fs::metadata(path).await.map_err(|_| {
            ZoteroError::validation("file_path does not exist or is not readable.")
        })?;
        if !metadata.is_file() {
            return Err(ZoteroError::validation(
                "file_path must point to a local file.",
            ));
        }
        check_upload_size(metadata.len(), max_bytes, "file_path")?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|_| ZoteroError::validation("file_path is not readable."))?;
        let mtime_secs = metadata
            .modified()
            .ok()
            .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_else(now_secs);
        let filename = std::path::Path::new(path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        return Ok(ResolvedSource {
            bytes,
            filename,
            content_type: None,
            mtime_secs,
        });
    }

    if let Some(url) = file_url {
        validate_http_url(url)?;
        let response = client
            .execute(client.external_get(url.to_string()), ctx, false)
            .await?;
        check_upload_size(response.body.len() as u64, max_bytes, "file_url")?;
        let filename = request
            .filename
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .or_else(|| {
                response
                    .headers
                    .get("content-disposition")
                    .and_then(|value| filename_from_content_disposition(value))
            })
            .or_else(|| filename_from_url(url));
        let content_type = response
            .headers
            .get("content-type")
            .and_then(|value| value.split(';').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        return Ok(ResolvedSource {
            bytes: response.body,
            filename,
            content_type,
            mtime_secs: now_secs(),
        });
    }

    let Some(encoded) = file_bytes else {
        return Err(ZoteroError::validation(
            "Provide exactly one of file_path, file_url, or file_bytes_base64.",
        ));
    };
    let filename = request
        .filename
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            ZoteroError::validation("filename is required when using file_bytes_base64.")
        })?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| ZoteroError::validation("file_bytes_base64 must be valid base64."))?;
    check_upload_size(bytes.len() as u64, max_bytes, "file_bytes")?;
    Ok(ResolvedSource {
        bytes,
        filename: Some(filename.to_string()),
        content_type: None,
        mtime_secs: now_secs(),
    })
}

fn advance_step(
    from: UploadState,
    to: UploadState,
    ctx: &CallContext,
) -> Result<UploadState, ZoteroError> {
    let next = from.advance(to)?;
    ClientEvent::UploadStep {
        correlation_id: &ctx.correlation_id,
        from_state: from.label(),
        to_state: to.label(),
    }
    .emit();
    Ok(next)
}

/// Public data function - used by both CLI and MCP.
///
/// Drives the full attachment protocol: template fetch, child-item
/// creation, upload authorization, binary transfer, registration. A failure
/// after the child item exists reports the created attachment key so the
/// caller can reconcile; the partially created item is left in place.
pub async fn upload_attachment_data(
    client: &ZoteroClient,
    ctx: &CallContext,
    request: UploadRequest,
) -> Result<UploadOutput, ZoteroError> {
    let item_key = request.item_key.trim().to_string();
    if item_key.is_empty() {
        return Err(ZoteroError::validation(
            "item_key is required and must be a non-empty string.",
        ));
    }

    let source = resolve_source(client, ctx, &request).await?;

    let filename = source
        .filename
        .clone()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "attachment".to_string());
    let title = request
        .title
        .as_deref()
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| filename.clone());
    let content_type = request
        .content_type
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or(source.content_type.clone())
        .unwrap_or_else(|| infer_content_type(&filename).to_string());

    let checksum = md5_hex(&source.bytes);
    let size = source.bytes.len() as u64;
    let mut state = UploadState::Init;

    // Template fetch: a cacheable read defining the child item's shape.
    let template_url = client.api_url("/items/new");
    let template_query = [
        ("itemType", "attachment".to_string()),
        ("linkMode", "imported_file".to_string()),
    ];
    let (template_value, _headers) = client
        .execute_json(client.api_get(template_url, &template_query), ctx, true)
        .await?;
    let mut template = coerce_template(template_value)?;
    state = advance_step(state, UploadState::TemplateFetched, ctx)?;

    template.insert("parentItem".into(), item_key.clone().into());
    template.insert("linkMode".into(), "imported_file".into());
    template.insert("title".into(), title.clone().into());
    template.insert("filename".into(), filename.clone().into());
    template.insert("contentType".into(), content_type.clone().into());

    // Child item creation: the only step that mints upstream state.
    let create_url = client.users_url("items");
    let body = serde_json::Value::Array(vec![serde_json::Value::Object(template)]);
    let (created, _headers) = client
        .execute_json(client.api_post(create_url, body), ctx, false)
        .await?;
    let (attachment_key, version) = extract_created_key(&created)?;
    state = advance_step(state, UploadState::ChildItemCreated, ctx)?;

    // From here on every failure carries the created attachment key.
    let tag = |error: ZoteroError| error.with_detail("attachment_key", attachment_key.clone());

    let file_url = client.users_url(&format!("items/{}/file", encode_path(&attachment_key)));
    let auth_body = serde_json::json!({
        "md5": checksum,
        "filename": filename,
        "filesize": size,
        "mtime": source.mtime_secs,
    });
    let (auth_payload, _headers) = client
        .execute_json(client.api_post(file_url.clone(), auth_body), ctx, false)
        .await
        .map_err(tag)?;
    let authorization = parse_upload_authorization(&auth_payload).map_err(tag)?;
    state = advance_step(state, UploadState::UploadAuthorized, ctx)?;

    match authorization {
        UploadAuthorization::Exists => {
            // Exact-match short-circuit: no new bytes need to move.
            state = advance_step(state, UploadState::Registered, ctx)?;
        }
        UploadAuthorization::Fresh(target) => {
            let mut payload =
                Vec::with_capacity(target.prefix.len() + source.bytes.len() + target.suffix.len());
            payload.extend_from_slice(target.prefix.as_bytes());
            payload.extend_from_slice(&source.bytes);
            payload.extend_from_slice(target.suffix.as_bytes());
            let spec = RequestSpec::post_bytes(target.url, payload, target.content_type);
            client.execute_transfer(spec, ctx).await.map_err(tag)?;
            state = advance_step(state, UploadState::BytesTransferred, ctx)?;

            let register_body = serde_json::json!({ "uploadKey": target.upload_key });
            client
                .execute_json(client.api_post(file_url, register_body), ctx, false)
                .await
                .map_err(tag)?;
            state = advance_step(state, UploadState::Registered, ctx)?;
        }
    }
    debug_assert_eq!(state, UploadState::Registered);

    Ok(UploadOutput {
        attachment_key,
        parent_item_key: item_key,
        title,
        content_type,
        size,
        version,
    })
}

/// Public data function - used by both CLI and MCP.
///
/// Resolves the identifier to the canonical PDF URL, fetches it (bounded
/// retry, size ceiling, PDF sniffing), then runs the same upload protocol.
pub async fn attach_arxiv_pdf_data(
    client: &ZoteroClient,
    ctx: &CallContext,
    item_key: &str,
    arxiv_id: &str,
    title: Option<&str>,
) -> Result<ArxivOutput, ZoteroError> {
    let item_key = item_key.trim();
    if item_key.is_empty() {
        return Err(ZoteroError::validation(
            "item_key is required and must be a non-empty string.",
        ));
    }
    let arxiv_id = normalize_arxiv_id(arxiv_id)?;
    let pdf_url = build_arxiv_pdf_url(&arxiv_id);

    let response = client
        .execute(client.external_get(pdf_url.clone()), ctx, false)
        .await?;
    if response.body.is_empty() {
        return Err(ZoteroError::upstream("Empty arXiv PDF response."));
    }
    let content_type = response
        .headers
        .get("content-type")
        .cloned()
        .unwrap_or_default();
    if !content_type.to_lowercase().contains("pdf") && !response.body.starts_with(b"%PDF") {
        return Err(ZoteroError::upstream("arXiv response was not a PDF.")
            .with_detail("content_type", content_type));
    }
    check_upload_size(
        response.body.len() as u64,
        client.upload_max_bytes(),
        "arXiv PDF",
    )?;

    let filename = format!("{}.pdf", arxiv_id.canonical().replace('/', "_"));
    let request = UploadRequest {
        item_key: item_key.to_string(),
        file_bytes_base64: Some(
            base64::engine::general_purpose::STANDARD.encode(&response.body),
        ),
        filename: Some(filename),
        title: title.map(str::to_string),
        content_type: Some("application/pdf".to_string()),
        ..UploadRequest::default()
    };
    let upload = upload_attachment_data(client, ctx, request).await?;

    Ok(ArxivOutput {
        upload,
        arxiv_id: arxiv_id.canonical(),
        pdf_url,
    })
}

/// Handle attachment subcommands.
pub async fn handler(client: &ZoteroClient, cmd: AttachmentCommands) -> Result<()> {
    match cmd {
        AttachmentCommands::Upload {
            item_key,
            file_path,
            file_url,
            file_bytes_base64,
            filename,
            title,
            content_type,
            json,
        } => {
            let request = UploadRequest {
                item_key,
                file_path: file_path.map(|path| path.to_string_lossy().into_owned()),
                file_url,
                file_bytes_base64,
                filename,
                title,
                content_type,
            };
            let ctx = CallContext::new();
            let output = upload_attachment_data(client, &ctx, request).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!(
                    "Attached {} to {} ({}, {} bytes)",
                    output.title, output.parent_item_key, output.content_type, output.size
                );
            }
        }

        AttachmentCommands::Arxiv {
            item_key,
            arxiv_id,
            title,
            json,
        } => {
            let ctx = CallContext::new();
            let output = attach_arxiv_pdf_data(client, &ctx, &item_key, &arxiv_id, title.as_deref())
                .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!(
                    "Attached {} ({}) to {}",
                    output.upload.title, output.pdf_url, output.upload.parent_item_key
                );
            }
        }
    }

    Ok(())
}
