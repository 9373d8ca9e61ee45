//! Pure pieces of the attachment upload protocol.
//!
//! The orchestrator in the shell drives a strict five-step protocol; the
//! state machine, byte-source validation, checksum, content-type inference,
//! and authorization-response parsing all live here so they can be tested
//! without any I/O.

use serde::Serialize;

use crate::error::ZoteroError;

/// Default ceiling for attachment payloads: 50 MiB.
pub const DEFAULT_UPLOAD_MAX_BYTES: u64 = 50 * 1024 * 1024;

/// Protocol position of an upload session.
///
/// Steps advance strictly left to right; the only shortcut is
/// `UploadAuthorized → Registered` when the upstream reports the file
/// already exists and no bytes need to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Init,
    TemplateFetched,
    ChildItemCreated,
    UploadAuthorized,
    BytesTransferred,
    Registered,
}

impl UploadState {
    pub fn label(self) -> &'static str {
        match self {
            UploadState::Init => "init",
            UploadState::TemplateFetched => "template_fetched",
            UploadState::ChildItemCreated => "child_item_created",
            UploadState::UploadAuthorized => "upload_authorized",
            UploadState::BytesTransferred => "bytes_transferred",
            UploadState::Registered => "registered",
        }
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn allows(self, next: UploadState) -> bool {
        matches!(
            (self, next),
            (UploadState::Init, UploadState::TemplateFetched)
                | (UploadState::TemplateFetched, UploadState::ChildItemCreated)
                | (UploadState::ChildItemCreated, UploadState::UploadAuthorized)
                | (UploadState::UploadAuthorized, UploadState::BytesTransferred)
                | (UploadState::UploadAuthorized, UploadState::Registered)
                | (UploadState::BytesTransferred, UploadState::Registered)
        )
    }

    /// Move to `next`, rejecting skipped or reordered steps.
    pub fn advance(self, next: UploadState) -> Result<UploadState, ZoteroError> {
        if self.allows(next) {
            Ok(next)
        } else {
            Err(ZoteroError::upstream("Upload protocol steps out of order.")
                .with_detail("from_state", self.label())
                .with_detail("to_state", next.label()))
        }
    }
}

/// Exactly one byte source must be provided per upload.
pub fn validate_source_count(
    has_path: bool,
    has_url: bool,
    has_bytes: bool,
) -> Result<(), ZoteroError> {
    let provided = [has_path, has_url, has_bytes]
        .iter()
        .filter(|provided| **provided)
        .count();
    if provided == 1 {
        Ok(())
    } else {
        Err(ZoteroError::validation(
            "Provide exactly one of file_path, file_url, or file_bytes_base64.",
        ))
    }
}

/// Enforce the upload size ceiling before any authorization call is made.
pub fn check_upload_size(size: u64, max_bytes: u64, source_label: &str) -> Result<(), ZoteroError> {
    if size > max_bytes {
        Err(
            ZoteroError::validation(format!("{source_label} exceeds upload size limit."))
                .with_detail("size", size)
                .with_detail("max_bytes", max_bytes),
        )
    } else {
        Ok(())
    }
}

/// MD5 checksum in the lowercase hex form the upload authorization expects.
pub fn md5_hex(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

/// Infer a content type from the filename extension.
pub fn infer_content_type(filename: &str) -> &'static str {
    let extension = filename.rsplit('.').next().unwrap_or("").to_lowercase();

    match extension.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "txt" => "text/plain",
        "json" => "application/json",
        "xml" => "application/xml",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "zip" => "application/zip",
        "gz" | "gzip" => "application/gzip",
        "tar" => "application/x-tar",
        "csv" => "text/csv",
        "md" => "text/markdown",
        "epub" => "application/epub+zip",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}

/// Pull a filename out of a `Content-Disposition` header value.
pub fn filename_from_content_disposition(value: &str) -> Option<String> {
    for part in value.split(';') {
        let part = part.trim();
        let lowered = part.to_lowercase();
        if lowered.starts_with("filename*=") || lowered.starts_with("filename=") {
            let mut name = part.split_once('=')?.1.trim();
            if name.to_lowercase().starts_with("utf-8''") {
                name = &name["utf-8''".len()..];
            }
            let name = name.trim_matches(|c| c == '"' || c == '\'');
            if !name.is_empty() {
                return Some(name.to_string());
            }
        }
    }
    None
}

/// Last path segment of a URL, query and fragment stripped.
pub fn filename_from_url(url: &str) -> Option<String> {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let without_query = without_fragment.split('?').next().unwrap_or(without_fragment);
    let name = without_query.rsplit('/').next().unwrap_or("");
    if name.is_empty() || name.contains(':') {
        None
    } else {
        Some(name.to_string())
    }
}

/// Fresh upload instructions from the authorization step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub url: String,
    pub prefix: String,
    pub suffix: String,
    pub upload_key: String,
    pub content_type: Option<String>,
}

/// Authorization outcome: fresh instructions, or an exact-match short-circuit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadAuthorization {
    Exists,
    Fresh(UploadTarget),
}

/// Parse the upload-authorization response body.
pub fn parse_upload_authorization(
    payload: &serde_json::Value,
) -> Result<UploadAuthorization, ZoteroError> {
    if payload.get("exists").and_then(|v| v.as_i64()) == Some(1) {
        return Ok(UploadAuthorization::Exists);
    }
    let field = |name: &str| -> Option<String> {
        payload
            .get(name)
            .and_then(|value| value.as_str())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    let (Some(url), Some(prefix), Some(suffix), Some(upload_key)) = (
        field("url"),
        field("prefix"),
        field("suffix"),
        field("uploadKey"),
    ) else {
        return Err(
            ZoteroError::upstream("Upload auth response missing fields.")
                .with_detail("response", payload.clone()),
        );
    };
    Ok(UploadAuthorization::Fresh(UploadTarget {
        url,
        prefix,
        suffix,
        upload_key,
        content_type: field("contentType"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn states_advance_strictly_in_order() {
        let state = UploadState::Init;
        let state = state.advance(UploadState::TemplateFetched).unwrap();
        let state = state.advance(UploadState::ChildItemCreated).unwrap();
        let state = state.advance(UploadState::UploadAuthorized).unwrap();
        let state = state.advance(UploadState::BytesTransferred).unwrap();
        assert_eq!(
            state.advance(UploadState::Registered).unwrap(),
            UploadState::Registered
        );
    }

    #[test]
    fn skipping_a_step_is_rejected() {
        assert!(UploadState::Init
            .advance(UploadState::ChildItemCreated)
            .is_err());
        assert!(UploadState::ChildItemCreated
            .advance(UploadState::BytesTransferred)
            .is_err());
        assert!(UploadState::ChildItemCreated
            .advance(UploadState::Registered)
            .is_err());
        assert!(UploadState::Registered
            .advance(UploadState::BytesTransferred)
            .is_err());
    }

    #[test]
    fn exists_short_circuit_skips_the_transfer() {
        assert!(UploadState::UploadAuthorized.allows(UploadState::Registered));
    }

    #[test]
    fn exactly_one_byte_source_is_required() {
        assert!(validate_source_count(true, false, false).is_ok());
        assert!(validate_source_count(false, true, false).is_ok());
        assert!(validate_source_count(false, false, true).is_ok());
        assert!(validate_source_count(false, false, false).is_err());
        assert!(validate_source_count(true, false, true).is_err());
        assert!(validate_source_count(true, true, true).is_err());
    }

    #[test]
    fn size_ceiling_is_enforced() {
        assert!(check_upload_size(10, 10, "file_path").is_ok());
        let error = check_upload_size(11, 10, "file_path").unwrap_err();
        let details = error.details_json();
        assert_eq!(details["size"], 11);
        assert_eq!(details["max_bytes"], 10);
    }

    #[test]
    fn md5_matches_known_digest() {
        assert_eq!(md5_hex(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn content_type_inference_falls_back_to_octet_stream() {
        assert_eq!(infer_content_type("paper.pdf"), "application/pdf");
        assert_eq!(infer_content_type("notes.MD"), "text/markdown");
        assert_eq!(infer_content_type("mystery.bin"), "application/octet-stream");
        assert_eq!(infer_content_type("no-extension"), "application/octet-stream");
    }

    #[test]
    fn filenames_parse_from_content_disposition() {
        assert_eq!(
            filename_from_content_disposition("attachment; filename=\"paper.pdf\""),
            Some("paper.pdf".to_string())
        );
        assert_eq!(
            filename_from_content_disposition("attachment; filename*=UTF-8''paper.pdf"),
            Some("paper.pdf".to_string())
        );
        assert_eq!(filename_from_content_disposition("inline"), None);
    }

    #[test]
    fn filenames_parse_from_urls() {
        assert_eq!(
            filename_from_url("https://example.test/files/paper.pdf?sig=abc"),
            Some("paper.pdf".to_string())
        );
        assert_eq!(filename_from_url("https://example.test/"), None);
    }

    #[test]
    fn authorization_parses_fresh_instructions() {
        let payload = json!({
            "url": "https://uploads.example.test/upload",
            "prefix": "--prefix--",
            "suffix": "--suffix--",
            "uploadKey": "UPLOADKEY",
            "contentType": "multipart/form-data; boundary=b"
        });
        let authorization = parse_upload_authorization(&payload).unwrap();
        let UploadAuthorization::Fresh(target) = authorization else {
            panic!("expected fresh instructions");
        };
        assert_eq!(target.upload_key, "UPLOADKEY");
        assert_eq!(target.prefix, "--prefix--");
    }

    #[test]
    fn authorization_detects_exact_match() {
        let payload = json!({"exists": 1});
        assert_eq!(
            parse_upload_authorization(&payload).unwrap(),
            UploadAuthorization::Exists
        );
    }

    #[test]
    fn authorization_with_missing_fields_is_an_upstream_error() {
        let payload = json!({"url": "https://uploads.example.test/upload"});
        assert!(parse_upload_authorization(&payload).is_err());
    }
}
