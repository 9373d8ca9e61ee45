//! Transformation functions for Zotero API responses.
//!
//! Raw library entries come back as `{key, version, data: {…}}` envelopes;
//! these types and functions turn them into the flat output models served to
//! tools, and build item payloads for creation from a fetched template.

use serde::{Deserialize, Serialize};

use crate::error::ZoteroError;

/// Raw item envelope as returned by the Zotero API.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ZoteroItem {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub data: ZoteroItemData,
}

/// The `data` object of an item. Only the fields the bridge surfaces are
/// modeled; everything else stays upstream.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ZoteroItemData {
    #[serde(rename = "itemType", default)]
    pub item_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub creators: Vec<ZoteroCreator>,
    #[serde(default)]
    pub date: String,
    #[serde(rename = "DOI", default)]
    pub doi: String,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "abstractNote", default)]
    pub abstract_note: String,
    #[serde(default)]
    pub tags: Vec<ZoteroTag>,
    #[serde(default)]
    pub extra: String,
    #[serde(rename = "archiveID", alias = "archiveId", default)]
    pub archive_id: String,
    #[serde(rename = "contentType", default)]
    pub content_type: Option<String>,
    #[serde(rename = "fileSize", alias = "size", default)]
    pub file_size: Option<u64>,
}

/// A creator entry: either a single `name` or a first/last pair.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct ZoteroCreator {
    #[serde(rename = "creatorType", default)]
    pub creator_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "firstName", default)]
    pub first_name: Option<String>,
    #[serde(rename = "lastName", default)]
    pub last_name: Option<String>,
}

/// Tags arrive either as `{"tag": "…"}` objects or bare strings.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum ZoteroTag {
    Structured { tag: String },
    Plain(String),
}

impl ZoteroTag {
    pub fn value(&self) -> &str {
        match self {
            ZoteroTag::Structured { tag } => tag,
            ZoteroTag::Plain(tag) => tag,
        }
    }
}

/// Raw collection envelope.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ZoteroCollection {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub data: ZoteroCollectionData,
    #[serde(default)]
    pub meta: ZoteroCollectionMeta,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ZoteroCollectionData {
    #[serde(default)]
    pub name: String,
    // `false` for top-level collections, a collection key otherwise.
    #[serde(rename = "parentCollection", default)]
    pub parent_collection: serde_json::Value,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ZoteroCollectionMeta {
    #[serde(rename = "numItems", default)]
    pub num_items: Option<u64>,
}

// --- Output models served to tools and the CLI ---

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct CreatorOutput {
    pub creator_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ItemOutput {
    pub item_key: String,
    pub item_type: String,
    pub title: String,
    pub creators: Vec<CreatorOutput>,
    pub date: String,
    pub doi: String,
    pub url: String,
    #[serde(rename = "abstract")]
    pub abstract_note: String,
    pub tags: Vec<String>,
    pub extra: String,
    pub version: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentOutput>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AttachmentOutput {
    pub attachment_key: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CollectionOutput {
    pub collection_key: String,
    pub name: String,
    pub parent_key: String,
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_items: Option<u64>,
}

/// Flatten a raw item into the output model.
pub fn transform_item(item: ZoteroItem) -> ItemOutput {
    let data = item.data;
    ItemOutput {
        item_key: item.key,
        item_type: data.item_type,
        title: data.title,
        creators: data.creators.iter().filter_map(transform_creator).collect(),
        date: data.date,
        doi: data.doi,
        url: data.url,
        abstract_note: data.abstract_note,
        tags: data.tags.iter().map(|tag| tag.value().to_string()).collect(),
        extra: data.extra,
        version: item.version,
        attachments: Vec::new(),
    }
}

fn transform_creator(creator: &ZoteroCreator) -> Option<CreatorOutput> {
    if creator.creator_type.is_empty() {
        return None;
    }
    let mut output = CreatorOutput {
        creator_type: creator.creator_type.clone(),
        ..CreatorOutput::default()
    };
    if let Some(name) = creator.name.as_deref().filter(|name| !name.is_empty()) {
        output.name = Some(name.to_string());
    } else {
        output.first_name = creator.first_name.clone().filter(|n| !n.is_empty());
        output.last_name = creator.last_name.clone().filter(|n| !n.is_empty());
    }
    Some(output)
}

/// Flatten an item's child into an attachment, skipping non-attachments.
pub fn transform_attachment(child: &ZoteroItem) -> Option<AttachmentOutput> {
    if child.data.item_type != "attachment" {
        return None;
    }
    Some(AttachmentOutput {
        attachment_key: child.key.clone(),
        title: child.data.title.clone(),
        content_type: child.data.content_type.clone().filter(|c| !c.is_empty()),
        size: child.data.file_size,
    })
}

/// Flatten a raw collection into the output model.
pub fn transform_collection(collection: ZoteroCollection) -> CollectionOutput {
    let parent_key = collection
        .data
        .parent_collection
        .as_str()
        .unwrap_or("")
        .to_string();
    CollectionOutput {
        collection_key: collection.key,
        name: collection.data.name,
        parent_key,
        version: collection.version,
        num_items: collection.meta.num_items,
    }
}

// --- Item creation ---

/// Validated input for creating a library item.
#[derive(Debug, Clone, Default)]
pub struct CreateItemInput {
    pub item_type: String,
    pub title: String,
    pub creators: Vec<CreatorOutput>,
    pub date: Option<String>,
    pub doi: Option<String>,
    pub url: Option<String>,
    pub abstract_note: Option<String>,
    pub tags: Vec<String>,
    pub extra: Option<String>,
}

/// Coerce a template response into an object. The templates endpoint returns
/// an object, but some deployments wrap it in a one-element array.
pub fn coerce_template(
    template: serde_json::Value,
) -> Result<serde_json::Map<String, serde_json::Value>, ZoteroError> {
    match template {
        serde_json::Value::Object(map) => Ok(map),
        serde_json::Value::Array(mut entries) if !entries.is_empty() => {
            match entries.swap_remove(0) {
                serde_json::Value::Object(map) => Ok(map),
                other => Err(ZoteroError::upstream(
                    "Unexpected Zotero template response format.",
                )
                .with_detail("type", json_type_name(&other))),
            }
        }
        other => Err(
            ZoteroError::upstream("Unexpected Zotero template response format.")
                .with_detail("type", json_type_name(&other)),
        ),
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Render creators into the wire shape Zotero expects.
pub fn serialize_creators(creators: &[CreatorOutput]) -> Vec<serde_json::Value> {
    creators
        .iter()
        .map(|creator| {
            let mut map = serde_json::Map::new();
            map.insert("creatorType".into(), creator.creator_type.clone().into());
            if let Some(ref name) = creator.name {
                map.insert("name".into(), name.clone().into());
            } else {
                if let Some(ref first) = creator.first_name {
                    map.insert("firstName".into(), first.clone().into());
                }
                if let Some(ref last) = creator.last_name {
                    map.insert("lastName".into(), last.clone().into());
                }
            }
            serde_json::Value::Object(map)
        })
        .collect()
}

/// Merge validated create fields over a fetched item template.
pub fn apply_create_fields(
    template: &mut serde_json::Map<String, serde_json::Value>,
    input: &CreateItemInput,
) {
    template.insert("title".into(), input.title.clone().into());
    if !input.creators.is_empty() {
        template.insert(
            "creators".into(),
            serde_json::Value::Array(serialize_creators(&input.creators)),
        );
    }
    if let Some(ref date) = input.date {
        template.insert("date".into(), date.clone().into());
    }
    if let Some(ref doi) = input.doi {
        template.insert("DOI".into(), doi.clone().into());
    }
    if let Some(ref url) = input.url {
        template.insert("url".into(), url.clone().into());
    }
    if let Some(ref abstract_note) = input.abstract_note {
        template.insert("abstractNote".into(), abstract_note.clone().into());
    }
    if !input.tags.is_empty() {
        let tags: Vec<serde_json::Value> = input
            .tags
            .iter()
            .map(|tag| serde_json::json!({ "tag": tag }))
            .collect();
        template.insert("tags".into(), serde_json::Value::Array(tags));
    }
    if let Some(ref extra) = input.extra {
        template.insert("extra".into(), extra.clone().into());
    }
}

/// Pull the created key and version out of a write response envelope.
///
/// Zotero write responses report results per input index under `successful`.
pub fn extract_created_key(payload: &serde_json::Value) -> Result<(String, u64), ZoteroError> {
    let successful = payload
        .get("successful")
        .and_then(|value| value.as_object())
        .ok_or_else(|| {
            ZoteroError::upstream("Unexpected Zotero create response.")
                .with_detail("response", payload.clone())
        })?;
    for entry in successful.values() {
        if let Some(key) = entry.get("key").and_then(|key| key.as_str()) {
            let version = entry
                .get("version")
                .and_then(|version| version.as_u64())
                .unwrap_or(0);
            return Ok((key.to_string(), version));
        }
    }
    Err(ZoteroError::upstream("Zotero create failed.").with_detail("response", payload.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixture_item() -> ZoteroItem {
        serde_json::from_value(json!({
            "key": "A1",
            "version": 10,
            "data": {
                "itemType": "journalArticle",
                "title": "Deep Learning",
                "creators": [
                    {"creatorType": "author", "name": "Goodfellow"},
                    {"creatorType": "editor", "firstName": "Ada", "lastName": "Lovelace"}
                ],
                "DOI": "10.1000/example",
                "tags": [{"tag": "ml"}, "plain-tag"],
                "extra": "arXiv: 1234.5678"
            }
        }))
        .unwrap()
    }

    #[test]
    fn transform_item_flattens_data() {
        let output = transform_item(fixture_item());
        assert_eq!(output.item_key, "A1");
        assert_eq!(output.version, 10);
        assert_eq!(output.title, "Deep Learning");
        assert_eq!(output.doi, "10.1000/example");
        assert_eq!(output.tags, vec!["ml", "plain-tag"]);
        assert_eq!(output.creators.len(), 2);
        assert_eq!(output.creators[0].name.as_deref(), Some("Goodfellow"));
        assert_eq!(output.creators[1].first_name.as_deref(), Some("Ada"));
        assert_eq!(output.creators[1].last_name.as_deref(), Some("Lovelace"));
        assert!(output.attachments.is_empty());
    }

    #[test]
    fn transform_attachment_skips_non_attachments() {
        let note: ZoteroItem = serde_json::from_value(json!({
            "key": "N1",
            "data": {"itemType": "note", "title": "Note"}
        }))
        .unwrap();
        assert!(transform_attachment(&note).is_none());

        let attachment: ZoteroItem = serde_json::from_value(json!({
            "key": "ATT1",
            "data": {
                "itemType": "attachment",
                "title": "Paper.pdf",
                "contentType": "application/pdf",
                "fileSize": 123
            }
        }))
        .unwrap();
        let output = transform_attachment(&attachment).unwrap();
        assert_eq!(output.attachment_key, "ATT1");
        assert_eq!(output.content_type.as_deref(), Some("application/pdf"));
        assert_eq!(output.size, Some(123));
    }

    #[test]
    fn transform_collection_handles_false_parent() {
        let collection: ZoteroCollection = serde_json::from_value(json!({
            "key": "C1",
            "version": 3,
            "data": {"name": "Papers", "parentCollection": false},
            "meta": {"numItems": 7}
        }))
        .unwrap();
        let output = transform_collection(collection);
        assert_eq!(output.collection_key, "C1");
        assert_eq!(output.parent_key, "");
        assert_eq!(output.num_items, Some(7));
    }

    #[test]
    fn coerce_template_accepts_object_and_array() {
        let object = json!({"itemType": "book", "title": ""});
        assert!(coerce_template(object).is_ok());

        let array = json!([{"itemType": "book"}]);
        let map = coerce_template(array).unwrap();
        assert_eq!(map["itemType"], "book");

        let error = coerce_template(json!("nope")).unwrap_err();
        assert_eq!(error.details_json()["type"], "string");
    }

    #[test]
    fn apply_create_fields_merges_over_template() {
        let mut template = coerce_template(json!({"itemType": "book", "title": ""})).unwrap();
        let input = CreateItemInput {
            item_type: "book".into(),
            title: "My Title".into(),
            creators: vec![CreatorOutput {
                creator_type: "author".into(),
                name: Some("Jane".into()),
                ..CreatorOutput::default()
            }],
            tags: vec!["ml".into()],
            ..CreateItemInput::default()
        };
        apply_create_fields(&mut template, &input);
        assert_eq!(template["title"], "My Title");
        assert_eq!(template["creators"][0]["name"], "Jane");
        assert_eq!(template["tags"][0]["tag"], "ml");
        assert_eq!(template["itemType"], "book");
    }

    #[test]
    fn extract_created_key_reads_the_success_envelope() {
        let payload = json!({"successful": {"0": {"key": "NEWITEM", "version": 3}}});
        assert_eq!(
            extract_created_key(&payload).unwrap(),
            ("NEWITEM".to_string(), 3)
        );
    }

    #[test]
    fn extract_created_key_rejects_failures() {
        let payload = json!({"failed": {"0": {"code": 400}}});
        let error = extract_created_key(&payload).unwrap_err();
        assert_eq!(error.kind, crate::error::ErrorKind::Upstream);
    }
}
