use serde::Serialize;

use zotero_mcp_core::error::ZoteroError;
use zotero_mcp_core::items::{
    apply_create_fields, coerce_template, extract_created_key, CreateItemInput, CreatorOutput,
};

use crate::prelude::{println, *};
use crate::zotero::client::ZoteroClient;
use crate::zotero::CallContext;

/// Options for creating a library item
#[derive(Debug, clap::Args, Clone)]
pub struct CreateOptions {
    /// Title of the new item
    pub title: String,

    /// Zotero item type (e.g. journalArticle, book, report)
    #[arg(long, default_value = "journalArticle")]
    pub item_type: String,

    /// Creator as "type:Name" or "type:First|Last"; repeatable
    #[arg(long = "creator")]
    pub creators: Vec<String>,

    /// Publication date
    #[arg(long)]
    pub date: Option<String>,

    /// DOI
    #[arg(long)]
    pub doi: Option<String>,

    /// URL
    #[arg(long)]
    pub url: Option<String>,

    /// Abstract text
    #[arg(long)]
    pub abstract_note: Option<String>,

    /// Tag; repeatable
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Content of the free-form extra field
    #[arg(long)]
    pub extra: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct CreateOutput {
    pub item_key: String,
    pub version: u64,
    pub item: serde_json::Value,
}

/// Trim, deduplicate, and sanity-check create input.
pub fn validate_create_input(mut input: CreateItemInput) -> Result<CreateItemInput, ZoteroError> {
    input.item_type = input.item_type.trim().to_string();
    if input.item_type.is_empty() {
        return Err(ZoteroError::validation(
            "item_type is required and must be a non-empty string.",
        ));
    }
    input.title = input.title.trim().to_string();
    if input.title.is_empty() {
        return Err(ZoteroError::validation(
            "title is required and must be a non-empty string.",
        ));
    }
    for creator in &input.creators {
        if creator.creator_type.trim().is_empty() {
            return Err(ZoteroError::validation(
                "creator_type is required for each creator.",
            ));
        }
        let has_name = creator.name.as_deref().is_some_and(|n| !n.trim().is_empty());
        let has_first = creator
            .first_name
            .as_deref()
            .is_some_and(|n| !n.trim().is_empty());
        let has_last = creator
            .last_name
            .as_deref()
            .is_some_and(|n| !n.trim().is_empty());
        if !has_name && !has_first && !has_last {
            return Err(ZoteroError::validation(
                "creators entries must include name or first_name/last_name.",
            ));
        }
    }
    let mut seen = std::collections::HashSet::new();
    let mut tags = Vec::new();
    for tag in &input.tags {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(ZoteroError::validation(
                "tags must be an array of non-empty strings.",
            ));
        }
        if seen.insert(tag.to_string()) {
            tags.push(tag.to_string());
        }
    }
    input.tags = tags;
    Ok(input)
}

/// Public data function - used by both CLI and MCP.
///
/// Fetches the item-type template (a cacheable read), merges the validated
/// fields over it, and writes the result to the library.
pub async fn create_item_data(
    client: &ZoteroClient,
    ctx: &CallContext,
    input: CreateItemInput,
) -> Result<CreateOutput, ZoteroError> {
    let input = validate_create_input(input)?;

    let template_url = client.api_url("/items/new");
    let query = [("itemType", input.item_type.clone())];
    let (template, _headers) = client
        .execute_json(client.api_get(template_url, &query), ctx, true)
        .await?;
    let mut template = coerce_template(template)?;
    apply_create_fields(&mut template, &input);
    let item = serde_json::Value::Object(template);

    let create_url = client.users_url("items");
    let (payload, _headers) = client
        .execute_json(
            client.api_post(create_url, serde_json::Value::Array(vec![item.clone()])),
            ctx,
            false,
        )
        .await?;
    let (item_key, version) = extract_created_key(&payload)?;

    Ok(CreateOutput {
        item_key,
        version,
        item,
    })
}

/// Parse a `--creator` argument: "type:Name" or "type:First|Last".
fn parse_creator_arg(raw: &str) -> Result<CreatorOutput, ZoteroError> {
    let (creator_type, name) = raw.split_once(':').ok_or_else(|| {
        ZoteroError::validation("creator must look like 'type:Name' or 'type:First|Last'.")
    })?;
    let mut creator = CreatorOutput {
        creator_type: creator_type.trim().to_string(),
        ..CreatorOutput::default()
    };
    match name.split_once('|') {
        Some((first, last)) => {
            creator.first_name = Some(first.trim().to_string()).filter(|n| !n.is_empty());
            creator.last_name = Some(last.trim().to_string()).filter(|n| !n.is_empty());
        }
        None => {
            creator.name = Some(name.trim().to_string()).filter(|n| !n.is_empty());
        }
    }
    Ok(creator)
}

/// Handle the create command
pub async fn handler(client: &ZoteroClient, options: CreateOptions) -> Result<()> {
    let creators = options
        .creators
        .iter()
        .map(|raw| parse_creator_arg(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let input = CreateItemInput {
        item_type: options.item_type.clone(),
        title: options.title.clone(),
        creators,
        date: options.date.clone(),
        doi: options.doi.clone(),
        url: options.url.clone(),
        abstract_note: options.abstract_note.clone(),
        tags: options.tags.clone(),
        extra: options.extra.clone(),
    };

    let ctx = CallContext::new();
    let output = create_item_data(client, &ctx, input).await?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!(
            "Created item {} (version {})",
            output.item_key, output.version
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zotero::cache::CacheConfig;
    use crate::zotero::client::tests::test_client;
    use crate::zotero::transport::testing::json_response;
    use serde_json::json;

    fn input() -> CreateItemInput {
        CreateItemInput {
            item_type: "book".into(),
            title: "My Title".into(),
            creators: vec![CreatorOutput {
                creator_type: "author".into(),
                name: Some("Jane".into()),
                ..CreatorOutput::default()
            }],
            ..CreateItemInput::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn create_merges_template_and_extracts_the_key() {
        let (client, transport) = test_client(
            vec![
                Ok(json_response(200, json!({"itemType": "book", "title": ""}))),
                Ok(json_response(
                    200,
                    json!({"successful": {"0": {"key": "NEWITEM", "version": 3}}}),
                )),
            ],
            CacheConfig::default(),
        );
        let ctx = CallContext::new();

        let output = create_item_data(&client, &ctx, input()).await.unwrap();

        assert_eq!(output.item_key, "NEWITEM");
        assert_eq!(output.version, 3);
        assert_eq!(output.item["title"], "My Title");
        assert_eq!(output.item["creators"][0]["name"], "Jane");

        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].url.contains("/items/new?itemType=book"));
        assert_eq!(calls[1].method, "POST");
        assert!(calls[1].url.ends_with("/users/12345/items"));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_input_never_reaches_the_network() {
        let (client, transport) = test_client(vec![], CacheConfig::default());
        let ctx = CallContext::new();

        let mut bad = input();
        bad.title = "  ".into();
        assert!(create_item_data(&client, &ctx, bad).await.is_err());

        let mut bad = input();
        bad.creators[0].name = None;
        assert!(create_item_data(&client, &ctx, bad).await.is_err());

        assert_eq!(transport.call_count(), 0);
    }

    #[test]
    fn creator_arguments_parse_both_shapes() {
        let single = parse_creator_arg("author:Jane Doe").unwrap();
        assert_eq!(single.creator_type, "author");
        assert_eq!(single.name.as_deref(), Some("Jane Doe"));

        let split = parse_creator_arg("editor:Ada|Lovelace").unwrap();
        assert_eq!(split.first_name.as_deref(), Some("Ada"));
        assert_eq!(split.last_name.as_deref(), Some("Lovelace"));

        assert!(parse_creator_arg("no-separator").is_err());
    }

    #[test]
    fn validation_dedupes_tags() {
        let mut raw = input();
        raw.tags = vec!["ml".into(), " ml ".into(), "ai".into()];
        let validated = validate_create_input(raw).unwrap();
        assert_eq!(validated.tags, vec!["ml", "ai"]);
    }
}
