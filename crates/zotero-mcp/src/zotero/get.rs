use serde::{Deserialize, Serialize};

use zotero_mcp_core::error::ZoteroError;
use zotero_mcp_core::items::{transform_attachment, transform_item, ItemOutput, ZoteroItem};

use crate::prelude::{println, *};
use crate::zotero::client::ZoteroClient;
use crate::zotero::{encode_path, CallContext};

/// Options for fetching a single item
#[derive(Debug, clap::Args, Serialize, Deserialize, Clone)]
pub struct GetOptions {
    /// Item key (e.g. "ABCD1234")
    pub item_key: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Fetch one item's metadata together with its child attachments.
pub async fn get_item_data(
    client: &ZoteroClient,
    ctx: &CallContext,
    item_key: &str,
) -> Result<ItemOutput, ZoteroError> {
    let item_key = item_key.trim();
    if item_key.is_empty() {
        return Err(ZoteroError::validation(
            "item_key is required and must be a non-empty string.",
        ));
    }

    let item_url = client.users_url(&format!("items/{}", encode_path(item_key)));
    let (value, _headers) = client.execute_json(client.api_get(item_url, &[]), ctx, true).await?;
    let raw: ZoteroItem = serde_json::from_value(value).map_err(|error| {
        ZoteroError::upstream("Unexpected Zotero response format.")
            .with_detail("parse_error", error.to_string())
    })?;
    let mut item = transform_item(raw);

    let children_url = client.users_url(&format!("items/{}/children", encode_path(item_key)));
    let (children, _headers) = client
        .execute_json(client.api_get(children_url, &[]), ctx, true)
        .await?;
    let children: Vec<ZoteroItem> = serde_json::from_value(children).map_err(|error| {
        ZoteroError::upstream("Unexpected Zotero response format.")
            .with_detail("parse_error", error.to_string())
    })?;
    item.attachments = children.iter().filter_map(transform_attachment).collect();

    Ok(item)
}

/// Handle the get command
pub async fn handler(client: &ZoteroClient, options: GetOptions) -> Result<()> {
    let ctx = CallContext::new();
    let item = get_item_data(client, &ctx, &options.item_key).await?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&item)?);
    } else {
        super::display_item(&item);
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

    #[tokio::test(start_paused = true)]
    async fn get_item_includes_child_attachments() {
        let (client, transport) = test_client(
            vec![
                Ok(json_response(
                    200,
                    json!({
                        "key": "ITEM123",
                        "version": 2,
                        "data": {
                            "itemType": "book",
                            "title": "Sample Book",
                            "creators": [{"creatorType": "author", "name": "Author"}]
                        }
                    }),
                )),
                Ok(json_response(
                    200,
                    json!([
                        {
                            "key": "ATT1",
                            "data": {
                                "itemType": "attachment",
                                "title": "Paper.pdf",
                                "contentType": "application/pdf",
                                "fileSize": 123
                            }
                        },
                        {"key": "NOTE1", "data": {"itemType": "note", "title": "A note"}}
                    ]),
                )),
            ],
            CacheConfig::default(),
        );
        let ctx = CallContext::new();

        let item = get_item_data(&client, &ctx, "ITEM123").await.unwrap();

        assert_eq!(item.item_key, "ITEM123");
        assert_eq!(item.title, "Sample Book");
        assert_eq!(item.attachments.len(), 1);
        assert_eq!(item.attachments[0].attachment_key, "ATT1");
        assert_eq!(item.attachments[0].size, Some(123));

        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].url.ends_with("/users/12345/items/ITEM123"));
        assert!(calls[1].url.ends_with("/users/12345/items/ITEM123/children"));
    }

    #[tokio::test(start_paused = true)]
    async fn blank_item_key_is_rejected_before_any_network_call() {
        let (client, transport) = test_client(vec![], CacheConfig::default());
        let ctx = CallContext::new();

        let error = get_item_data(&client, &ctx, "  ").await.unwrap_err();
        assert_eq!(error.kind, zotero_mcp_core::error::ErrorKind::Validation);
        assert_eq!(transport.call_count(), 0);
    }
}
