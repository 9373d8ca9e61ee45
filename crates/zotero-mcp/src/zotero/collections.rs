use serde::Serialize;

use zotero_mcp_core::error::{ErrorKind, ZoteroError};
use zotero_mcp_core::items::{transform_collection, CollectionOutput, ZoteroCollection};
use zotero_mcp_core::pagination::{parse_next_start, parse_total_results};

use crate::prelude::{println, *};
use crate::zotero::client::ZoteroClient;
use crate::zotero::{encode_path, CallContext};

/// Collection subcommands
#[derive(Debug, clap::Subcommand)]
pub enum CollectionCommands {
    /// List collections in the library
    #[clap(name = "list")]
    List {
        /// Maximum number of results per page (1-100)
        #[arg(short, long, default_value = "25")]
        limit: u64,

        /// Result offset for pagination
        #[arg(long, default_value = "0")]
        start: u64,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Add an item to a collection by key or name
    #[clap(name = "add")]
    Add {
        /// Item key to file into the collection
        item_key: String,

        /// Collection key
        #[arg(long)]
        collection_key: Option<String>,

        /// Collection name (resolved case-insensitively)
        #[arg(long)]
        collection_name: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Serialize, PartialEq)]
pub struct CollectionsOutput {
    pub collections: Vec<CollectionOutput>,
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_start: Option<u64>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct AddToCollectionOutput {
    pub item_key: String,
    pub collection_key: String,
}

/// Public data function - used by both CLI and MCP.
pub async fn list_collections_data(
    client: &ZoteroClient,
    ctx: &CallContext,
    limit: u64,
    start: u64,
) -> Result<CollectionsOutput, ZoteroError> {
    if !(1..=100).contains(&limit) {
        return Err(ZoteroError::validation("limit must be between 1 and 100."));
    }

    let mut query: Vec<(&str, String)> = vec![("limit", limit.to_string())];
    if start > 0 {
        query.push(("start", start.to_string()));
    }
    let spec = client.api_get(client.users_url("collections"), &query);
    let (value, headers) = client.execute_json(spec, ctx, true).await?;
    let raw: Vec<ZoteroCollection> = serde_json::from_value(value).map_err(|error| {
        ZoteroError::upstream("Unexpected Zotero response format.")
            .with_detail("parse_error", error.to_string())
    })?;
    let collections: Vec<CollectionOutput> = raw.into_iter().map(transform_collection).collect();

    Ok(CollectionsOutput {
        total: parse_total_results(&headers).unwrap_or(collections.len() as u64),
        next_start: parse_next_start(&headers),
        collections,
    })
}

/// Resolve a collection name to its key, paginating through every page
/// before deciding. Ambiguous names are rejected rather than guessed at.
async fn resolve_collection_key_by_name(
    client: &ZoteroClient,
    ctx: &CallContext,
    collection_name: &str,
) -> Result<String, ZoteroError> {
    let normalized = collection_name.to_lowercase();
    let mut matches: Vec<String> = Vec::new();
    let mut start = 0;
    loop {
        let page = list_collections_data(client, ctx, 100, start).await?;
        for collection in &page.collections {
            if collection.name.to_lowercase() == normalized && !collection.collection_key.is_empty()
            {
                matches.push(collection.collection_key.clone());
            }
        }
        match page.next_start {
            Some(next_start) => start = next_start,
            None => break,
        }
    }

    matches.sort();
    matches.dedup();
    match matches.len() {
        0 => Err(ZoteroError::new(ErrorKind::NotFound, "Collection not found.")
            .with_detail("collection_name", collection_name)),
        1 => Ok(matches.remove(0)),
        _ => Err(ZoteroError::new(
            ErrorKind::AmbiguousCollection,
            "Multiple collections matched the provided name. Use collection_key instead.",
        )
        .with_detail("collection_name", collection_name)
        .with_detail("matches", matches)),
    }
}

/// Public data function - used by both CLI and MCP.
pub async fn add_item_to_collection_data(
    client: &ZoteroClient,
    ctx: &CallContext,
    item_key: &str,
    collection_key: Option<&str>,
    collection_name: Option<&str>,
) -> Result<AddToCollectionOutput, ZoteroError> {
    let item_key = item_key.trim();
    if item_key.is_empty() {
        return Err(ZoteroError::validation(
            "item_key is required and must be a non-empty string.",
        ));
    }
    let collection_key = collection_key.map(str::trim).filter(|key| !key.is_empty());
    let collection_name = collection_name
        .map(str::trim)
        .filter(|name| !name.is_empty());

    let collection_key = match (collection_key, collection_name) {
        (Some(key), _) => key.to_string(),
        (None, Some(name)) => resolve_collection_key_by_name(client, ctx, name).await?,
        (None, None) => {
            return Err(ZoteroError::validation(
                "Provide collection_key or collection_name.",
            ));
        }
    };

    let url = client.users_url(&format!("collections/{}/items", encode_path(&collection_key)));
    let body = serde_json::json!([item_key]);
    client
        .execute(client.api_post(url, body), ctx, false)
        .await?;

    Ok(AddToCollectionOutput {
        item_key: item_key.to_string(),
        collection_key,
    })
}

/// Handle collection subcommands.
pub async fn handler(client: &ZoteroClient, cmd: CollectionCommands) -> Result<()> {
    match cmd {
        CollectionCommands::List { limit, start, json } => {
            let ctx = CallContext::new();
            let data = list_collections_data(client, &ctx, limit, start).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&data)?);
            } else if data.collections.is_empty() {
                println!("No collections found.");
            } else {
                let mut table = crate::prelude::new_table();
                table.add_row(prettytable::row!["Key", "Name", "Items", "Parent"]);
                for collection in &data.collections {
                    let num_items = collection
                        .num_items
                        .map(|count| count.to_string())
                        .unwrap_or_default();
                    table.add_row(prettytable::row![
                        &collection.collection_key,
                        &collection.name,
                        num_items,
                        &collection.parent_key
                    ]);
                }
                table.printstd();

                if let Some(next_start) = data.next_start {
                    println!(
                        "\nTo fetch the next page, run:\n  zotero-mcp zotero collections list --limit {limit} --start {next_start}"
                    );
                }
            }
        }

        CollectionCommands::Add {
            item_key,
            collection_key,
            collection_name,
            json,
        } => {
            let ctx = CallContext::new();
            let data = add_item_to_collection_data(
                client,
                &ctx,
                &item_key,
                collection_key.as_deref(),
                collection_name.as_deref(),
            )
            .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&data)?);
            } else {
                println!(
                    "Added {} to collection {}",
                    data.item_key, data.collection_key
                );
            }
        }
    }

    Ok(())
}
