use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use zotero_mcp_core::error::{ErrorKind, ZoteroError};
use zotero_mcp_core::items::{transform_item, ItemOutput, ZoteroItem};
use zotero_mcp_core::pagination::{parse_next_start, parse_total_results};
use zotero_mcp_core::search::{
    canonical_sort_value, extract_exact_arxiv_query, extract_exact_doi_query,
    filter_items_exact_match, ArxivId, DEFAULT_SORT, FALLBACK_SORT,
};

use crate::prelude::{eprintln, println, *};
use crate::zotero::client::ZoteroClient;
use crate::zotero::CallContext;

/// Options for searching the library
#[derive(Debug, clap::Args, Serialize, Deserialize, Clone)]
pub struct SearchOptions {
    /// Search query. A bare DOI or arXiv identifier narrows the search to an
    /// exact match.
    pub query: String,

    /// Maximum number of results per page (1-100)
    #[arg(short, long, default_value = "25")]
    pub limit: u64,

    /// Sort key (see `zotero-mcp zotero sort-values`)
    #[arg(long, default_value = DEFAULT_SORT)]
    pub sort: String,

    /// Result offset for pagination
    #[arg(long, default_value = "0")]
    pub start: u64,

    /// Filter by tag; repeatable
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Validated search parameters shared by the CLI and MCP entry points.
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub query: String,
    pub limit: u64,
    pub sort: String,
    pub start: u64,
    pub tags: Vec<String>,
}

impl SearchParams {
    /// Validate raw arguments. `offset` is accepted as an alias of `start`;
    /// providing both with different values is an error.
    pub fn validate(
        query: &str,
        limit: Option<u64>,
        sort: Option<&str>,
        start: Option<u64>,
        offset: Option<u64>,
        tags: Option<Vec<String>>,
    ) -> Result<Self, ZoteroError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ZoteroError::validation(
                "query is required and must be a non-empty string.",
            ));
        }
        let limit = limit.unwrap_or(25);
        if !(1..=100).contains(&limit) {
            return Err(ZoteroError::validation("limit must be between 1 and 100."));
        }
        let sort = sort.unwrap_or(DEFAULT_SORT).trim().to_string();
        if sort.is_empty() {
            return Err(ZoteroError::validation("sort must be a non-empty string."));
        }
        let sort = canonical_sort_value(&sort)
            .map(str::to_string)
            .unwrap_or(sort);
        let start = match (start, offset) {
            (Some(start), Some(offset)) if start > 0 && start != offset => {
                return Err(ZoteroError::validation(
                    "Provide only one of start or offset.",
                ));
            }
            (Some(0) | None, Some(offset)) => offset,
            (Some(start), _) => start,
            (None, None) => 0,
        };
        let mut seen = std::collections::HashSet::new();
        let mut deduped = Vec::new();
        for tag in tags.unwrap_or_default() {
            if tag.is_empty() {
                return Err(ZoteroError::validation(
                    "tags must be an array of non-empty strings.",
                ));
            }
            if seen.insert(tag.clone()) {
                deduped.push(tag);
            }
        }
        Ok(Self {
            query: query.to_string(),
            limit,
            sort,
            start,
            tags: deduped,
        })
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct SearchOutput {
    pub items: Vec<ItemOutput>,
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_start: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_used: Option<String>,
}

/// Public data function - used by both CLI and MCP.
///
/// DOI and arXiv queries are narrowed to exact matches. When the upstream
/// rejects the requested sort key, the search is reissued exactly once with
/// the fallback sort; that substitution is independent of the executor's
/// retry budget and is reported via `sort_used`.
pub async fn search_items_data(
    client: &ZoteroClient,
    ctx: &CallContext,
    params: SearchParams,
) -> Result<SearchOutput, ZoteroError> {
    let exact_doi = extract_exact_doi_query(&params.query);
    let exact_arxiv = if exact_doi.is_none() {
        extract_exact_arxiv_query(&params.query)
    } else {
        None
    };
    let search_query = exact_doi
        .clone()
        .or_else(|| exact_arxiv.as_ref().map(ArxivId::canonical))
        .unwrap_or_else(|| params.query.clone());

    let mut sort_used = params.sort.clone();
    let (items, headers) = match fetch_page(client, ctx, &search_query, &params, &sort_used).await {
        Ok(page) => page,
        Err(error) if is_sort_rejection(&error, &sort_used) => {
            sort_used = FALLBACK_SORT.to_string();
            tracing::warn!(
                correlation_id = %ctx.correlation_id,
                fallback_sort = FALLBACK_SORT,
                "upstream rejected the sort key, retrying once with the fallback"
            );
            fetch_page(client, ctx, &search_query, &params, &sort_used).await?
        }
        Err(error) => return Err(error),
    };

    let exact = exact_doi.is_some() || exact_arxiv.is_some();
    let items = if exact {
        filter_items_exact_match(items, exact_doi.as_deref(), exact_arxiv.as_ref())
    } else {
        items
    };
    let items: Vec<ItemOutput> = items.into_iter().map(transform_item).collect();
    let total = if exact {
        items.len() as u64
    } else {
        parse_total_results(&headers).unwrap_or(items.len() as u64)
    };
    let next_start = if exact { None } else { parse_next_start(&headers) };

    Ok(SearchOutput {
        items,
        total,
        next_start,
        sort_used: (sort_used != params.sort).then_some(sort_used),
    })
}

async fn fetch_page(
    client: &ZoteroClient,
    ctx: &CallContext,
    search_query: &str,
    params: &SearchParams,
    sort: &str,
) -> Result<(Vec<ZoteroItem>, HashMap<String, String>), ZoteroError> {
    let mut query: Vec<(&str, String)> = vec![
        ("q", search_query.to_string()),
        ("limit", params.limit.to_string()),
        ("sort", sort.to_string()),
    ];
    if params.start > 0 {
        query.push(("start", params.start.to_string()));
    }
    for tag in &params.tags {
        query.push(("tag", tag.clone()));
    }

    let spec = client.api_get(client.users_url("items"), &query);
    let (value, headers) = client.execute_json(spec, ctx, true).await?;
    let items: Vec<ZoteroItem> = serde_json::from_value(value).map_err(|error| {
        ZoteroError::upstream("Unexpected Zotero response format.")
            .with_detail("parse_error", error.to_string())
    })?;
    Ok((items, headers))
}

/// The one-shot fallback applies when a validation rejection names the sort
/// key (or the default sort was in play) and the fallback hasn't been tried.
fn is_sort_rejection(error: &ZoteroError, sort: &str) -> bool {
    if error.kind != ErrorKind::Validation || sort == FALLBACK_SORT {
        return false;
    }
    error
        .raw_body
        .as_deref()
        .map(|body| body.to_lowercase().contains("sort"))
        .unwrap_or(sort == DEFAULT_SORT)
}

/// Handle the search command
pub async fn handler(client: &ZoteroClient, options: SearchOptions) -> Result<()> {
    let params = SearchParams::validate(
        &options.query,
        Some(options.limit),
        Some(&options.sort),
        Some(options.start),
        None,
        Some(options.tags.clone()),
    )?;
    let ctx = CallContext::new();
    let data = search_items_data(client, &ctx, params).await?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("Found {} item(s):\n", data.total);

        if data.items.is_empty() {
            println!("No items found.");
            return Ok(());
        }

        let mut table = crate::prelude::new_table();
        table.add_row(prettytable::row!["Key", "Title", "Type", "Date"]);
        for item in &data.items {
            table.add_row(prettytable::row![
                &item.item_key,
                &item.title,
                &item.item_type,
                &item.date
            ]);
        }
        table.printstd();

        if let Some(sort_used) = &data.sort_used {
            eprintln!("\nNote: results sorted by '{sort_used}' (requested sort was rejected).");
        }
        if let Some(next_start) = data.next_start {
            eprintln!(
                "\nTo fetch the next page, run:\n  zotero-mcp zotero search '{}' --limit {} --start {}",
                options.query, options.limit, next_start
            );
        }
    }

    Ok(())
}
