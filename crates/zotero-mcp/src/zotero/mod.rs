pub mod attachment;
pub mod cache;
pub mod client;
pub mod collections;
pub mod create;
pub mod get;
pub mod search;
pub mod transport;

use std::time::Duration;

use colored::Colorize;

use zotero_mcp_core::backoff::RetryPolicy;
use zotero_mcp_core::error::ZoteroError;
use zotero_mcp_core::items::ItemOutput;
use zotero_mcp_core::upload::DEFAULT_UPLOAD_MAX_BYTES;

use crate::prelude::{println, *};
use cache::CacheConfig;
pub use client::ZoteroClient;

/// Zotero module app - root command
#[derive(Debug, clap::Parser)]
#[command(name = "zotero")]
#[command(about = "Zotero library operations")]
pub struct App {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, clap::Subcommand)]
pub enum Commands {
    /// Search items in the personal library
    #[clap(name = "search")]
    Search(search::SearchOptions),

    /// Fetch one item with its attachments
    #[clap(name = "get")]
    Get(get::GetOptions),

    /// Create a new library item
    #[clap(name = "create")]
    Create(create::CreateOptions),

    /// Manage collections
    #[command(subcommand)]
    Collections(collections::CollectionCommands),

    /// Manage file attachments
    #[command(subcommand)]
    Attachment(attachment::AttachmentCommands),

    /// Print the supported search sort keys
    #[clap(name = "sort-values")]
    SortValues,
}

/// Zotero configuration from environment variables
#[derive(Debug, Clone)]
pub struct ZoteroConfig {
    pub api_key: String,
    pub user_id: String,
    pub api_base: String,
}

impl ZoteroConfig {
    /// Default Zotero Web API base URL
    pub const DEFAULT_API_BASE: &'static str = "https://api.zotero.org";

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ZoteroError> {
        let api_key = non_empty_env("ZOTERO_API_KEY");
        let user_id = non_empty_env("ZOTERO_USER_ID");
        let (Some(api_key), Some(user_id)) = (api_key, user_id) else {
            let missing: Vec<&str> = [
                ("ZOTERO_API_KEY", non_empty_env("ZOTERO_API_KEY")),
                ("ZOTERO_USER_ID", non_empty_env("ZOTERO_USER_ID")),
            ]
            .into_iter()
            .filter(|(_, value)| value.is_none())
            .map(|(name, _)| name)
            .collect();
            return Err(ZoteroError::auth(
                "Zotero credentials missing. Set ZOTERO_API_KEY and ZOTERO_USER_ID.",
            )
            .with_detail("missing", missing));
        };
        let api_base = std::env::var("ZOTERO_API_BASE")
            .ok()
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| Self::DEFAULT_API_BASE.to_string());
        Ok(Self {
            api_key,
            user_id,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|value| value.parse().ok())
}

/// Retry pacing from environment variables, clamped to sane values.
pub fn retry_policy_from_env() -> RetryPolicy {
    let mut policy = RetryPolicy::default();
    if let Some(max_attempts) = env_parse::<u32>("ZOTERO_RETRY_MAX_ATTEMPTS") {
        policy.max_attempts = max_attempts;
    }
    if let Some(seconds) = env_parse::<f64>("ZOTERO_RETRY_BASE_DELAY") {
        if seconds >= 0.0 && seconds.is_finite() {
            policy.base_delay = Duration::from_secs_f64(seconds);
        }
    }
    if let Some(seconds) = env_parse::<f64>("ZOTERO_RETRY_MAX_DELAY") {
        if seconds >= 0.0 && seconds.is_finite() {
            policy.max_delay = Duration::from_secs_f64(seconds);
        }
    }
    policy.sanitized()
}

/// Read-cache settings from environment variables. Off unless
/// `ZOTERO_READ_CACHE=1`.
pub fn cache_config_from_env() -> CacheConfig {
    let mut config = CacheConfig {
        enabled: std::env::var("ZOTERO_READ_CACHE").as_deref() == Ok("1"),
        ..CacheConfig::default()
    };
    if let Some(seconds) = env_parse::<f64>("ZOTERO_READ_CACHE_TTL") {
        if seconds >= 0.0 && seconds.is_finite() {
            config.ttl = Duration::from_secs_f64(seconds);
        }
    }
    if let Some(max_entries) = env_parse::<usize>("ZOTERO_READ_CACHE_MAX") {
        config.max_entries = max_entries;
    }
    config.sanitized()
}

/// Upload size ceiling from the environment, defaulting to 50 MiB.
pub fn upload_max_bytes_from_env() -> u64 {
    env_parse::<u64>("ZOTERO_UPLOAD_MAX_BYTES")
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_UPLOAD_MAX_BYTES)
}

/// Per-request HTTP timeout.
pub fn http_timeout_from_env() -> Duration {
    Duration::from_secs(
        env_parse::<u64>("ZOTERO_HTTP_TIMEOUT_SECS")
            .filter(|value| *value > 0)
            .unwrap_or(30),
    )
}

/// Correlation context for one tool or CLI invocation. The id is threaded
/// through every executor call beneath the invocation and tagged onto every
/// emitted event.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub correlation_id: String,
    pub started_at: std::time::Instant,
}

impl CallContext {
    pub fn new() -> Self {
        Self {
            correlation_id: uuid::Uuid::new_v4().to_string(),
            started_at: std::time::Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Percent-encode one path segment.
pub(crate) fn encode_path(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

/// Module entry point
pub async fn run(app: App, global: crate::Global) -> Result<()> {
    if global.verbose {
        println!("Running Zotero module...");
    }

    let client = ZoteroClient::from_env()?;

    match app.command {
        Commands::Search(options) => search::handler(&client, options).await,
        Commands::Get(options) => get::handler(&client, options).await,
        Commands::Create(options) => create::handler(&client, options).await,
        Commands::Collections(cmd) => collections::handler(&client, cmd).await,
        Commands::Attachment(cmd) => attachment::handler(&client, cmd).await,
        Commands::SortValues => {
            print_sort_values();
            Ok(())
        }
    }
}

fn print_sort_values() {
    use zotero_mcp_core::search::{DEFAULT_SORT, FALLBACK_SORT, KNOWN_SORT_VALUES};

    std::println!("Supported sort keys:");
    for value in KNOWN_SORT_VALUES {
        std::println!("  - {value}");
    }
    std::println!("\nDefault: {DEFAULT_SORT}\nFallback: {FALLBACK_SORT}");
}

/// Display an item's details as a formatted CLI table.
///
/// Renders the standard item view used by the get and create handlers:
/// header line, metadata table, abstract, tags, and attachments.
fn display_item(item: &ItemOutput) {
    std::println!(
        "\n{} - {}\n",
        item.item_key.bold().cyan(),
        item.title.bright_white()
    );

    let mut table = new_table();
    table.add_row(prettytable::row![
        "Type".bold().cyan(),
        item.item_type.bright_blue().to_string()
    ]);

    if !item.creators.is_empty() {
        let creators = item
            .creators
            .iter()
            .map(|creator| {
                creator.name.clone().unwrap_or_else(|| {
                    let first = creator.first_name.as_deref().unwrap_or("");
                    let last = creator.last_name.as_deref().unwrap_or("");
                    format!("{first} {last}").trim().to_string()
                })
            })
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(prettytable::row![
            "Creators".bold().cyan(),
            creators.bright_magenta().to_string()
        ]);
    }

    if !item.date.is_empty() {
        table.add_row(prettytable::row![
            "Date".bold().cyan(),
            item.date.bright_black().to_string()
        ]);
    }

    if !item.doi.is_empty() {
        table.add_row(prettytable::row![
            "DOI".bold().cyan(),
            item.doi.bright_yellow().to_string()
        ]);
    }

    if !item.url.is_empty() {
        table.add_row(prettytable::row![
            "URL".bold().cyan(),
            item.url.bright_blue().to_string()
        ]);
    }

    table.add_row(prettytable::row![
        "Version".bold().cyan(),
        item.version.to_string().bright_black().to_string()
    ]);

    table.printstd();

    if !item.abstract_note.is_empty() {
        std::println!("\n{}:", "Abstract".bold().cyan());
        std::println!("{}\n", item.abstract_note);
    }

    if !item.tags.is_empty() {
        std::println!(
            "{}: {}",
            "Tags".bold().cyan(),
            item.tags.join(", ").bright_green()
        );
    }

    if !item.attachments.is_empty() {
        std::println!("\n{}:", "Attachments".bold().cyan());
        for attachment in &item.attachments {
            let size = attachment
                .size
                .map(|size| format!(", {size} bytes"))
                .unwrap_or_default();
            std::println!(
                "  {} {} ({}{})",
                attachment.attachment_key.bright_black(),
                attachment.title.bright_white(),
                attachment.content_type.as_deref().unwrap_or("unknown"),
                size
            );
        }
    }

    std::println!();
}

// Re-export public data functions for external use (e.g. MCP)
pub use attachment::{attach_arxiv_pdf_data, upload_attachment_data};
pub use collections::{add_item_to_collection_data, list_collections_data};
pub use create::create_item_data;
pub use get::get_item_data;
pub use search::search_items_data;
