//! Search helpers: identifier detection, exact-match filtering, sort keys.
//!
//! Queries that are really a DOI or an arXiv identifier get narrowed to an
//! exact match: the query is normalized before hitting the upstream, and the
//! returned page is filtered down to items whose DOI / archive id (including
//! `DOI:` / `arXiv:` lines buried in the `extra` field) match exactly.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::ZoteroError;
use crate::items::{ZoteroItem, ZoteroItemData};

/// Sort keys the upstream accepts.
pub const KNOWN_SORT_VALUES: [&str; 12] = [
    "relevance",
    "dateAdded",
    "dateModified",
    "title",
    "creator",
    "date",
    "publisher",
    "publicationTitle",
    "itemType",
    "numChildren",
    "numTags",
    "language",
];

pub const DEFAULT_SORT: &str = "relevance";

/// Substituted once when the upstream rejects the requested sort key.
pub const FALLBACK_SORT: &str = "dateModified";

const DOI_PREFIXES: [&str; 5] = [
    "doi:",
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
];

static DOI_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^10\.\d{4,9}/[-._;()/:A-Z0-9]+$").unwrap());
static ARXIV_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:https?://)?(?:www\.)?arxiv\.org/(?:abs|pdf)/(.+)").unwrap());
static ARXIV_URL_FULL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:https?://)?(?:www\.)?arxiv\.org/(?:abs|pdf)/(.+)$").unwrap());
static ARXIV_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?P<core>[a-z\-]+/\d{7}|\d{4}\.\d{4,5})(?P<version>v\d+)?$").unwrap()
});
static ARXIV_EXTRA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:^|\s)arxiv(?:\s*id)?\s*[:=]\s*(\S+)").unwrap());
static DOI_EXTRA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:^|\s)doi\s*[:=]\s*(\S+)").unwrap());

/// Map a sort value onto its canonical casing, if it is a known key.
pub fn canonical_sort_value(value: &str) -> Option<&'static str> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    KNOWN_SORT_VALUES
        .iter()
        .find(|known| known.eq_ignore_ascii_case(value))
        .copied()
}

/// Strip DOI prefixes and lowercase.
pub fn normalize_doi(value: &str) -> String {
    let raw = value.trim();
    let lowered = raw.to_lowercase();
    for prefix in DOI_PREFIXES {
        if lowered.starts_with(prefix) {
            return raw[prefix.len()..].trim().to_lowercase();
        }
    }
    lowered
}

/// Detect a query that is exactly one DOI, returning it normalized.
pub fn extract_exact_doi_query(query: &str) -> Option<String> {
    let raw = query.trim();
    if raw.is_empty() {
        return None;
    }
    let lowered = raw.to_lowercase();
    let mut candidate = raw;
    for prefix in DOI_PREFIXES {
        if lowered.starts_with(prefix) {
            candidate = raw[prefix.len()..].trim();
            break;
        }
    }
    if candidate.is_empty() || candidate.chars().any(char::is_whitespace) {
        return None;
    }
    if !DOI_ID_RE.is_match(candidate) {
        return None;
    }
    Some(normalize_doi(candidate))
}

/// A parsed arXiv identifier: the core id plus an optional `vN` version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArxivId {
    pub core: String,
    pub version: Option<String>,
}

impl ArxivId {
    /// The canonical textual form, version included when known.
    pub fn canonical(&self) -> String {
        match &self.version {
            Some(version) => format!("{}{}", self.core, version),
            None => self.core.clone(),
        }
    }
}

fn parse_arxiv_candidate(raw: &str, full_match_only: bool) -> Option<ArxivId> {
    let mut raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw
        .get(..6)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("arxiv:"))
    {
        raw = raw[6..].trim();
    }
    let url_re: &Regex = if full_match_only {
        &ARXIV_URL_FULL_RE
    } else {
        &ARXIV_URL_RE
    };
    let from_url;
    if let Some(captures) = url_re.captures(raw) {
        from_url = captures.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        raw = from_url;
    }
    if raw.is_empty() || raw.chars().any(char::is_whitespace) {
        return None;
    }
    let without_pdf = raw
        .strip_suffix(".pdf")
        .or_else(|| raw.strip_suffix(".PDF"))
        .unwrap_or(raw)
        .trim();
    let captures = ARXIV_ID_RE.captures(without_pdf)?;
    Some(ArxivId {
        core: captures["core"].to_lowercase(),
        version: captures.name("version").map(|m| m.as_str().to_lowercase()),
    })
}

/// Parse an arXiv id from an identifier, `arXiv:` form, or abs/pdf URL.
pub fn parse_arxiv_id(value: &str) -> Option<ArxivId> {
    parse_arxiv_candidate(value, false)
}

/// Detect a query that is exactly one arXiv identifier or URL.
pub fn extract_exact_arxiv_query(query: &str) -> Option<ArxivId> {
    parse_arxiv_candidate(query, true)
}

/// Canonical PDF URL for an arXiv id.
pub fn build_arxiv_pdf_url(arxiv_id: &ArxivId) -> String {
    format!("https://arxiv.org/pdf/{}.pdf", arxiv_id.canonical())
}

/// Normalize the attach-tool argument into a parsed id, erroring on garbage.
pub fn normalize_arxiv_id(value: &str) -> Result<ArxivId, ZoteroError> {
    if value.trim().is_empty() {
        return Err(ZoteroError::validation(
            "arxiv_id is required and must be a non-empty string.",
        ));
    }
    parse_arxiv_id(value).ok_or_else(|| {
        ZoteroError::validation("arxiv_id must be a valid arXiv identifier or URL.")
    })
}

fn item_matches_doi(data: &ZoteroItemData, normalized_doi: &str) -> bool {
    if !data.doi.is_empty() && normalize_doi(&data.doi) == normalized_doi {
        return true;
    }
    DOI_EXTRA_RE
        .captures_iter(&data.extra)
        .any(|captures| normalize_doi(&captures[1]) == normalized_doi)
}

fn item_matches_arxiv(data: &ZoteroItemData, target: &ArxivId) -> bool {
    let mut candidates: Vec<&str> = Vec::new();
    if !data.archive_id.trim().is_empty() {
        candidates.push(data.archive_id.as_str());
    }
    candidates.extend(
        ARXIV_EXTRA_RE
            .captures_iter(&data.extra)
            .filter_map(|captures| captures.get(1).map(|m| m.as_str())),
    );
    candidates.into_iter().any(|candidate| {
        parse_arxiv_id(candidate).is_some_and(|parsed| {
            parsed.core == target.core
                && (target.version.is_none() || parsed.version == target.version)
        })
    })
}

/// Keep only the items matching an exact DOI and/or arXiv id.
pub fn filter_items_exact_match(
    items: Vec<ZoteroItem>,
    doi: Option<&str>,
    arxiv: Option<&ArxivId>,
) -> Vec<ZoteroItem> {
    items
        .into_iter()
        .filter(|item| {
            if let Some(doi) = doi {
                if !item_matches_doi(&item.data, doi) {
                    return false;
                }
            }
            if let Some(arxiv) = arxiv {
                if !item_matches_arxiv(&item.data, arxiv) {
                    return false;
                }
            }
            true
        })
        .collect()
}
