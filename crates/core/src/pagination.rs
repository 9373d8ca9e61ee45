//! Pagination header parsing for Zotero list responses.
//!
//! Zotero reports the result count in a `Total-Results` header and the next
//! page offset inside a `Link: <…?start=N>; rel="next"` header.

use std::collections::HashMap;

/// Read the total result count, when the upstream reported one.
///
/// `headers` must use lowercased names.
pub fn parse_total_results(headers: &HashMap<String, String>) -> Option<u64> {
    for name in ["total-results", "totalresults"] {
        if let Some(value) = headers.get(name) {
            return value.trim().parse().ok();
        }
    }
    None
}

/// Extract the `start` offset of the `rel="next"` link, when present.
pub fn parse_next_start(headers: &HashMap<String, String>) -> Option<u64> {
    let link = headers.get("link")?;
    for part in link.split(',') {
        let part = part.trim();
        if !part.contains("rel=\"next\"") {
            continue;
        }
        let index = part.find("start=")?;
        let digits: String = part[index + "start=".len()..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if !digits.is_empty() {
            return digits.parse().ok();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn total_results_parses() {
        let h = headers(&[("total-results", "42")]);
        assert_eq!(parse_total_results(&h), Some(42));
    }

    #[test]
    fn total_results_absent_or_invalid() {
        assert_eq!(parse_total_results(&headers(&[])), None);
        let h = headers(&[("total-results", "many")]);
        assert_eq!(parse_total_results(&h), None);
    }

    #[test]
    fn next_start_from_link_header() {
        let h = headers(&[(
            "link",
            "<https://api.zotero.org/users/1/items?start=50>; rel=\"next\", \
             <https://api.zotero.org/users/1/items?start=450>; rel=\"last\"",
        )]);
        assert_eq!(parse_next_start(&h), Some(50));
    }

    #[test]
    fn next_start_ignores_other_rels() {
        let h = headers(&[(
            "link",
            "<https://api.zotero.org/users/1/items?start=450>; rel=\"last\"",
        )]);
        assert_eq!(parse_next_start(&h), None);
    }

    #[test]
    fn next_start_without_link_header() {
        assert_eq!(parse_next_start(&headers(&[])), None);
    }
}
