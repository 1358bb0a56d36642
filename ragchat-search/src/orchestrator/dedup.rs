//! Cross-source de-duplication.
//!
//! Two results are the same document when their canonical URLs match.
//! Results without a URL only collapse with a result from the same source
//! carrying the same document id; ids are not comparable across sources.
//! Only the copy with the highest similarity survives; output keeps
//! first-seen order.
//!
//! URL canonicalisation drops the fragment, default ports, tracking
//! parameters and a trailing slash, and sorts the remaining query pairs.

use std::collections::HashMap;

use url::Url;

use crate::types::UnifiedSearchResult;

/// Query parameters that never identify content.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid",
    "gclid",
    "ref",
    "utm_campaign",
    "utm_content",
    "utm_medium",
    "utm_source",
    "utm_term",
];

/// Canonical form of `raw`, or `raw` itself when it does not parse.
pub fn canonical_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };
    url.set_fragment(None);
    if matches!((url.scheme(), url.port()), ("http", Some(80)) | ("https", Some(443))) {
        let _ = url.set_port(None);
    }

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.to_lowercase().as_str()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.sort();
    if params.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(params);
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }
    url.to_string()
}

/// Identity of a result for de-duplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    /// Canonical URL, shared across sources.
    Url(String),
    /// Document id, scoped to the source that returned it.
    Document {
        /// Source that returned the document.
        source: String,
        /// Document id within that source.
        id: String,
    },
}

/// Identity key of a result.
pub fn dedup_key(result: &UnifiedSearchResult) -> DedupKey {
    match result.document.url.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(url) => DedupKey::Url(canonical_url(url.trim())),
        None => DedupKey::Document {
            source: result.source.clone(),
            id: result.document.id.clone(),
        },
    }
}

/// Collapse duplicates, keeping the highest-similarity copy of each.
pub fn deduplicate(results: Vec<UnifiedSearchResult>) -> Vec<UnifiedSearchResult> {
    let before = results.len();
    let mut index: HashMap<DedupKey, usize> = HashMap::with_capacity(before);
    let mut kept: Vec<UnifiedSearchResult> = Vec::with_capacity(before);

    for result in results {
        let key = dedup_key(&result);
        match index.get(&key) {
            Some(&i) => {
                if result.similarity > kept[i].similarity {
                    kept[i] = result;
                }
            }
            None => {
                index.insert(key, kept.len());
                kept.push(result);
            }
        }
    }

    if kept.len() < before {
        tracing::debug!(before, after = kept.len(), "collapsed duplicate results");
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Document;

    fn hit(id: &str, url: Option<&str>, similarity: f64, source: &str) -> UnifiedSearchResult {
        let mut doc = Document::new(id, "content");
        doc.url = url.map(str::to_string);
        UnifiedSearchResult::new(doc, similarity, source)
    }

    #[test]
    fn canonical_url_strips_noise() {
        assert_eq!(
            canonical_url("HTTPS://Docs.Example.COM:443/guide/?utm_source=x&b=2&a=1#top"),
            "https://docs.example.com/guide?a=1&b=2"
        );
        assert_eq!(canonical_url("http://example.com:8080/"), "http://example.com:8080/");
        assert_eq!(canonical_url("not a url"), "not a url");
    }

    #[test]
    fn unique_results_pass_through_in_order() {
        let deduped = deduplicate(vec![
            hit("a", None, 0.4, "api"),
            hit("b", None, 0.9, "database"),
        ]);
        let ids: Vec<&str> = deduped.iter().map(|r| r.document.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn same_url_from_two_sources_keeps_best() {
        let deduped = deduplicate(vec![
            hit("api-17", Some("https://example.com/page/"), 0.6, "api"),
            hit("db-4", Some("https://example.com/page#intro"), 0.8, "database"),
        ]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].source, "database");
        assert!((deduped[0].similarity - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn same_id_within_one_source_collapses() {
        let deduped = deduplicate(vec![
            hit("doc1", None, 0.7, "api"),
            hit("doc1", None, 0.9, "api"),
        ]);
        assert_eq!(deduped.len(), 1);
        assert!((deduped[0].similarity - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn same_id_from_different_sources_is_kept_twice() {
        let mut api = hit("1", None, 0.9, "api");
        api.document.content = "deploy config api guide".into();
        let mut db = hit("1", None, 0.7, "database");
        db.document.content = "deploy config database row".into();

        let deduped = deduplicate(vec![api, db]);
        let sources: Vec<&str> = deduped.iter().map(|r| r.source.as_str()).collect();
        assert_eq!(sources, ["api", "database"]);
    }

    #[test]
    fn url_and_id_keys_do_not_collide() {
        let deduped = deduplicate(vec![
            hit("https://example.com/", None, 0.5, "api"),
            hit("other", Some("https://example.com/"), 0.5, "api"),
        ]);
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn empty_input() {
        assert!(deduplicate(Vec::new()).is_empty());
    }
}
