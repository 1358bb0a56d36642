//! Tokenisation helpers shared by the backends and the ranking stages.

use std::collections::HashSet;

/// Words that carry no topical signal.
pub const STOP_WORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from",
    "how", "i", "in", "is", "it", "me", "my", "of", "on", "or", "that", "the", "this", "to",
    "was", "we", "what", "when", "where", "which", "who", "why", "with", "you",
];

/// Domain synonym pairs used by semantic matching and reranking.
pub const SYNONYM_PAIRS: &[(&str, &str)] = &[
    ("auth", "authentication"),
    ("bug", "defect"),
    ("config", "configuration"),
    ("config", "settings"),
    ("create", "add"),
    ("db", "database"),
    ("delete", "remove"),
    ("deploy", "release"),
    ("deploy", "rollout"),
    ("deployment", "release"),
    ("doc", "document"),
    ("docs", "documentation"),
    ("error", "exception"),
    ("error", "failure"),
    ("install", "setup"),
    ("search", "query"),
    ("server", "host"),
];

/// Lowercased alphanumeric tokens in order of appearance.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Returns `true` for stop words.
pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(&token)
}

/// Distinct non-stop-word query terms, in order of first appearance.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(query)
        .into_iter()
        .filter(|t| !is_stop_word(t))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Set of all lowercased tokens.
pub fn word_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// Jaccard similarity of two word sets. Two empty sets are identical.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 1.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Non-empty sentences, split on terminal punctuation and newlines.
pub fn sentences(text: &str) -> Vec<&str> {
    text.split(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Synonyms of `term` from [`SYNONYM_PAIRS`], in either direction.
pub fn synonyms_of(term: &str) -> impl Iterator<Item = &'static str> + '_ {
    SYNONYM_PAIRS.iter().filter_map(move |&(a, b)| {
        if a == term {
            Some(b)
        } else if b == term {
            Some(a)
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_lowercases_and_splits_on_punctuation() {
        assert_eq!(
            tokenize("Deploy the API-server, v2!"),
            ["deploy", "the", "api", "server", "v2"]
        );
        assert!(tokenize("  ...  ").is_empty());
    }

    #[test]
    fn query_terms_drop_stop_words_and_duplicates() {
        assert_eq!(
            query_terms("How to deploy the config for deploy"),
            ["deploy", "config"]
        );
        assert!(query_terms("the for a").is_empty());
    }

    #[test]
    fn jaccard_bounds() {
        let a = word_set("deploy config file");
        let b = word_set("deploy config file");
        let c = word_set("lunch menu");
        assert!((jaccard(&a, &b) - 1.0).abs() < f64::EPSILON);
        assert!(jaccard(&a, &c).abs() < f64::EPSILON);

        let d = word_set("deploy config");
        assert!((jaccard(&a, &d) - 2.0 / 3.0).abs() < 1e-9);
        assert!((jaccard(&HashSet::new(), &HashSet::new()) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn sentences_split_and_trim() {
        assert_eq!(
            sentences("First one. Second!\nThird?  "),
            ["First one", "Second", "Third"]
        );
    }

    #[test]
    fn synonyms_work_both_ways() {
        let forward: Vec<&str> = synonyms_of("config").collect();
        assert_eq!(forward, ["configuration", "settings"]);
        let backward: Vec<&str> = synonyms_of("database").collect();
        assert_eq!(backward, ["db"]);
        assert_eq!(synonyms_of("banana").count(), 0);
    }
}
