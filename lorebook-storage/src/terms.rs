//! Default derivation of tag postings and full-text terms from content.
//!
//! The field-configuration layer normally decides which properties are tags
//! and which are searchable. When no such projection is supplied, every
//! top-level array of strings is treated as a tag collection and every string
//! value in the document is searchable.

use crate::query_store::{FullTextTerm, TagPosting};
use std::collections::BTreeSet;

/// Gram sizes emitted for each word.
const GRAM_SIZES: [u32; 2] = [2, 3];

/// Tokenizes free text into n-gram terms.
///
/// Words are lowercased alphanumeric runs. Each word yields its character
/// bigrams and trigrams; single-character words yield one unigram. The output
/// is de-duplicated and sorted.
pub fn search_terms(text: &str) -> Vec<FullTextTerm> {
    let mut terms = BTreeSet::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let chars: Vec<char> = word.to_lowercase().chars().collect();
        if chars.len() == 1 {
            terms.insert((1, chars[0].to_string()));
            continue;
        }
        for n in GRAM_SIZES {
            let n_usize = n as usize;
            if chars.len() < n_usize {
                continue;
            }
            for window in chars.windows(n_usize) {
                terms.insert((n, window.iter().collect::<String>()));
            }
        }
    }
    terms
        .into_iter()
        .map(|(n_gram, token)| FullTextTerm { n_gram, token })
        .collect()
}

/// Full-text terms for every string value in a JSON document.
pub fn search_terms_for_content(content: &serde_json::Value) -> Vec<FullTextTerm> {
    let mut text = String::new();
    collect_text(content, &mut text);
    search_terms(&text)
}

/// Tag postings for every top-level array of strings.
pub fn derive_tag_postings(content: &serde_json::Value) -> Vec<TagPosting> {
    let Some(obj) = content.as_object() else {
        return Vec::new();
    };
    let mut postings = BTreeSet::new();
    for (property, value) in obj {
        if let Some(items) = value.as_array() {
            for item in items.iter().filter_map(|v| v.as_str()) {
                postings.insert((property.clone(), item.to_string()));
            }
        }
    }
    postings
        .into_iter()
        .map(|(property, value)| TagPosting { property, value })
        .collect()
}

fn collect_text(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::String(s) => {
            out.push(' ');
            out.push_str(s);
        }
        serde_json::Value::Array(items) => items.iter().for_each(|v| collect_text(v, out)),
        serde_json::Value::Object(map) => map.values().for_each(|v| collect_text(v, out)),
        _ => {}
    }
}
