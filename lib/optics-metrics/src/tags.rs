//! Tagged metric identities.
//!
//! The instrument registry is a flat table keyed by strings, with no notion of tags. To carry dimensional data through
//! it anyway, a metric name and its tags are encoded into a single key of the form `name#key1=value1,key2=value2`, with
//! tags always sorted by key so that the same identity always maps to the same registry key, regardless of the order in
//! which tags were added.
//!
//! Only a restricted character set survives encoding (see the `sanitize_*` functions), but no escaping is performed:
//! a tag value containing `#`, `,` or `=` that bypassed sanitization will not decode back to the same identity.

use std::{borrow::Cow, collections::BTreeMap, fmt};

use tracing::warn;

/// Separates the metric name from its encoded tags.
pub const NAME_TAGS_SEPARATOR: char = '#';

/// Separates individual tag pairs.
pub const TAG_PAIR_SEPARATOR: char = ',';

/// Separates a tag name from its value.
pub const TAG_KV_SEPARATOR: char = '=';

/// Maximum length, in characters, of a metric name.
pub const MAX_METRIC_NAME_LEN: usize = 255;

/// Maximum length, in characters, of a tag name.
pub const MAX_TAG_NAME_LEN: usize = 64;

/// Maximum length, in characters, of a tag value.
pub const MAX_TAG_VALUE_LEN: usize = 255;

const TRUNCATION_MARKER: &str = "...";
const REPLACEMENT_CHAR: char = '_';

/// A set of tags, ordered by tag name.
pub type Tags = BTreeMap<String, String>;

/// A metric name plus its tags.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct MetricIdentity {
    name: String,
    tags: Tags,
}

impl MetricIdentity {
    /// Creates a new `MetricIdentity` from the given name and tags.
    ///
    /// No sanitization is performed.
    pub fn new<N>(name: N, tags: Tags) -> Self
    where
        N: Into<String>,
    {
        Self {
            name: name.into(),
            tags,
        }
    }

    /// Returns the metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the tags.
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Consumes the identity, returning the name and tags.
    pub fn into_parts(self) -> (String, Tags) {
        (self.name, self.tags)
    }

    /// Encodes this identity into a flat registry key.
    ///
    /// When there are no tags, the key is just the metric name, with no trailing separator.
    pub fn encode(&self) -> String {
        encode(&self.name, &self.tags)
    }

    /// Decodes a registry key back into an identity.
    ///
    /// Everything up to the first `#` is the name. Tag pairs which lack a `=` are logged and skipped.
    pub fn decode(encoded: &str) -> Self {
        let (name, tags) = decode(encoded);
        Self { name, tags }
    }
}

impl fmt::Display for MetricIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Encodes a metric name and tags into a flat registry key.
pub fn encode(name: &str, tags: &Tags) -> String {
    if tags.is_empty() {
        return name.to_string();
    }

    let encoded_len = name.len() + tags.iter().map(|(k, v)| k.len() + v.len() + 2).sum::<usize>();
    let mut encoded = String::with_capacity(encoded_len);
    encoded.push_str(name);
    encoded.push(NAME_TAGS_SEPARATOR);

    // `BTreeMap` iterates in key order, which is what keeps the encoding deterministic.
    for (i, (key, value)) in tags.iter().enumerate() {
        if i != 0 {
            encoded.push(TAG_PAIR_SEPARATOR);
        }
        encoded.push_str(key);
        encoded.push(TAG_KV_SEPARATOR);
        encoded.push_str(value);
    }

    encoded
}

/// Decodes a flat registry key into a metric name and tags.
pub fn decode(encoded: &str) -> (String, Tags) {
    let mut tags = Tags::new();

    let (name, raw_tags) = match encoded.split_once(NAME_TAGS_SEPARATOR) {
        Some((name, raw_tags)) => (name, raw_tags),
        None => return (encoded.to_string(), tags),
    };

    for pair in raw_tags.split(TAG_PAIR_SEPARATOR) {
        if pair.is_empty() {
            continue;
        }

        match pair.split_once(TAG_KV_SEPARATOR) {
            Some((key, value)) => {
                tags.insert(key.to_string(), value.to_string());
            }
            None => warn!(metric_name = name, tag_name = pair, "Tag is missing its value. Skipping."),
        }
    }

    (name.to_string(), tags)
}

/// Sanitizes a metric name.
///
/// Names longer than 255 characters are truncated with a trailing `...`, and any character that is not an ASCII
/// letter, digit, `-`, `.`, `:` or `_` is replaced with `_`. Case is preserved.
pub fn sanitize_metric_name(name: &str) -> String {
    let name = truncate_with_marker(name, MAX_METRIC_NAME_LEN);
    replace_disallowed(&name, is_name_char)
}

/// Sanitizes a tag name.
///
/// Names are cut to 64 characters, lowercased, and any character outside of ASCII letters, digits, `-`, `.`, `:` and
/// `_` is replaced with `_`.
pub fn sanitize_tag_name(name: &str) -> String {
    let name = match name.char_indices().nth(MAX_TAG_NAME_LEN) {
        Some((idx, _)) => &name[..idx],
        None => name,
    };
    replace_disallowed(&name.to_ascii_lowercase(), is_name_char)
}

/// Sanitizes a tag value.
///
/// Values longer than 255 characters are truncated with a trailing `...`, lowercased, and any character outside of
/// ASCII letters, digits, `-`, `.`, `:`, `_`, `/`, `\`, `?` and space is replaced with `_`.
pub fn sanitize_tag_value(value: &str) -> String {
    let value = truncate_with_marker(value, MAX_TAG_VALUE_LEN);
    replace_disallowed(&value.to_ascii_lowercase(), is_tag_value_char)
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | ':' | '_')
}

fn is_tag_value_char(c: char) -> bool {
    is_name_char(c) || matches!(c, '/' | '\\' | '?' | ' ')
}

fn truncate_with_marker(value: &str, max_len: usize) -> Cow<'_, str> {
    match value.char_indices().nth(max_len) {
        Some(_) => {
            let keep = max_len - TRUNCATION_MARKER.len();
            let mut truncated = value.chars().take(keep).collect::<String>();
            truncated.push_str(TRUNCATION_MARKER);
            Cow::Owned(truncated)
        }
        None => Cow::Borrowed(value),
    }
}

fn replace_disallowed(value: &str, allowed: fn(char) -> bool) -> String {
    value
        .chars()
        .map(|c| if allowed(c) { c } else { REPLACEMENT_CHAR })
        .collect()
}
