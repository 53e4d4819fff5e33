use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Search inputs ---

/// A content source to search, e.g. a subreddit name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Channel(String);

impl Channel {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named set of alternative terms. Matches text containing ANY term.
///
/// Terms are compared ASCII case-insensitively as plain substrings. Blank
/// terms are ignored, so a group with no usable terms matches nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordGroup {
    pub name: String,
    pub terms: Vec<String>,
    needles: Vec<String>,
}

impl KeywordGroup {
    pub fn new<S: Into<String>>(name: impl Into<String>, terms: impl IntoIterator<Item = S>) -> Self {
        let terms: Vec<String> = terms.into_iter().map(Into::into).collect();
        let needles = terms
            .iter()
            .map(|t| t.trim().to_ascii_lowercase())
            .collect();
        Self {
            name: name.into(),
            terms,
            needles,
        }
    }

    /// First term (as configured) found in `haystack`. The haystack must
    /// already be ASCII lower-cased, see [`Item::searchable_text`].
    pub fn first_hit(&self, haystack: &str) -> Option<&str> {
        self.needles
            .iter()
            .zip(&self.terms)
            .find(|(needle, _)| !needle.is_empty() && haystack.contains(needle.as_str()))
            .map(|(_, term)| term.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.needles.iter().all(|n| n.is_empty())
    }
}

/// One event group searched in one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    /// Position in the run's canonical query order.
    pub index: usize,
    pub channel: Channel,
    pub event_group: String,
    pub terms: Vec<String>,
    pub exclusions: Vec<String>,
    pub limit: u32,
}

impl SearchQuery {
    /// Reddit search syntax: quoted alternatives, self-posts only, NSFW
    /// filtered, exclusion terms negated.
    ///
    /// `("fell" OR "hit head") self:yes nsfw:no -lawyer -"sports team"`
    pub fn render(&self) -> String {
        let alternatives: Vec<String> = self
            .terms
            .iter()
            .map(|t| t.trim().replace('"', ""))
            .filter(|t| !t.is_empty())
            .map(|t| format!("\"{t}\""))
            .collect();

        let mut query = format!("({}) self:yes nsfw:no", alternatives.join(" OR "));
        for term in &self.exclusions {
            let term = term.trim().replace('"', "");
            if term.is_empty() {
                continue;
            }
            if term.contains(char::is_whitespace) {
                query.push_str(&format!(" -\"{term}\""));
            } else {
                query.push_str(&format!(" -{term}"));
            }
        }
        query
    }
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}/{}", self.index, self.channel, self.event_group)
    }
}

// --- Retrieved content ---

/// A retrieved post. Never mutated after retrieval; shared as `Arc<Item>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub channel: Channel,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub num_comments: Option<i64>,
}

impl Item {
    /// Title and body joined by a newline.
    pub fn text(&self) -> String {
        format!("{}\n{}", self.title, self.body)
    }

    /// [`Item::text`] lower-cased for keyword matching.
    pub fn searchable_text(&self) -> String {
        self.text().to_ascii_lowercase()
    }
}

/// An item that hit at least one event group and one age group.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub item: Arc<Item>,
    /// Query that first produced the item.
    pub query_index: usize,
    pub event_group: String,
    pub event_term: String,
    pub age_group: String,
    pub age_term: String,
}

// --- Classification ---

/// How a model response was mapped onto the taxonomy. `Fallback` means it
/// could not be mapped at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelMatch {
    Exact,
    Prefix,
    Contains,
    Fallback,
}

/// A taxonomy label, always one of the configured canonical strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationLabel {
    pub name: String,
    pub matched_by: LabelMatch,
}

impl ClassificationLabel {
    /// The taxonomy fallback, used when a response could not be mapped.
    pub fn unresolved(fallback: impl Into<String>) -> Self {
        Self {
            name: fallback.into(),
            matched_by: LabelMatch::Fallback,
        }
    }

    pub fn is_unresolved(&self) -> bool {
        self.matched_by == LabelMatch::Fallback
    }
}

/// An item paired with its resolved label. Terminal output of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedItem {
    pub item: Arc<Item>,
    pub label: ClassificationLabel,
    /// Verbatim service response, when one was received.
    pub raw_response: Option<String>,
    /// Why the service call failed, when it did.
    pub failure: Option<String>,
    /// Remaining fields of a JSON response.
    pub details: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_group_matches_any_term_case_insensitively() {
        let group = KeywordGroup::new("age", ["Toddler", "2 year old"]);
        assert_eq!(group.first_hit("my toddler fell"), Some("Toddler"));
        assert_eq!(group.first_hit("our 2 year old"), Some("2 year old"));
        assert_eq!(group.first_hit("our baby"), None);
    }

    #[test]
    fn empty_group_matches_nothing() {
        let none: [&str; 0] = [];
        assert!(KeywordGroup::new("none", none).first_hit("anything").is_none());
        let blank = KeywordGroup::new("blank", ["", "  "]);
        assert!(blank.is_empty());
        assert!(blank.first_hit("anything").is_none());
    }

    #[test]
    fn query_renders_reddit_syntax() {
        let query = SearchQuery {
            index: 0,
            channel: Channel::new("Parenting"),
            event_group: "fall".into(),
            terms: vec!["fell".into(), "hit head".into()],
            exclusions: vec!["lawyer".into(), "sports team".into()],
            limit: 10,
        };
        assert_eq!(
            query.render(),
            r#"("fell" OR "hit head") self:yes nsfw:no -lawyer -"sports team""#
        );
    }

    #[test]
    fn item_deserializes_with_missing_text() {
        let item: Item = serde_json::from_str(
            r#"{"id":"a1","channel":"Parenting","created_at":"2025-08-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(item.title, "");
        assert_eq!(item.body, "");
        assert_eq!(item.text(), "\n");
    }
}
