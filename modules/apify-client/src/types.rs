use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Input for the trudax/reddit-scraper-lite actor in search mode.
///
/// One run searches a single community for a single query; the actor walks
/// Reddit's search pages itself and writes posts into the run's dataset.
#[derive(Debug, Clone, Serialize)]
pub struct RedditSearchInput {
    pub searches: Vec<String>,
    #[serde(rename = "searchCommunityName", skip_serializing_if = "Option::is_none")]
    pub search_community_name: Option<String>,
    #[serde(rename = "searchPosts")]
    pub search_posts: bool,
    #[serde(rename = "searchComments")]
    pub search_comments: bool,
    #[serde(rename = "searchCommunities")]
    pub search_communities: bool,
    #[serde(rename = "skipComments")]
    pub skip_comments: bool,
    #[serde(rename = "includeNSFW")]
    pub include_nsfw: bool,
    pub sort: String,
    pub time: String,
    #[serde(rename = "maxItems")]
    pub max_items: u32,
}

impl RedditSearchInput {
    /// Post-only search of one community, newest first, across all time.
    pub fn posts_in_community(community: &str, query: &str, max_items: u32) -> Self {
        Self {
            searches: vec![query.to_string()],
            search_community_name: Some(community.to_string()),
            search_posts: true,
            search_comments: false,
            search_communities: false,
            skip_comments: true,
            include_nsfw: false,
            sort: "new".to_string(),
            time: "all".to_string(),
            max_items,
        }
    }
}

/// A single Reddit record from the Apify dataset.
#[derive(Debug, Clone, Deserialize)]
pub struct RedditPost {
    pub id: Option<String>,
    #[serde(rename = "parsedId")]
    pub parsed_id: Option<String>,
    pub url: Option<String>,
    pub username: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
    #[serde(rename = "communityName")]
    pub community_name: Option<String>,
    #[serde(rename = "parsedCommunityName")]
    pub parsed_community_name: Option<String>,
    #[serde(rename = "upVotes")]
    pub up_votes: Option<i64>,
    #[serde(rename = "numberOfComments")]
    pub number_of_comments: Option<i64>,
    #[serde(rename = "createdAt")]
    pub created_at: Option<String>,
    #[serde(rename = "over18")]
    pub over_18: Option<bool>,
    /// Apify returns "community", "post", or "comment". Used to filter out non-posts.
    #[serde(rename = "dataType")]
    pub data_type: Option<String>,
}

impl RedditPost {
    pub fn is_post(&self) -> bool {
        self.data_type.as_deref() == Some("post")
    }

    /// Reddit's short id ("abc123"), preferring the parsed form over the
    /// fullname ("t3_abc123").
    pub fn short_id(&self) -> Option<&str> {
        self.parsed_id
            .as_deref()
            .or(self.id.as_deref().map(|id| id.trim_start_matches("t3_")))
            .filter(|id| !id.is_empty())
    }

    /// Community name without the "r/" prefix.
    pub fn community(&self) -> Option<&str> {
        self.parsed_community_name.as_deref().or(self
            .community_name
            .as_deref()
            .map(|name| name.trim_start_matches("r/")))
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.created_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Wrapper for Apify API responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

/// Apify actor run metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct RunData {
    pub id: String,
    pub status: String,
    #[serde(rename = "defaultDatasetId")]
    pub default_dataset_id: String,
    #[serde(rename = "startedAt")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(rename = "finishedAt")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reddit_dataset_record_parses() {
        let raw = r#"{
            "id": "t3_1abcde",
            "parsedId": "1abcde",
            "url": "https://www.reddit.com/r/Parenting/comments/1abcde/toddler_fell/",
            "username": "someone",
            "title": "Toddler fell off the couch",
            "body": "She is fine now",
            "communityName": "r/Parenting",
            "parsedCommunityName": "Parenting",
            "upVotes": 12,
            "numberOfComments": 4,
            "createdAt": "2025-08-03T10:15:00.000Z",
            "over18": false,
            "dataType": "post"
        }"#;
        let post: RedditPost = serde_json::from_str(raw).unwrap();
        assert!(post.is_post());
        assert_eq!(post.short_id(), Some("1abcde"));
        assert_eq!(post.community(), Some("Parenting"));
        assert_eq!(post.created().unwrap().timestamp(), 1754216100);
    }

    #[test]
    fn short_id_falls_back_to_fullname() {
        let post: RedditPost =
            serde_json::from_str(r#"{"id": "t3_xyz", "communityName": "r/Mommit"}"#).unwrap();
        assert_eq!(post.short_id(), Some("xyz"));
        assert_eq!(post.community(), Some("Mommit"));
        assert!(!post.is_post());
        assert!(post.created().is_none());
    }

    #[test]
    fn search_input_serializes_actor_field_names() {
        let input = RedditSearchInput::posts_in_community("Parenting", "\"fell\"", 10);
        let json = serde_json::to_value(&input).unwrap();
        assert_eq!(json["searchCommunityName"], "Parenting");
        assert_eq!(json["maxItems"], 10);
        assert_eq!(json["includeNSFW"], false);
        assert_eq!(json["sort"], "new");
    }
}
