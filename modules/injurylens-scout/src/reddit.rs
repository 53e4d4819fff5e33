use async_trait::async_trait;
use tracing::{debug, info};

use apify_client::{ApifyClient, ApifyError, RedditPost};
use injurylens_common::{CallError, Channel, Item, SearchQuery};

use crate::traits::{ItemSource, Page};

const DEFAULT_PAGE_SIZE: u32 = 100;

/// Reddit search through the Apify reddit-scraper actor.
///
/// The first page starts a run and waits for it; later pages read the run's
/// dataset. The cursor is `<dataset id>:<offset>`.
pub struct RedditApifySource {
    client: ApifyClient,
    page_size: u32,
}

impl RedditApifySource {
    pub fn new(client: ApifyClient) -> Self {
        Self {
            client,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

#[async_trait]
impl ItemSource for RedditApifySource {
    async fn fetch_page(&self, query: &SearchQuery, cursor: Option<&str>) -> Result<Page, CallError> {
        let (dataset, offset) = match cursor {
            None => {
                let run = self
                    .client
                    .run_reddit_search(query.channel.as_str(), &query.render(), query.limit)
                    .await
                    .map_err(call_error)?;
                (run.default_dataset_id, 0)
            }
            Some(cursor) => {
                let (dataset, offset) = parse_cursor(cursor)
                    .ok_or_else(|| CallError::Permanent(format!("invalid dataset cursor: {cursor}")))?;
                (dataset.to_string(), offset)
            }
        };

        let posts: Vec<RedditPost> = self
            .client
            .get_dataset_page(&dataset, offset, self.page_size)
            .await
            .map_err(call_error)?;

        let fetched = posts.len() as u32;
        let items: Vec<Item> = posts
            .into_iter()
            .filter_map(|post| post_to_item(post, &query.channel))
            .collect();

        info!(
            channel = %query.channel,
            event_group = query.event_group.as_str(),
            offset,
            fetched,
            kept = items.len(),
            "Fetched dataset page"
        );

        let next_cursor = (fetched == self.page_size).then(|| format!("{dataset}:{}", offset + fetched));
        Ok(Page { items, next_cursor })
    }
}

fn parse_cursor(cursor: &str) -> Option<(&str, u32)> {
    let (dataset, offset) = cursor.rsplit_once(':')?;
    if dataset.is_empty() {
        return None;
    }
    Some((dataset, offset.parse().ok()?))
}

/// Comments, and posts without an id or timestamp, are dropped.
fn post_to_item(post: RedditPost, fallback_channel: &Channel) -> Option<Item> {
    if !post.is_post() {
        return None;
    }
    let Some(id) = post.short_id().map(str::to_string) else {
        debug!(url = ?post.url, "Dropping post without id");
        return None;
    };
    let Some(created_at) = post.created() else {
        debug!(id = id.as_str(), "Dropping post without timestamp");
        return None;
    };
    let channel = post
        .community()
        .map(Channel::new)
        .unwrap_or_else(|| fallback_channel.clone());

    Some(Item {
        permalink: post
            .url
            .clone()
            .unwrap_or_else(|| format!("https://www.reddit.com/comments/{id}/")),
        id,
        title: post.title.unwrap_or_default(),
        body: post.body.unwrap_or_default(),
        channel,
        created_at,
        author: post.username,
        score: post.up_votes,
        num_comments: post.number_of_comments,
    })
}

fn call_error(err: ApifyError) -> CallError {
    if err.is_transient() {
        return CallError::Transient(err.to_string());
    }
    match err {
        ApifyError::Parse(_) | ApifyError::RunFailed(_) => CallError::Malformed(err.to_string()),
        _ => CallError::Permanent(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(json: serde_json::Value) -> RedditPost {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn converts_posts_and_drops_comments() {
        let channel = Channel::new("Parenting");
        let p = post(serde_json::json!({
            "id": "t3_abc",
            "parsedId": "abc",
            "url": "https://www.reddit.com/r/Parenting/comments/abc/x/",
            "username": "u1",
            "title": "Toddler fell",
            "body": "off the couch",
            "communityName": "r/Parenting",
            "upVotes": 12,
            "numberOfComments": 3,
            "createdAt": "2025-09-01T12:00:00.000Z",
            "dataType": "post"
        }));
        let item = post_to_item(p, &channel).unwrap();
        assert_eq!(item.id, "abc");
        assert_eq!(item.channel.as_str(), "Parenting");
        assert_eq!(item.score, Some(12));
        assert_eq!(item.created_at.to_rfc3339(), "2025-09-01T12:00:00+00:00");

        let comment = post(serde_json::json!({
            "id": "t1_def",
            "createdAt": "2025-09-01T12:00:00.000Z",
            "dataType": "comment"
        }));
        assert!(post_to_item(comment, &channel).is_none());

        let no_time = post(serde_json::json!({ "id": "t3_x", "dataType": "post" }));
        assert!(post_to_item(no_time, &channel).is_none());
    }

    #[test]
    fn cursor_round_trip() {
        assert_eq!(parse_cursor("ds123:200"), Some(("ds123", 200)));
        assert_eq!(parse_cursor("ds123"), None);
        assert_eq!(parse_cursor(":5"), None);
        assert_eq!(parse_cursor("ds:abc"), None);
    }

    #[test]
    fn apify_errors_map_to_call_errors() {
        let api = |status| ApifyError::Api {
            status,
            message: String::new(),
        };
        assert!(call_error(api(429)).is_transient());
        assert!(call_error(api(503)).is_transient());
        assert!(call_error(api(401)).is_permanent());
        assert!(call_error(ApifyError::Network("reset".into())).is_transient());
        assert!(matches!(call_error(ApifyError::Parse("bad".into())), CallError::Malformed(_)));
        assert!(call_error(ApifyError::RunFailed("TIMED-OUT".into())).is_transient());
        assert!(matches!(
            call_error(ApifyError::RunFailed("FAILED".into())),
            CallError::Malformed(_)
        ));
    }
}
