// Test doubles for the two collaborator seams.
//
// - MockSource (ItemSource): (channel, event group) → canned items, paged
// - EchoLabeler (LabelService): same response for every prompt
// - ScriptedLabeler (LabelService): responses in call order
// - KeyedLabeler (LabelService): response chosen by a substring of the prompt
//
// Plus item constructors with sensible defaults.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use injurylens_common::{CallError, Channel, Item, SearchQuery};

use crate::traits::{ItemSource, LabelService, Page};

pub const TEST_CHANNEL: &str = "Parenting";

// ---------------------------------------------------------------------------
// Item helpers
// ---------------------------------------------------------------------------

pub fn test_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 1, 12, 0, 0).unwrap()
}

pub fn item(id: &str, title: &str, body: &str) -> Item {
    item_in(TEST_CHANNEL, id, title, body)
}

pub fn item_in(channel: &str, id: &str, title: &str, body: &str) -> Item {
    Item {
        id: id.to_string(),
        title: title.to_string(),
        body: body.to_string(),
        channel: Channel::new(channel),
        created_at: test_time(),
        author: Some("someone".to_string()),
        permalink: format!("https://www.reddit.com/r/{channel}/comments/{id}/"),
        score: Some(1),
        num_comments: Some(0),
    }
}

pub fn item_created(id: &str, title: &str, body: &str, created_at: DateTime<Utc>) -> Item {
    Item {
        created_at,
        ..item(id, title, body)
    }
}

// ---------------------------------------------------------------------------
// MockSource
// ---------------------------------------------------------------------------

/// Canned results per (channel, event group). Unregistered queries return an
/// empty page. Cursors are plain offsets.
pub struct MockSource {
    results: HashMap<(String, String), Result<Vec<Item>, CallError>>,
    delays: HashMap<(String, String), Duration>,
    page_size: usize,
    pages_fetched: AtomicUsize,
    queries_seen: Mutex<Vec<String>>,
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSource {
    pub fn new() -> Self {
        Self {
            results: HashMap::new(),
            delays: HashMap::new(),
            page_size: usize::MAX,
            pages_fetched: AtomicUsize::new(0),
            queries_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn on_query(mut self, channel: &str, event_group: &str, items: Vec<Item>) -> Self {
        self.results
            .insert((channel.to_string(), event_group.to_string()), Ok(items));
        self
    }

    pub fn fail_query(mut self, channel: &str, event_group: &str, error: CallError) -> Self {
        self.results
            .insert((channel.to_string(), event_group.to_string()), Err(error));
        self
    }

    /// Delay every page of one query, to shuffle completion order.
    pub fn delay(mut self, channel: &str, event_group: &str, delay: Duration) -> Self {
        self.delays
            .insert((channel.to_string(), event_group.to_string()), delay);
        self
    }

    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched.load(Ordering::SeqCst)
    }

    /// Rendered query strings, in call order.
    pub fn queries_seen(&self) -> Vec<String> {
        self.queries_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ItemSource for MockSource {
    async fn fetch_page(&self, query: &SearchQuery, cursor: Option<&str>) -> Result<Page, CallError> {
        let key = (query.channel.to_string(), query.event_group.clone());
        if let Some(delay) = self.delays.get(&key) {
            tokio::time::sleep(*delay).await;
        }
        self.pages_fetched.fetch_add(1, Ordering::SeqCst);
        self.queries_seen.lock().unwrap().push(query.render());

        let items = match self.results.get(&key) {
            None => return Ok(Page::default()),
            Some(Err(e)) => return Err(e.clone()),
            Some(Ok(items)) => items,
        };

        let offset: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let end = offset.saturating_add(self.page_size).min(items.len());
        let page = items.get(offset..end).unwrap_or_default().to_vec();
        let next_cursor = (end < items.len()).then(|| end.to_string());
        Ok(Page {
            items: page,
            next_cursor,
        })
    }
}

// ---------------------------------------------------------------------------
// Labelers
// ---------------------------------------------------------------------------

/// Returns the same response for every prompt.
pub struct EchoLabeler {
    response: String,
    calls: AtomicUsize,
}

impl EchoLabeler {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LabelService for EchoLabeler {
    async fn label(&self, _prompt: &str) -> Result<String, CallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }
}

/// Plays back responses in call order. Once the script runs out every call
/// returns `exhausted`.
pub struct ScriptedLabeler {
    script: Mutex<VecDeque<Result<String, CallError>>>,
    exhausted: Result<String, CallError>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLabeler {
    pub fn new(script: Vec<Result<String, CallError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            exhausted: Err(CallError::Malformed("script exhausted".into())),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn then_always(mut self, response: Result<String, CallError>) -> Self {
        self.exhausted = response;
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl LabelService for ScriptedLabeler {
    async fn label(&self, prompt: &str) -> Result<String, CallError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.exhausted.clone())
    }
}

/// Picks the first rule whose needle appears in the prompt. Order-independent,
/// so it is safe under concurrency.
pub struct KeyedLabeler {
    rules: Vec<(String, Result<String, CallError>, Duration)>,
    default: Result<String, CallError>,
    calls: AtomicUsize,
}

impl KeyedLabeler {
    pub fn new(default: &str) -> Self {
        Self {
            rules: Vec::new(),
            default: Ok(default.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn on(self, needle: &str, response: &str) -> Self {
        self.on_result(needle, Ok(response.to_string()), Duration::ZERO)
    }

    pub fn on_slow(self, needle: &str, response: &str, delay: Duration) -> Self {
        self.on_result(needle, Ok(response.to_string()), delay)
    }

    pub fn on_result(mut self, needle: &str, response: Result<String, CallError>, delay: Duration) -> Self {
        self.rules.push((needle.to_string(), response, delay));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LabelService for KeyedLabeler {
    async fn label(&self, prompt: &str) -> Result<String, CallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.rules.iter().find(|(needle, _, _)| prompt.contains(needle.as_str())) {
            Some((_, response, delay)) => {
                if !delay.is_zero() {
                    tokio::time::sleep(*delay).await;
                }
                response.clone()
            }
            None => self.default.clone(),
        }
    }
}
