// Collaborator seams for the two stages.
//
// ItemSource — paged content search (Reddit via Apify in production).
// LabelService — prompt in, free-text label out (chat completions in production).
// RecordSink — where finished records go, one at a time.
//
// MockSource and the scripted labelers in `testing` implement these so the
// Matcher and Classifier run without network access.

use async_trait::async_trait;

use injurylens_common::{CallError, InjuryLensError, Item, SearchQuery};

/// One page of search results. `next_cursor` is `None` on the last page.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<Item>,
    pub next_cursor: Option<String>,
}

impl Page {
    pub fn last(items: Vec<Item>) -> Self {
        Self {
            items,
            next_cursor: None,
        }
    }
}

#[async_trait]
pub trait ItemSource: Send + Sync {
    /// Fetch one page of results for `query`. `cursor` is `None` for the
    /// first page, then whatever the previous page returned.
    async fn fetch_page(&self, query: &SearchQuery, cursor: Option<&str>) -> Result<Page, CallError>;
}

#[async_trait]
pub trait LabelService: Send + Sync {
    /// Send one rendered prompt, return the raw response text.
    async fn label(&self, prompt: &str) -> Result<String, CallError>;
}

/// Accepts finished records in output order.
pub trait RecordSink<T>: Send {
    fn accept(&mut self, record: &T) -> Result<(), InjuryLensError>;

    /// Flush buffered output. Called once after the last record.
    fn finish(&mut self) -> Result<(), InjuryLensError> {
        Ok(())
    }
}

#[async_trait]
impl<S: ItemSource + ?Sized> ItemSource for std::sync::Arc<S> {
    async fn fetch_page(&self, query: &SearchQuery, cursor: Option<&str>) -> Result<Page, CallError> {
        (**self).fetch_page(query, cursor).await
    }
}

#[async_trait]
impl<L: LabelService + ?Sized> LabelService for std::sync::Arc<L> {
    async fn label(&self, prompt: &str) -> Result<String, CallError> {
        (**self).label(prompt).await
    }
}
