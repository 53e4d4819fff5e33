//! Retry and rate gating around the external collaborators, so the Matcher
//! and Classifier only ever see "got it" or "gave up".

mod rate_gate;
mod retry;

pub use rate_gate::RateGate;
pub use retry::RetryPolicy;

use std::sync::Arc;

use async_trait::async_trait;

use injurylens_common::{CallError, SearchQuery};

use crate::traits::{ItemSource, LabelService, Page};

/// Wraps an [`ItemSource`] or [`LabelService`]. Every attempt, retries
/// included, takes a token from the gate first.
pub struct Resilient<T> {
    inner: T,
    retry: RetryPolicy,
    gate: Option<Arc<RateGate>>,
}

impl<T> Resilient<T> {
    pub fn new(inner: T, retry: RetryPolicy) -> Self {
        Self {
            inner,
            retry,
            gate: None,
        }
    }

    pub fn with_gate(mut self, gate: Option<Arc<RateGate>>) -> Self {
        self.gate = gate;
        self
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<S: ItemSource> ItemSource for Resilient<S> {
    async fn fetch_page(&self, query: &SearchQuery, cursor: Option<&str>) -> Result<Page, CallError> {
        let inner = &self.inner;
        let gate = self.gate.as_deref();
        let what = format!("fetch {query}");
        self.retry
            .run(&what, || async move {
                if let Some(gate) = gate {
                    gate.acquire().await;
                }
                inner.fetch_page(query, cursor).await
            })
            .await
    }
}

#[async_trait]
impl<L: LabelService> LabelService for Resilient<L> {
    async fn label(&self, prompt: &str) -> Result<String, CallError> {
        let inner = &self.inner;
        let gate = self.gate.as_deref();
        self.retry
            .run("label", || async move {
                if let Some(gate) = gate {
                    gate.acquire().await;
                }
                inner.label(prompt).await
            })
            .await
    }
}
