//! Stage 2: ask the label service for an injury type per matched item and
//! map the answer onto the closed taxonomy.

pub mod parse;
pub mod prompt;

pub use parse::{parse_response, resolve_label, ParsedResponse};
pub use prompt::{truncate_at_word_boundary, PromptBuilder};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use injurylens_common::{
    AnnotatedItem, CallError, ClassificationLabel, FileConfig, InjuryLensError, Item, PromptTemplate,
    Taxonomy,
};

use crate::sink::MemorySink;
use crate::stats::ClassifyStats;
use crate::traits::{LabelService, RecordSink};

const PROGRESS_EVERY: u32 = 25;

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub taxonomy: Taxonomy,
    pub template: PromptTemplate,
    pub max_input_chars: usize,
    /// JSON field holding the label. `None` reads the whole response as text.
    pub label_field: Option<String>,
    /// Consecutive unreachable-service failures before the batch aborts.
    pub max_consecutive_failures: u32,
    pub concurrency: usize,
    /// No new item is started once this much time has passed.
    pub run_timeout: Option<Duration>,
}

impl ClassifierConfig {
    pub fn new(taxonomy: Taxonomy, template: PromptTemplate) -> Self {
        Self {
            taxonomy,
            template,
            max_input_chars: 4000,
            label_field: None,
            max_consecutive_failures: 3,
            concurrency: 1,
            run_timeout: None,
        }
    }

    pub fn from_file(config: &FileConfig) -> Result<Self, InjuryLensError> {
        let classify = &config.classify;
        Ok(Self {
            max_input_chars: classify.max_input_chars,
            label_field: classify.json_mode.then(|| classify.label_field.clone()),
            max_consecutive_failures: classify.max_consecutive_failures,
            concurrency: classify.concurrency,
            run_timeout: classify.run_timeout_secs.map(Duration::from_secs),
            ..Self::new(config.taxonomy()?, config.instruction_template()?)
        })
    }

    pub fn with_label_field(mut self, field: impl Into<String>) -> Self {
        self.label_field = Some(field.into());
        self
    }

    pub fn with_max_input_chars(mut self, max: usize) -> Self {
        self.max_input_chars = max;
        self
    }

    pub fn with_max_consecutive_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = max;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }
}

/// Output of [`Classifier::classify`].
#[derive(Debug, Default)]
pub struct ClassifyRun {
    pub annotated: Vec<AnnotatedItem>,
    pub stats: ClassifyStats,
}

enum Attempt {
    NotStarted,
    Done {
        item: Arc<Item>,
        result: Result<String, CallError>,
    },
}

pub struct Classifier {
    config: ClassifierConfig,
    prompts: PromptBuilder,
}

impl Classifier {
    pub fn new(config: ClassifierConfig) -> Self {
        let prompts = PromptBuilder::new(config.template.clone(), &config.taxonomy, config.max_input_chars);
        Self { config, prompts }
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.config.taxonomy
    }

    pub fn prompt_for(&self, item: &Item) -> String {
        self.prompts.render(item)
    }

    /// Resolve one raw response to a label and optional structured details.
    pub fn interpret(&self, raw: &str) -> (ClassificationLabel, Option<serde_json::Value>) {
        let parsed = parse_response(raw, self.config.label_field.as_deref());
        let label = resolve_label(&self.config.taxonomy, &parsed.label_text);
        (label, parsed.details)
    }

    /// Label every item, in input order.
    pub async fn classify<I>(&self, items: I, service: &dyn LabelService) -> Result<ClassifyRun, InjuryLensError>
    where
        I: IntoIterator<Item = Arc<Item>>,
    {
        let mut sink: MemorySink<AnnotatedItem> = MemorySink::new();
        let stats = self.classify_into(items, service, &mut sink).await?;
        Ok(ClassifyRun {
            annotated: sink.into_records(),
            stats,
        })
    }

    /// Like [`Classifier::classify`], handing each annotated item to `sink`
    /// in input order. Items already handed over stay written if the batch
    /// aborts.
    pub async fn classify_into<I>(
        &self,
        items: I,
        service: &dyn LabelService,
        sink: &mut dyn RecordSink<AnnotatedItem>,
    ) -> Result<ClassifyStats, InjuryLensError>
    where
        I: IntoIterator<Item = Arc<Item>>,
    {
        let batch = self.label_batch(items.into_iter().collect(), service, sink).await?;
        let stats = batch.stats;

        if let Some(error) = batch.aborted {
            warn!(
                labeled = stats.labeled,
                failed = stats.failed,
                discarded = stats.discarded,
                not_started = stats.not_started,
                "Classification aborted"
            );
            if let Err(e) = sink.finish() {
                warn!(error = %e, "Failed to flush output after abort");
            }
            return Err(error);
        }

        sink.finish()?;
        info!(
            labeled = stats.labeled,
            unresolved = stats.unresolved,
            failed = stats.failed,
            not_started = stats.not_started,
            "Classification complete"
        );
        Ok(stats)
    }

    async fn label_batch(
        &self,
        items: Vec<Arc<Item>>,
        service: &dyn LabelService,
        sink: &mut dyn RecordSink<AnnotatedItem>,
    ) -> Result<Batch, InjuryLensError> {
        let mut stats = ClassifyStats {
            items_total: items.len() as u32,
            ..Default::default()
        };

        let started = Instant::now();
        let deadline = self.config.run_timeout.map(|t| started + t);
        let stop = AtomicBool::new(false);
        let stop = &stop;

        info!(
            items = items.len(),
            concurrency = self.config.concurrency,
            labels = self.config.taxonomy.labels().len(),
            "Starting classification"
        );

        let mut attempts = stream::iter(items)
            .map(|item| async move {
                if stop.load(Ordering::SeqCst) {
                    return Attempt::NotStarted;
                }
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    stop.store(true, Ordering::SeqCst);
                    return Attempt::NotStarted;
                }
                let prompt = self.prompt_for(&item);
                let result = service.label(&prompt).await;
                Attempt::Done { item, result }
            })
            .buffered(self.config.concurrency.max(1));

        let mut consecutive: u32 = 0;
        let mut aborted: Option<InjuryLensError> = None;
        let mut deadline_logged = false;

        while let Some(attempt) = attempts.next().await {
            let (item, result) = match attempt {
                Attempt::NotStarted => {
                    stats.not_started += 1;
                    if aborted.is_none() && !deadline_logged {
                        warn!(
                            elapsed_secs = started.elapsed().as_secs(),
                            "Run timeout reached, not starting remaining items"
                        );
                        deadline_logged = true;
                    }
                    continue;
                }
                Attempt::Done { .. } if aborted.is_some() => {
                    // Finished after the abort; not written.
                    stats.discarded += 1;
                    continue;
                }
                Attempt::Done { item, result } => (item, result),
            };

            let annotated = match result {
                Ok(raw) => {
                    consecutive = 0;
                    let (label, details) = self.interpret(&raw);
                    if label.is_unresolved() {
                        warn!(
                            id = item.id.as_str(),
                            response = raw.as_str(),
                            fallback = label.name.as_str(),
                            "Unrecognized label, using fallback"
                        );
                        stats.unresolved += 1;
                    }
                    stats.labeled += 1;
                    *stats.by_label.entry(label.name.clone()).or_default() += 1;
                    AnnotatedItem {
                        item,
                        label,
                        raw_response: Some(raw),
                        failure: None,
                        details,
                    }
                }
                Err(CallError::Permanent(msg)) => {
                    stats.discarded += 1;
                    stop.store(true, Ordering::SeqCst);
                    aborted = Some(InjuryLensError::LabelServicePermanent(msg));
                    continue;
                }
                Err(e) => {
                    if e.is_transient() {
                        consecutive += 1;
                    } else {
                        consecutive = 0;
                    }
                    warn!(id = item.id.as_str(), error = %e, consecutive, "Label call failed");
                    stats.failed += 1;

                    if consecutive >= self.config.max_consecutive_failures {
                        stop.store(true, Ordering::SeqCst);
                        aborted = Some(InjuryLensError::LabelServiceUnreachable {
                            consecutive,
                            last_error: e.to_string(),
                        });
                    }
                    AnnotatedItem {
                        item,
                        label: ClassificationLabel::unresolved(self.config.taxonomy.fallback()),
                        raw_response: None,
                        failure: Some(e.to_string()),
                        details: None,
                    }
                }
            };

            sink.accept(&annotated)?;

            let done = stats.completed();
            if done % PROGRESS_EVERY == 0 {
                info!(done, total = stats.items_total, "Classification progress");
            }
        }

        Ok(Batch { stats, aborted })
    }
}

struct Batch {
    stats: ClassifyStats,
    aborted: Option<InjuryLensError>,
}
