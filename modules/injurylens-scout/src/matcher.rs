use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use injurylens_common::{
    CallError, Channel, FileConfig, InjuryLensError, Item, KeywordGroup, MatchResult, SearchQuery,
};

use crate::crawl::crawl;
use crate::sink::MemorySink;
use crate::stats::MatchStats;
use crate::traits::{ItemSource, RecordSink};

/// Everything the Matcher needs, fixed for the whole run.
#[derive(Debug, Clone)]
pub struct MatcherConfig {
    pub channels: Vec<Channel>,
    pub event_groups: Vec<KeywordGroup>,
    pub age_groups: Vec<KeywordGroup>,
    pub exclusions: Vec<String>,
    pub limit_per_query: u32,
    /// Items created before this are skipped.
    pub cutoff: Option<DateTime<Utc>>,
    /// Queries fetched at once. Output order does not depend on it.
    pub concurrency: usize,
}

impl MatcherConfig {
    pub fn new(
        channels: Vec<Channel>,
        event_groups: Vec<KeywordGroup>,
        age_groups: Vec<KeywordGroup>,
        exclusions: Vec<String>,
    ) -> Self {
        Self {
            channels,
            event_groups,
            age_groups,
            exclusions,
            limit_per_query: 100,
            cutoff: None,
            concurrency: 1,
        }
    }

    pub fn from_file(config: &FileConfig) -> Self {
        Self {
            limit_per_query: config.search.limit_per_query,
            cutoff: config.cutoff(),
            concurrency: config.search.concurrency,
            ..Self::new(
                config.channels(),
                config.event_groups(),
                config.age_groups(),
                config.keywords.exclusions.clone(),
            )
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit_per_query = limit;
        self
    }

    pub fn with_cutoff(mut self, cutoff: DateTime<Utc>) -> Self {
        self.cutoff = Some(cutoff);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Canonical query order: channels outer, event groups inner. Groups
    /// with no usable terms match nothing and are never searched.
    pub fn queries(&self) -> Vec<SearchQuery> {
        self.channels
            .iter()
            .flat_map(|channel| {
                self.event_groups
                    .iter()
                    .filter(|group| !group.is_empty())
                    .map(move |group| (channel, group))
            })
            .enumerate()
            .map(|(index, (channel, group))| SearchQuery {
                index,
                channel: channel.clone(),
                event_group: group.name.clone(),
                terms: group.terms.clone(),
                exclusions: self.exclusions.clone(),
                limit: self.limit_per_query,
            })
            .collect()
    }
}

/// Which group and term hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit {
    pub group: String,
    pub term: String,
}

/// Outcome of testing one item against the keyword groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub event: Option<Hit>,
    pub age: Option<Hit>,
    /// The exclusion term found, if any.
    pub excluded_by: Option<String>,
}

impl Verdict {
    pub fn is_match(&self) -> bool {
        self.event.is_some() && self.age.is_some() && self.excluded_by.is_none()
    }
}

/// Output of [`Matcher::run`].
#[derive(Debug, Default)]
pub struct MatchRun {
    pub results: Vec<MatchResult>,
    pub stats: MatchStats,
}

/// Retrieves candidates for every (channel, event group) query and keeps
/// the ones that mention an injury event and a young child, minus exclusions.
pub struct Matcher {
    config: MatcherConfig,
    exclusion_needles: Vec<(String, String)>,
}

struct QueryFetch {
    items: Vec<Item>,
    error: Option<CallError>,
}

impl Matcher {
    pub fn new(config: MatcherConfig) -> Result<Self, InjuryLensError> {
        if config.channels.is_empty() {
            return Err(InjuryLensError::Config("no channels to search".into()));
        }
        if config.event_groups.iter().all(KeywordGroup::is_empty) {
            return Err(InjuryLensError::Config("no usable event groups".into()));
        }
        if config.age_groups.iter().all(KeywordGroup::is_empty) {
            return Err(InjuryLensError::Config("no usable age groups".into()));
        }

        let exclusion_needles = config
            .exclusions
            .iter()
            .map(|t| (t.trim().to_ascii_lowercase(), t.clone()))
            .filter(|(needle, _)| !needle.is_empty())
            .collect();

        Ok(Self {
            config,
            exclusion_needles,
        })
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Test an item without a query context: the first matching event group
    /// in configuration order is recorded.
    pub fn evaluate(&self, item: &Item) -> Verdict {
        self.evaluate_with(item, None)
    }

    /// Prefers `preferred_event` when that group matches, so a result records
    /// the group whose query found it.
    fn evaluate_with(&self, item: &Item, preferred_event: Option<&str>) -> Verdict {
        let text = item.searchable_text();

        let first_hit = |groups: &[KeywordGroup]| {
            groups.iter().find_map(|g| {
                g.first_hit(&text).map(|term| Hit {
                    group: g.name.clone(),
                    term: term.to_string(),
                })
            })
        };

        let preferred = preferred_event.and_then(|name| {
            self.config
                .event_groups
                .iter()
                .find(|g| g.name == name)
                .and_then(|g| {
                    g.first_hit(&text).map(|term| Hit {
                        group: g.name.clone(),
                        term: term.to_string(),
                    })
                })
        });

        let excluded_by = self
            .exclusion_needles
            .iter()
            .find(|(needle, _)| text.contains(needle.as_str()))
            .map(|(_, term)| term.clone());

        Verdict {
            event: preferred.or_else(|| first_hit(&self.config.event_groups)),
            age: first_hit(&self.config.age_groups),
            excluded_by,
        }
    }

    /// Run every query and collect the matches in canonical order.
    pub async fn run(&self, source: &dyn ItemSource) -> Result<MatchRun, InjuryLensError> {
        let mut sink: MemorySink<MatchResult> = MemorySink::new();
        let stats = self.run_into(source, &mut sink).await?;
        Ok(MatchRun {
            results: sink.into_records(),
            stats,
        })
    }

    /// Like [`Matcher::run`], handing each match to `sink` as soon as its
    /// position in the output order is settled.
    pub async fn run_into(
        &self,
        source: &dyn ItemSource,
        sink: &mut dyn RecordSink<MatchResult>,
    ) -> Result<MatchStats, InjuryLensError> {
        let queries = self.config.queries();
        let mut stats = MatchStats {
            queries_total: queries.len() as u32,
            ..Default::default()
        };
        let mut seen: HashSet<String> = HashSet::new();
        let mut last_error: Option<CallError> = None;

        info!(
            queries = queries.len(),
            channels = self.config.channels.len(),
            concurrency = self.config.concurrency,
            "Starting search"
        );

        let mut fetches = stream::iter(queries.iter())
            .map(|query| async move { (query, Self::fetch(source, query).await) })
            .buffered(self.config.concurrency.max(1));

        while let Some((query, fetch)) = fetches.next().await {
            match fetch.error {
                Some(CallError::Permanent(msg)) => {
                    if let Err(e) = sink.finish() {
                        warn!(error = %e, "Failed to flush output after abort");
                    }
                    return Err(InjuryLensError::SourcePermanent(format!("{query}: {msg}")));
                }
                Some(e) => {
                    warn!(
                        channel = %query.channel,
                        event_group = query.event_group.as_str(),
                        kept = fetch.items.len(),
                        error = %e,
                        "Query failed, skipping"
                    );
                    stats.queries_failed += 1;
                    last_error = Some(e);
                }
                None => stats.queries_ok += 1,
            }

            let before = stats.matched;
            for item in fetch.items {
                if let Some(result) = self.consider(item, query, &mut seen, &mut stats) {
                    sink.accept(&result)?;
                }
            }
            debug!(
                channel = %query.channel,
                event_group = query.event_group.as_str(),
                matched = stats.matched - before,
                "Query done"
            );
        }

        if stats.queries_ok == 0 {
            return Err(InjuryLensError::SourceUnreachable {
                queries: queries.len(),
                last_error: last_error.map(|e| e.to_string()).unwrap_or_default(),
            });
        }

        sink.finish()?;
        info!(
            retrieved = stats.items_retrieved,
            matched = stats.matched,
            duplicates = stats.duplicates,
            failed_queries = stats.queries_failed,
            "Search complete"
        );
        Ok(stats)
    }

    /// Drain one query's crawl. Items retrieved before an error are kept.
    async fn fetch(source: &dyn ItemSource, query: &SearchQuery) -> QueryFetch {
        let mut items = Vec::new();
        let mut pages = Box::pin(crawl(source, query));
        while let Some(next) = pages.next().await {
            match next {
                Ok(item) => items.push(item),
                Err(error) => {
                    return QueryFetch {
                        items,
                        error: Some(error),
                    }
                }
            }
        }
        QueryFetch { items, error: None }
    }

    fn consider(
        &self,
        item: Item,
        query: &SearchQuery,
        seen: &mut HashSet<String>,
        stats: &mut MatchStats,
    ) -> Option<MatchResult> {
        stats.items_retrieved += 1;

        if let Some(cutoff) = self.config.cutoff {
            if item.created_at < cutoff {
                stats.too_old += 1;
                return None;
            }
        }

        let verdict = self.evaluate_with(&item, Some(&query.event_group));
        let (event, age) = match verdict {
            Verdict {
                excluded_by: Some(term),
                ..
            } => {
                debug!(id = item.id.as_str(), term = term.as_str(), "Excluded");
                stats.excluded += 1;
                return None;
            }
            Verdict {
                event: Some(event),
                age: Some(age),
                ..
            } => (event, age),
            _ => {
                stats.unmatched += 1;
                return None;
            }
        };

        if !seen.insert(item.id.clone()) {
            debug!(id = item.id.as_str(), query = %query, "Duplicate suppressed");
            stats.duplicates += 1;
            return None;
        }

        stats.matched += 1;
        Some(MatchResult {
            item: Arc::new(item),
            query_index: query.index,
            event_group: event.group,
            event_term: event.term,
            age_group: age.group,
            age_term: age.term,
        })
    }
}
