// Stage wiring shared by the CLI subcommands.
//
// build_source / build_labeler turn config + secrets into production
// collaborators wrapped in retry and rate gating. search_stage and
// classify_stage take any collaborator, so tests drive them with mocks.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use ai_client::OpenAi;
use apify_client::ApifyClient;
use injurylens_common::{AppConfig, FileConfig, Item};

use crate::classifier::{Classifier, ClassifierConfig};
use crate::labeler::ModelLabeler;
use crate::matcher::{Matcher, MatcherConfig};
use crate::reddit::RedditApifySource;
use crate::resilience::{RateGate, Resilient, RetryPolicy};
use crate::sink::JsonlSink;
use crate::stats::{ClassifyStats, MatchStats};
use crate::traits::{ItemSource, LabelService};

pub type ProductionSource = Resilient<RedditApifySource>;
pub type ProductionLabeler = Resilient<ModelLabeler<OpenAi>>;

pub fn build_source(config: &FileConfig, app: &AppConfig) -> Result<ProductionSource> {
    let mut client = ApifyClient::new(app.require_apify_key()?.to_string());
    if let Some(url) = &app.apify_base_url {
        client = client.with_base_url(url.clone());
    }
    let gate = RateGate::per_minute("apify", config.search.requests_per_minute).map(Arc::new);

    Ok(Resilient::new(
        RedditApifySource::new(client),
        RetryPolicy::from_config(&config.search.retry),
    )
    .with_gate(gate))
}

pub fn build_labeler(config: &FileConfig, app: &AppConfig) -> Result<ProductionLabeler> {
    let classify = &config.classify;
    let mut model = OpenAi::new(app.require_openai_key()?, classify.model.clone())
        .with_json_mode(classify.json_mode)
        .with_timeout(Duration::from_secs(classify.request_timeout_secs))
        .context("Failed to build OpenAI client")?;
    if let Some(url) = &app.openai_base_url {
        model = model.with_base_url(url.clone());
    }
    if let Some(cap) = classify.max_output_tokens {
        model = model.with_max_output_tokens(cap);
    }

    let retry = RetryPolicy::from_config(&classify.retry());
    let gate = RateGate::per_minute("openai", classify.requests_per_minute).map(Arc::new);

    info!(model = classify.model.as_str(), json_mode = classify.json_mode, "Label service ready");
    Ok(Resilient::new(ModelLabeler::new(model).with_system_prompt(classify.system_prompt.clone()), retry).with_gate(gate))
}

/// Search every channel and append matches to `out`.
pub async fn search_stage(config: &FileConfig, source: &dyn ItemSource, out: &Path) -> Result<MatchStats> {
    let matcher = Matcher::new(MatcherConfig::from_file(config))?;
    let mut sink = JsonlSink::create(out)?;
    let stats = matcher.run_into(source, &mut sink).await?;
    Ok(stats)
}

/// Label `items` and write the results to `out`, replacing any earlier
/// labels there.
pub async fn classify_stage(
    config: &FileConfig,
    items: Vec<Item>,
    service: &dyn LabelService,
    out: &Path,
) -> Result<ClassifyStats> {
    let classifier = Classifier::new(ClassifierConfig::from_file(config)?);
    let mut sink = JsonlSink::create_new(out)?;
    let stats = classifier
        .classify_into(items.into_iter().map(Arc::new), service, &mut sink)
        .await?;
    Ok(stats)
}
