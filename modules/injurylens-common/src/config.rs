use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

use crate::error::InjuryLensError;
use crate::taxonomy::Taxonomy;
use crate::template::PromptTemplate;
use crate::types::{Channel, KeywordGroup};

/// Placeholders an instruction template may use.
pub const TEMPLATE_VARS: &[&str] = &["text", "title", "body", "channel", "labels"];

/// Upper bound on per-item label retries.
pub const MAX_LABEL_RETRIES: u32 = 2;

// =============================================================================
// File configuration (TOML)
// =============================================================================

/// TOML-backed run configuration. Secrets stay in the environment, see
/// [`AppConfig`].
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub search: SearchConfig,
    pub keywords: KeywordsConfig,
    #[serde(default)]
    pub classify: ClassifyConfig,
    pub taxonomy: TaxonomyConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchConfig {
    pub channels: Vec<String>,
    #[serde(default = "default_limit_per_query")]
    pub limit_per_query: u32,
    /// Items created before this date are ignored.
    #[serde(default)]
    pub cutoff_date: Option<NaiveDate>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// 0 disables the rate gate.
    #[serde(default = "default_search_rpm")]
    pub requests_per_minute: u32,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_source_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_source_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeywordGroupConfig {
    pub name: String,
    pub terms: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeywordsConfig {
    pub events: Vec<KeywordGroupConfig>,
    pub ages: Vec<KeywordGroupConfig>,
    #[serde(default)]
    pub exclusions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassifyConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_instruction_template")]
    pub instruction_template: String,
    /// Ask the model for a JSON object and read the label from `label_field`.
    #[serde(default = "default_true")]
    pub json_mode: bool,
    #[serde(default = "default_label_field")]
    pub label_field: String,
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    #[serde(default = "default_label_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_label_rpm")]
    pub requests_per_minute: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Completion token cap. Unset leaves reasoning models uncapped.
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    /// Stop starting new items after this many seconds.
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            system_prompt: default_system_prompt(),
            instruction_template: default_instruction_template(),
            json_mode: true,
            label_field: default_label_field(),
            max_input_chars: default_max_input_chars(),
            max_retries: default_label_retries(),
            retry_base_delay_ms: default_base_delay_ms(),
            retry_max_delay_ms: default_max_delay_ms(),
            max_consecutive_failures: default_max_consecutive_failures(),
            concurrency: default_concurrency(),
            requests_per_minute: default_label_rpm(),
            request_timeout_secs: default_request_timeout_secs(),
            max_output_tokens: None,
            run_timeout_secs: None,
        }
    }
}

impl ClassifyConfig {
    /// Backoff settings for label calls.
    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_delay_ms: self.retry_base_delay_ms,
            max_delay_ms: self.retry_max_delay_ms,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaxonomyConfig {
    pub labels: Vec<String>,
    #[serde(default = "default_fallback")]
    pub fallback: String,
}

fn default_limit_per_query() -> u32 {
    100
}
fn default_concurrency() -> usize {
    1
}
fn default_search_rpm() -> u32 {
    50
}
fn default_label_rpm() -> u32 {
    120
}
fn default_source_retries() -> u32 {
    3
}
fn default_label_retries() -> u32 {
    2
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    12_000
}
fn default_model() -> String {
    "gpt-5-nano".to_string()
}
fn default_true() -> bool {
    true
}
fn default_label_field() -> String {
    "primary_injury_type".to_string()
}
fn default_max_input_chars() -> usize {
    4000
}
fn default_max_consecutive_failures() -> u32 {
    3
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_fallback() -> String {
    "unknown".to_string()
}

fn default_system_prompt() -> String {
    "You code social-media posts for a child-injury surveillance study.\n\
     Decide whether the post describes a real, accidental injury to a young child \
     and name the injury type. Metaphors (\"fell behind\"), hypotheticals, \
     advice-only threads and adult injuries are not injury events.\n\
     When unsure, answer with the fallback label."
        .to_string()
}

fn default_instruction_template() -> String {
    "Classify this post from r/{{channel}}.\n\n\
     {{text}}\n\n\
     Return a single JSON object with these keys:\n\
     {\n  \"is_injury_event\": boolean,\n  \"primary_injury_type\": one of [{{labels}}],\n  \
     \"rationale_short\": string (at most 280 characters, paraphrase only)\n}\n\
     No prose. No code fences. JSON only."
        .to_string()
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: FileConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(config)
}

impl FileConfig {
    pub fn channels(&self) -> Vec<Channel> {
        self.search.channels.iter().map(|c| Channel::new(c.trim())).collect()
    }

    pub fn event_groups(&self) -> Vec<KeywordGroup> {
        self.keywords
            .events
            .iter()
            .map(|g| KeywordGroup::new(g.name.clone(), g.terms.iter().cloned()))
            .collect()
    }

    pub fn age_groups(&self) -> Vec<KeywordGroup> {
        self.keywords
            .ages
            .iter()
            .map(|g| KeywordGroup::new(g.name.clone(), g.terms.iter().cloned()))
            .collect()
    }

    pub fn cutoff(&self) -> Option<DateTime<Utc>> {
        self.search
            .cutoff_date
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    }

    pub fn taxonomy(&self) -> Result<Taxonomy, InjuryLensError> {
        Taxonomy::new(self.taxonomy.labels.iter().cloned(), self.taxonomy.fallback.clone())
    }

    pub fn instruction_template(&self) -> Result<PromptTemplate, InjuryLensError> {
        PromptTemplate::parse(&self.classify.instruction_template, TEMPLATE_VARS, &["text"])
    }

    /// Check everything that can be checked before the first network call.
    pub fn validate(&self) -> Result<(), InjuryLensError> {
        let config_err = |msg: &str| Err(InjuryLensError::Config(msg.to_string()));

        if self.search.channels.iter().all(|c| c.trim().is_empty()) {
            return config_err("search.channels must list at least one channel");
        }
        if self.search.channels.iter().any(|c| c.trim().is_empty()) {
            return config_err("search.channels contains a blank entry");
        }
        if self.search.limit_per_query == 0 {
            return config_err("search.limit_per_query must be greater than 0");
        }
        if self.search.concurrency == 0 || self.classify.concurrency == 0 {
            return config_err("concurrency must be at least 1");
        }
        if self.event_groups().iter().all(KeywordGroup::is_empty) {
            return config_err("keywords.events must contain at least one non-empty group");
        }
        if self.age_groups().iter().all(KeywordGroup::is_empty) {
            return config_err("keywords.ages must contain at least one non-empty group");
        }
        if self.classify.max_input_chars == 0 {
            return config_err("classify.max_input_chars must be greater than 0");
        }
        if self.classify.max_retries > MAX_LABEL_RETRIES {
            return Err(InjuryLensError::Config(format!(
                "classify.max_retries must be between 0 and {MAX_LABEL_RETRIES}"
            )));
        }
        if self.classify.max_consecutive_failures == 0 {
            return config_err("classify.max_consecutive_failures must be at least 1");
        }
        if self.classify.json_mode && self.classify.label_field.trim().is_empty() {
            return config_err("classify.label_field must be set when json_mode is on");
        }
        self.taxonomy()?;
        self.instruction_template()?;
        Ok(())
    }
}

// =============================================================================
// Environment configuration (secrets)
// =============================================================================

/// Secrets and endpoint overrides loaded from the environment (and `.env`).
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub apify_api_key: Option<String>,
    pub apify_base_url: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let config = Self {
            apify_api_key: non_empty_env("APIFY_API_KEY"),
            apify_base_url: non_empty_env("APIFY_BASE_URL"),
            openai_api_key: non_empty_env("OPENAI_API_KEY"),
            openai_base_url: non_empty_env("OPENAI_BASE_URL"),
        };

        config.log_keys();
        config
    }

    pub fn require_apify_key(&self) -> Result<&str, InjuryLensError> {
        self.apify_api_key
            .as_deref()
            .ok_or_else(|| InjuryLensError::Config("APIFY_API_KEY is not set".into()))
    }

    pub fn require_openai_key(&self) -> Result<&str, InjuryLensError> {
        self.openai_api_key
            .as_deref()
            .ok_or_else(|| InjuryLensError::Config("OPENAI_API_KEY is not set".into()))
    }

    fn log_keys(&self) {
        fn preview(val: &Option<String>) -> String {
            match val {
                Some(v) => {
                    let n = v.len().min(5);
                    format!("{}...", &v[..n])
                }
                None => "(not set)".to_string(),
            }
        }

        info!(
            apify = %preview(&self.apify_api_key),
            openai = %preview(&self.openai_api_key),
            "Loaded API keys"
        );
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [search]
        channels = ["Parenting"]
        limit_per_query = 10
        cutoff_date = "2025-08-01"

        [keywords]
        exclusions = ["lawyer"]

        [[keywords.events]]
        name = "fall"
        terms = ["fell", "fall"]

        [[keywords.ages]]
        name = "toddler"
        terms = ["toddler"]

        [taxonomy]
        labels = ["fall", "burn"]
    "#;

    fn parse(src: &str) -> FileConfig {
        toml::from_str(src).unwrap()
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse(MINIMAL);
        config.validate().unwrap();
        assert_eq!(config.classify.max_retries, 2);
        assert_eq!(config.classify.max_consecutive_failures, 3);
        assert_eq!(config.search.retry.max_retries, 3);
        assert_eq!(config.taxonomy.fallback, "unknown");
        assert_eq!(
            config.cutoff().unwrap().to_rfc3339(),
            "2025-08-01T00:00:00+00:00"
        );
    }

    #[test]
    fn rejects_unknown_fields() {
        let src = MINIMAL.replace("limit_per_query = 10", "limit_per_query = 10\nlimt = 3");
        assert!(toml::from_str::<FileConfig>(&src).is_err());
    }

    #[test]
    fn empty_channel_list_is_a_config_error() {
        let config = parse(&MINIMAL.replace(r#"channels = ["Parenting"]"#, "channels = []"));
        assert!(matches!(config.validate(), Err(InjuryLensError::Config(_))));
    }

    #[test]
    fn empty_taxonomy_is_a_config_error() {
        let config = parse(&MINIMAL.replace(r#"labels = ["fall", "burn"]"#, "labels = []"));
        assert!(matches!(config.validate(), Err(InjuryLensError::Config(_))));
    }

    #[test]
    fn template_without_text_is_a_config_error() {
        let src = format!("{MINIMAL}\n[classify]\ninstruction_template = \"Classify: {{{{title}}}}\"\n");
        let config = parse(&src);
        assert!(matches!(config.validate(), Err(InjuryLensError::Config(_))));
    }

    #[test]
    fn label_retries_are_capped() {
        let src = format!("{MINIMAL}\n[classify]\nmax_retries = 5\n");
        assert!(parse(&src).validate().is_err());
    }

    #[test]
    fn label_backoff_comes_from_classify_section() {
        let src = format!(
            "{MINIMAL}\n[classify]\nretry_base_delay_ms = 250\nretry_max_delay_ms = 2000\n"
        );
        let config = parse(&src);
        let retry = config.classify.retry();
        assert_eq!(retry.max_retries, 2);
        assert_eq!(retry.base_delay_ms, 250);
        assert_eq!(retry.max_delay_ms, 2000);
        assert_eq!(config.search.retry.max_delay_ms, 12_000);
    }

    #[test]
    fn default_template_is_valid() {
        PromptTemplate::parse(&default_instruction_template(), TEMPLATE_VARS, &["text"]).unwrap();
    }
}
