//! Both stages end to end through JSONL files, with mock collaborators.

use injurylens_common::FileConfig;
use injurylens_scout::pipeline::{classify_stage, search_stage};
use injurylens_scout::sink::{read_items, LabelRecord};
use injurylens_scout::testing::{item, KeyedLabeler, MockSource};

const CONFIG: &str = r#"
    [search]
    channels = ["Parenting"]
    limit_per_query = 50

    [keywords]
    exclusions = ["lawyer"]

    [[keywords.events]]
    name = "fall"
    terms = ["fell", "fall"]

    [[keywords.events]]
    name = "burn"
    terms = ["burn", "scald"]

    [[keywords.ages]]
    name = "toddler"
    terms = ["toddler", "2 year old"]

    [classify]
    json_mode = true
    instruction_template = "Labels: {{labels}}\n{{text}}"

    [taxonomy]
    labels = ["fall", "burn", "other"]
"#;

fn config() -> FileConfig {
    let config: FileConfig = toml::from_str(CONFIG).unwrap();
    config.validate().unwrap();
    config
}

#[tokio::test]
async fn search_then_classify_through_files() {
    let dir = tempfile::tempdir().unwrap();
    let raw = dir.path().join("raw").join("run.jsonl.gz");
    let labels = dir.path().join("interim").join("run_labels.jsonl");
    let config = config();

    let source = MockSource::new()
        .on_query(
            "Parenting",
            "fall",
            vec![
                item("a", "Toddler fell off the bed", "email me: mom@example.com"),
                item("b", "Toddler fell, need a lawyer", ""),
                item("c", "I fell behind on laundry", ""),
            ],
        )
        .on_query("Parenting", "burn", vec![item("d", "2 year old burn from oven", "")]);

    let match_stats = search_stage(&config, &source, &raw).await.unwrap();
    assert_eq!(match_stats.matched, 2);
    assert_eq!(match_stats.excluded, 1);
    assert_eq!(match_stats.unmatched, 1);

    let items = read_items(&raw).unwrap();
    let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, ["a", "d"]);
    assert_eq!(items[0].body, "email me: [redacted-email]");

    let service = KeyedLabeler::new(r#"{"primary_injury_type": "other"}"#)
        .on("fell off the bed", r#"{"primary_injury_type": "fall", "rationale_short": "fell"}"#)
        .on("oven", r#"{"primary_injury_type": "Burn"}"#);
    let classify_stats = classify_stage(&config, items, &service, &labels).await.unwrap();
    assert_eq!(classify_stats.labeled, 2);

    let written: Vec<LabelRecord> = std::fs::read_to_string(&labels)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    let got: Vec<_> = written.iter().map(|r| (r.id.as_str(), r.label.as_str())).collect();
    assert_eq!(got, [("a", "fall"), ("d", "burn")]);
    assert_eq!(written[0].details.as_ref().unwrap()["rationale_short"], "fell");
}

#[tokio::test]
async fn invalid_configuration_fails_before_any_call() {
    let mut config = config();
    config.search.channels.clear();
    assert!(config.validate().is_err());

    let dir = tempfile::tempdir().unwrap();
    let source = MockSource::new();
    let result = search_stage(&config, &source, &dir.path().join("out.jsonl")).await;
    assert!(result.is_err());
    assert_eq!(source.pages_fetched(), 0);
}

#[tokio::test]
async fn classifying_again_replaces_earlier_labels() {
    let dir = tempfile::tempdir().unwrap();
    let labels = dir.path().join("run_labels.jsonl");
    let config = config();
    let service = KeyedLabeler::new(r#"{"primary_injury_type": "fall"}"#);

    for _ in 0..2 {
        let items = vec![item("a", "Toddler fell", ""), item("b", "Toddler fell again", "")];
        classify_stage(&config, items, &service, &labels).await.unwrap();
    }

    let ids: Vec<String> = std::fs::read_to_string(&labels)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str::<LabelRecord>(l).unwrap().id)
        .collect();
    assert_eq!(ids, ["a", "b"]);
}
