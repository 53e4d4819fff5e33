use ai_client::{extract_json_object, strip_code_blocks};
use serde_json::{Map, Value};

use injurylens_common::{normalize_label, ClassificationLabel, LabelMatch, Taxonomy};

const RATIONALE_FIELD: &str = "rationale_short";
const MAX_RATIONALE_CHARS: usize = 280;

/// The part of a response that names the label, plus any other JSON fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub label_text: String,
    pub details: Option<Value>,
}

/// Pull the label text out of a raw response.
///
/// With a `label_field`, a JSON object anywhere in the response is read and
/// the label taken from that field; the other fields become details. A
/// response without a JSON object is treated as free text.
pub fn parse_response(raw: &str, label_field: Option<&str>) -> ParsedResponse {
    let text = strip_code_blocks(raw);

    let object = label_field.and_then(|field| {
        let json = extract_json_object(text)?;
        match serde_json::from_str::<Value>(json) {
            Ok(Value::Object(map)) => Some((field, map)),
            _ => None,
        }
    });

    let Some((field, mut map)) = object else {
        return ParsedResponse {
            label_text: text.to_string(),
            details: None,
        };
    };

    let label_text = match map.remove(field) {
        Some(Value::String(s)) => s,
        _ => String::new(),
    };
    clip_rationale(&mut map);

    ParsedResponse {
        label_text,
        details: (!map.is_empty()).then_some(Value::Object(map)),
    }
}

fn clip_rationale(map: &mut Map<String, Value>) {
    if let Some(Value::String(rationale)) = map.get_mut(RATIONALE_FIELD) {
        if rationale.chars().count() > MAX_RATIONALE_CHARS {
            *rationale = rationale.chars().take(MAX_RATIONALE_CHARS).collect();
        }
    }
}

/// Map free text onto the taxonomy: exact, then prefix, then contains, else
/// the fallback.
pub fn resolve_label(taxonomy: &Taxonomy, response: &str) -> ClassificationLabel {
    let response = normalize_label(response);
    if response.is_empty() {
        return ClassificationLabel::unresolved(taxonomy.fallback());
    }

    let found = |name: &str, matched_by| ClassificationLabel {
        name: name.to_string(),
        matched_by,
    };

    if let Some((name, _)) = taxonomy.entries().find(|(_, norm)| *norm == response) {
        return found(name, LabelMatch::Exact);
    }

    let response = words(&response);

    // "fracture of the arm" starts with "fracture"; "frac" starts "fracture".
    let mut prefix: Option<(&str, usize)> = None;
    for (name, norm) in taxonomy.entries() {
        let norm = words(norm);
        let hit = response.starts_with(&format!("{norm} "))
            || (response.len() >= 3 && norm.starts_with(response.as_str()));
        if hit && prefix.is_none_or(|(_, len)| norm.len() > len) {
            prefix = Some((name, norm.len()));
        }
    }
    if let Some((name, _)) = prefix {
        return found(name, LabelMatch::Prefix);
    }

    // Whole-word occurrence: earliest wins, then the longer label.
    let padded = format!(" {response} ");
    let mut contained: Option<(&str, usize, usize)> = None;
    for (name, norm) in taxonomy.entries() {
        let norm = words(norm);
        let Some(pos) = padded.find(&format!(" {norm} ")) else {
            continue;
        };
        let better = match contained {
            None => true,
            Some((_, best_pos, best_len)) => pos < best_pos || (pos == best_pos && norm.len() > best_len),
        };
        if better {
            contained = Some((name, pos, norm.len()));
        }
    }
    if let Some((name, _, _)) = contained {
        return found(name, LabelMatch::Contains);
    }

    ClassificationLabel::unresolved(taxonomy.fallback())
}

/// Alphanumeric runs joined by single spaces.
fn words(text: &str) -> String {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taxonomy() -> Taxonomy {
        Taxonomy::new(["burn", "fracture", "laceration", "head_injury", "none"], "none").unwrap()
    }

    fn resolve(text: &str) -> (String, LabelMatch) {
        let label = resolve_label(&taxonomy(), text);
        (label.name, label.matched_by)
    }

    #[test]
    fn exact_match_ignores_case_and_punctuation() {
        assert_eq!(resolve("Fracture."), ("fracture".into(), LabelMatch::Exact));
        assert_eq!(resolve("  BURN  "), ("burn".into(), LabelMatch::Exact));
        assert_eq!(resolve("head-injury"), ("head_injury".into(), LabelMatch::Exact));
    }

    #[test]
    fn prefix_match_either_direction() {
        assert_eq!(resolve("Fracture of the wrist"), ("fracture".into(), LabelMatch::Prefix));
        assert_eq!(resolve("lacer"), ("laceration".into(), LabelMatch::Prefix));
        assert_eq!(resolve("head injury, minor"), ("head_injury".into(), LabelMatch::Prefix));
        assert_eq!(resolve("Burn: second degree"), ("burn".into(), LabelMatch::Prefix));
        // Too short to count as an abbreviation.
        assert_eq!(resolve("bu").1, LabelMatch::Fallback);
    }

    #[test]
    fn contains_prefers_earliest_whole_word() {
        assert_eq!(resolve("Likely a burn, maybe a fracture"), ("burn".into(), LabelMatch::Contains));
        assert_eq!(resolve("I would say laceration"), ("laceration".into(), LabelMatch::Contains));
        // "burned" is not the word "burn".
        assert_eq!(resolve("the child burned toast").1, LabelMatch::Fallback);
    }

    #[test]
    fn gibberish_and_empty_fall_back() {
        assert_eq!(resolve("qwerty zxcv"), ("none".into(), LabelMatch::Fallback));
        assert_eq!(resolve(""), ("none".into(), LabelMatch::Fallback));
        assert_eq!(resolve("..."), ("none".into(), LabelMatch::Fallback));
    }

    #[test]
    fn json_response_reads_label_field() {
        let raw = r#"{"is_injury_event": true, "primary_injury_type": "fall", "rationale_short": "fell off couch"}"#;
        let parsed = parse_response(raw, Some("primary_injury_type"));
        assert_eq!(parsed.label_text, "fall");
        let details = parsed.details.unwrap();
        assert_eq!(details["is_injury_event"], true);
        assert_eq!(details["rationale_short"], "fell off couch");
        assert!(details.get("primary_injury_type").is_none());
    }

    #[test]
    fn json_inside_fences_and_prose_is_found() {
        let raw = "Here you go:\n```json\n{\"primary_injury_type\": \"burn\"}\n```";
        let parsed = parse_response(raw, Some("primary_injury_type"));
        assert_eq!(parsed.label_text, "burn");
        assert_eq!(parsed.details, None);
    }

    #[test]
    fn missing_or_null_label_field_is_empty() {
        let parsed = parse_response(r#"{"primary_injury_type": null, "x": 1}"#, Some("primary_injury_type"));
        assert_eq!(parsed.label_text, "");
        assert_eq!(resolve(&parsed.label_text).1, LabelMatch::Fallback);
    }

    #[test]
    fn free_text_without_json() {
        let parsed = parse_response("Fracture.", Some("primary_injury_type"));
        assert_eq!(parsed.label_text, "Fracture.");
        assert_eq!(parse_response("burn", None).label_text, "burn");
    }

    #[test]
    fn long_rationale_is_clipped() {
        let long = "a".repeat(400);
        let raw = format!(r#"{{"primary_injury_type": "burn", "rationale_short": "{long}"}}"#);
        let parsed = parse_response(&raw, Some("primary_injury_type"));
        let rationale = parsed.details.unwrap()["rationale_short"].as_str().unwrap().to_string();
        assert_eq!(rationale.chars().count(), 280);
    }
}
