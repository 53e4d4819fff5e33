use std::collections::HashMap;

use crate::error::InjuryLensError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Var(String),
}

/// A prompt template with `{{var}}` placeholders, parsed and checked once at
/// startup. `\{{` produces a literal `{{`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    segments: Vec<Segment>,
}

impl PromptTemplate {
    /// Parse `source`, rejecting unclosed placeholders, variables outside
    /// `allowed`, and templates that never use one of `required`.
    pub fn parse(source: &str, allowed: &[&str], required: &[&str]) -> Result<Self, InjuryLensError> {
        let segments = tokenize(source).map_err(InjuryLensError::Config)?;

        for segment in &segments {
            if let Segment::Var(name) = segment {
                if !allowed.contains(&name.as_str()) {
                    return Err(InjuryLensError::Config(format!(
                        "Unknown template variable: {{{{{name}}}}}. Allowed vars: {allowed:?}"
                    )));
                }
            }
        }

        for name in required {
            let used = segments
                .iter()
                .any(|s| matches!(s, Segment::Var(v) if v == name));
            if !used {
                return Err(InjuryLensError::Config(format!(
                    "Template must reference {{{{{name}}}}}"
                )));
            }
        }

        Ok(Self { segments })
    }

    /// Substitute variables. Names missing from `vars` render as empty.
    pub fn render(&self, vars: &HashMap<&str, &str>) -> String {
        let mut result = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => result.push_str(text),
                Segment::Var(name) => result.push_str(vars.get(name.as_str()).copied().unwrap_or("")),
            }
        }
        result
    }
}

fn tokenize(template: &str) -> Result<Vec<Segment>, String> {
    let mut segments = Vec::new();
    let mut literal = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek() == Some(&'{') {
            chars.next(); // consume first {
            if chars.peek() == Some(&'{') {
                chars.next();
                literal.push_str("{{");
            } else {
                literal.push_str("\\{");
            }
        } else if c == '{' && chars.peek() == Some(&'{') {
            chars.next(); // consume second {

            let mut var_name = String::new();
            loop {
                match chars.next() {
                    Some('}') if chars.peek() == Some(&'}') => {
                        chars.next();
                        break;
                    }
                    Some(ch) => var_name.push(ch),
                    None => return Err(format!("Unclosed template variable: {{{{{var_name}")),
                }
            }

            let var_name = var_name.trim();
            if var_name.is_empty() {
                return Err("Empty template variable: {{}}".to_string());
            }
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Var(var_name.to_string()));
        } else {
            literal.push(c);
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALLOWED: &[&str] = &["text", "labels"];

    #[test]
    fn renders_runtime_vars() {
        let template = PromptTemplate::parse("Labels: {{labels}}\n\n{{ text }}", ALLOWED, &["text"]).unwrap();
        let result = template.render(&HashMap::from([("text", "my toddler fell"), ("labels", "fall, burn")]));
        assert_eq!(result, "Labels: fall, burn\n\nmy toddler fell");
    }

    #[test]
    fn keeps_single_braces_and_escapes() {
        let template = PromptTemplate::parse(r#"{"label": string} \{{x}} {{text}}"#, ALLOWED, &["text"]).unwrap();
        let result = template.render(&HashMap::from([("text", "t")]));
        assert_eq!(result, r#"{"label": string} {{x}} t"#);
    }

    #[test]
    fn rejects_malformed_templates() {
        assert!(PromptTemplate::parse("{{text", ALLOWED, &["text"]).is_err());
        assert!(PromptTemplate::parse("{{unknown}} {{text}}", ALLOWED, &["text"]).is_err());
        assert!(PromptTemplate::parse("no placeholder", ALLOWED, &["text"]).is_err());
        assert!(PromptTemplate::parse("{{}} {{text}}", ALLOWED, &["text"]).is_err());
    }
}
