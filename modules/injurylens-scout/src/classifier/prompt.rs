use std::collections::HashMap;

use injurylens_common::{Item, PromptTemplate, Taxonomy};

/// Cut `text` to at most `max_chars` characters without splitting a word.
///
/// A word is a run of non-whitespace. If the first word alone is longer than
/// the limit the result is empty.
pub fn truncate_at_word_boundary(text: &str, max_chars: usize) -> &str {
    let Some((cut, _)) = text.char_indices().nth(max_chars) else {
        return text;
    };
    let head = &text[..cut];
    let cut_between_words = text[cut..].starts_with(char::is_whitespace)
        || head.ends_with(char::is_whitespace);
    let kept = if cut_between_words {
        head
    } else {
        match head.rfind(char::is_whitespace) {
            Some(i) => &head[..i],
            None => "",
        }
    };
    kept.trim_end()
}

/// Builds the per-item prompt from the instruction template.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    template: PromptTemplate,
    labels: String,
    max_input_chars: usize,
}

impl PromptBuilder {
    pub fn new(template: PromptTemplate, taxonomy: &Taxonomy, max_input_chars: usize) -> Self {
        Self {
            template,
            labels: taxonomy.labels().join(", "),
            max_input_chars,
        }
    }

    /// `text` is title and body, truncated as a whole. `title` and `body` are
    /// truncated separately, the body to whatever the title left over.
    pub fn render(&self, item: &Item) -> String {
        let title = item.title.trim();
        let body = item.body.trim();
        let combined = if body.is_empty() {
            title.to_string()
        } else {
            format!("{title}\n\n{body}")
        };

        let max = self.max_input_chars;
        let text = truncate_at_word_boundary(&combined, max);
        let title_part = truncate_at_word_boundary(title, max);
        let body_part = truncate_at_word_boundary(body, max.saturating_sub(title_part.chars().count()));

        let vars = HashMap::from([
            ("text", text),
            ("title", title_part),
            ("body", body_part),
            ("channel", item.channel.as_str()),
            ("labels", self.labels.as_str()),
        ]);
        self.template.render(&vars)
    }
}
