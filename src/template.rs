//! Prompt templates with `{FieldName}` placeholders.
//!
//! A placeholder is a field name made of word characters inside single
//! braces. `{{` and `}}` produce literal braces, so a template can show
//! cloze syntax such as `{{c1::...}}`. Any other brace is kept as written.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::AugmentError;

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{|\}\}|\{(\w+)\}").expect("valid placeholder regex"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    source: String,
    placeholders: Vec<String>,
}

impl PromptTemplate {
    pub fn parse(source: impl Into<String>) -> Self {
        let source = source.into();
        let mut placeholders: Vec<String> = Vec::new();
        for caps in token_pattern().captures_iter(&source) {
            if let Some(name) = caps.get(1) {
                if !placeholders.iter().any(|p| p == name.as_str()) {
                    placeholders.push(name.as_str().to_string());
                }
            }
        }
        Self {
            source,
            placeholders,
        }
    }

    /// Field names the template reads, in first-use order.
    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Substitute field values into the template.
    pub fn render(&self, fields: &HashMap<String, String>) -> Result<String, AugmentError> {
        let mut out = String::with_capacity(self.source.len());
        let mut last = 0;

        for caps in token_pattern().captures_iter(&self.source) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            out.push_str(&self.source[last..whole.start()]);
            match caps.get(1) {
                Some(name) => {
                    let value =
                        fields
                            .get(name.as_str())
                            .ok_or_else(|| AugmentError::MissingField {
                                field: name.as_str().to_string(),
                            })?;
                    out.push_str(value);
                }
                None if whole.as_str() == "{{" => out.push('{'),
                None => out.push('}'),
            }
            last = whole.end();
        }

        out.push_str(&self.source[last..]);
        Ok(out)
    }
}
