//! Conversion between generated Markdown and stored field HTML.

use pulldown_cmark::{html, Options, Parser};

/// Render Markdown as HTML suitable for a note field.
///
/// Total for any input: text the parser cannot interpret as Markdown is
/// emitted as escaped literal text.
pub fn markdown_to_html(text: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);

    let parser = Parser::new_ext(text, options);
    let mut out = String::with_capacity(text.len() + text.len() / 2);
    html::push_html(&mut out, parser);
    out.trim_end().to_string()
}

/// Remove tags and non-breaking-space entities from field HTML.
///
/// A `<` only opens a tag when a letter, `/` or `!` follows it and a closing
/// `>` exists later in the value; otherwise it is kept as text.
pub fn strip_markup(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let opens_tag = after
            .chars()
            .next()
            .is_some_and(|next| next.is_ascii_alphabetic() || next == '/' || next == '!');
        match after.find('>') {
            Some(close) if opens_tag => {
                out.push(' ');
                rest = &after[close + 1..];
            }
            _ => {
                out.push('<');
                rest = after;
            }
        }
    }
    out.push_str(rest);

    NBSP_ENTITIES
        .iter()
        .fold(out, |text, entity| replace_ignore_ascii_case(&text, entity, " "))
        .replace('\u{a0}', " ")
}

const NBSP_ENTITIES: [&str; 3] = ["&nbsp;", "&#160;", "&#xa0;"];

fn replace_ignore_ascii_case(text: &str, needle: &str, with: &str) -> String {
    let lowered = text.to_ascii_lowercase();
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (start, _) in lowered.match_indices(needle) {
        out.push_str(&text[last..start]);
        out.push_str(with);
        last = start + needle.len();
    }
    out.push_str(&text[last..]);
    out
}

/// Whether a stored field value has no visible content.
pub fn is_blank(value: &str) -> bool {
    strip_markup(value).trim().is_empty()
}
