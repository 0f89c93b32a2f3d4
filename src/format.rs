// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Answer post-processing: math notation and markdown rendering

use pulldown_cmark::{html, CowStr, Event, Options, Parser, Tag, TagEnd};
use pulldown_cmark_escape::escape_html;
use regex::{Captures, Regex};
use std::sync::OnceLock;

fn superscript_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // A bare exponent is a number or one letter; longer ones need braces
        Regex::new(r"\^(?:\{([^{}]*)\}|(-?[0-9]+|[A-Za-z]))").expect("valid superscript regex")
    })
}

fn subscript_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Digits only (or braces) so identifiers like snake_case survive
        Regex::new(r"_(?:\{([^{}]*)\}|([0-9]+)\b)").expect("valid subscript regex")
    })
}

fn group_text<'h>(caps: &Captures<'h>) -> &'h str {
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str())
        .unwrap_or("")
}

/// Turn `^3`, `^{n+1}` into `<sup>` and `_1`, `_{ij}` into `<sub>` tags
pub fn format_math(text: &str) -> String {
    let text = superscript_re().replace_all(text, |caps: &Captures| {
        format!("<sup>{}</sup>", group_text(caps))
    });
    subscript_re()
        .replace_all(&text, |caps: &Captures| {
            format!("<sub>{}</sub>", group_text(caps))
        })
        .into_owned()
}

/// Whether a link or image destination may be emitted as-is.
///
/// Relative URLs and http, https and mailto pass. Any other scheme
/// (`javascript:`, `data:`, `vbscript:`) does not.
fn is_safe_url(url: &str) -> bool {
    // Browsers ignore whitespace and control characters inside a scheme
    let cleaned: String = url
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect();

    match cleaned.find(|c: char| matches!(c, ':' | '/' | '?' | '#')) {
        Some(i) if cleaned[i..].starts_with(':') => {
            let scheme = cleaned[..i].to_ascii_lowercase();
            matches!(scheme.as_str(), "http" | "https" | "mailto")
        }
        _ => true,
    }
}

/// Render a model answer as HTML.
///
/// Raw HTML in the answer is escaped. Math formatting applies to prose only;
/// inline code and code blocks are rendered untouched. Links and images with
/// an unsafe destination are dropped and their text kept.
pub fn render_answer(markdown: &str) -> String {
    let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH;
    let parser = Parser::new_ext(markdown, options);

    let mut events: Vec<Event> = Vec::new();
    let mut pending = String::new();
    let mut in_code_block = false;
    // One entry per open link or image: true if it was kept
    let mut links: Vec<bool> = Vec::new();
    let mut images: Vec<bool> = Vec::new();

    for event in parser {
        match event {
            Event::Text(text) if in_code_block => events.push(Event::Text(text)),
            Event::Text(text) | Event::Html(text) | Event::InlineHtml(text) => {
                pending.push_str(&text);
            }
            other => {
                let in_image = images.contains(&true);
                flush_text(&mut pending, &mut events, in_image);

                let keep = match &other {
                    Event::Start(Tag::CodeBlock(_)) => {
                        in_code_block = true;
                        true
                    }
                    Event::End(TagEnd::CodeBlock) => {
                        in_code_block = false;
                        true
                    }
                    Event::Start(Tag::Link { dest_url, .. }) => {
                        let safe = is_safe_url(dest_url);
                        links.push(safe);
                        safe
                    }
                    Event::End(TagEnd::Link) => links.pop().unwrap_or(true),
                    Event::Start(Tag::Image { dest_url, .. }) => {
                        let safe = is_safe_url(dest_url);
                        images.push(safe);
                        safe
                    }
                    Event::End(TagEnd::Image) => images.pop().unwrap_or(true),
                    _ => true,
                };
                if keep {
                    events.push(other);
                }
            }
        }
    }
    flush_text(&mut pending, &mut events, images.contains(&true));

    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, events.into_iter());
    out
}

/// Adjacent text events are merged first since the parser splits text at
/// unmatched delimiters such as `_`.
///
/// Image alt text is written as plain text: the renderer escapes it itself
/// and drops markup there.
fn flush_text(pending: &mut String, events: &mut Vec<Event<'_>>, in_image: bool) {
    if pending.is_empty() {
        return;
    }
    if in_image {
        events.push(Event::Text(CowStr::from(std::mem::take(pending))));
        return;
    }
    let mut escaped = String::with_capacity(pending.len());
    // Writing into a String cannot fail
    let _ = escape_html(&mut escaped, pending);
    events.push(Event::Html(CowStr::from(format_math(&escaped))));
    pending.clear();
}
