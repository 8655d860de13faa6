//! Markdown to safe HTML markup
//!
//! Assistant text runs through a fixed sequence of stages. The first stage
//! escapes everything, and every later stage only introduces tags of its own,
//! so model-supplied text never reaches the output unescaped.
//!
//! Atomic markup (code blocks, inline code) is parked behind placeholder
//! tokens once produced, so later stages never look inside it.

use regex::{Captures, Regex};
use std::sync::OnceLock;

const SLOT_OPEN: char = '\u{E000}';
const SLOT_CLOSE: char = '\u{E001}';

type Stage = fn(&mut Document);

/// Stage order is load-bearing: emphasis must see `**` before `*`,
/// headings and lists are line-anchored so line breaks go last.
const PIPELINE: [(&str, Stage); 8] = [
    ("escape", escape),
    ("fenced_code", fenced_code),
    ("inline_code", inline_code),
    ("emphasis", emphasis),
    ("headings", headings),
    ("lists", lists),
    ("links", links),
    ("line_breaks", line_breaks),
];

/// Render assistant-produced markdown into safe HTML markup
pub fn render(raw: &str) -> String {
    let mut doc = Document::new(raw);
    for (_name, stage) in PIPELINE {
        stage(&mut doc);
    }
    doc.finish()
}

/// Escape the five HTML-significant characters
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 8);
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Working text plus the markup parked out of reach of later stages
struct Document {
    text: String,
    slots: Vec<String>,
}

impl Document {
    fn new(raw: &str) -> Self {
        // Placeholder delimiters are reserved; strip any that arrive in the input.
        let text = raw
            .replace("\r\n", "\n")
            .replace([SLOT_OPEN, SLOT_CLOSE], "\u{FFFD}");
        Self {
            text,
            slots: Vec::new(),
        }
    }

    fn park(&mut self, markup: String) -> String {
        let id = self.slots.len();
        self.slots.push(markup);
        format!("{}{}{}", SLOT_OPEN, id, SLOT_CLOSE)
    }

    /// Apply a regex replacement whose closure may park markup
    fn rewrite<F>(&mut self, re: &Regex, mut f: F)
    where
        F: FnMut(&mut Document, &Captures, &str) -> String,
    {
        let text = std::mem::take(&mut self.text);
        let replaced = re
            .replace_all(&text, |caps: &Captures| f(self, caps, &text))
            .into_owned();
        self.text = replaced;
    }

    fn finish(self) -> String {
        let slots = self.slots;
        slot_pattern()
            .replace_all(&self.text, |caps: &Captures| {
                caps[1]
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| slots.get(i).cloned())
                    .unwrap_or_default()
            })
            .into_owned()
    }
}

fn compiled(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static markdown pattern"))
}

fn slot_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(&RE, r"\x{E000}(\d+)\x{E001}")
}

fn escape(doc: &mut Document) {
    doc.text = escape_html(&doc.text);
}

fn fenced_code(doc: &mut Document) {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = compiled(&RE, r"(?s)```(?:([\w+#.-]+)[ \t]*\n|\n?)(.*?)```\n?");
    doc.rewrite(re, |doc, caps, _| {
        let body = caps.get(2).map_or("", |m| m.as_str());
        let body = body.strip_suffix('\n').unwrap_or(body);
        let markup = match caps.get(1) {
            Some(lang) => format!(
                "<pre><code class=\"language-{}\">{}</code></pre>",
                lang.as_str(),
                body
            ),
            None => format!("<pre><code>{}</code></pre>", body),
        };
        doc.park(markup)
    });
}

fn inline_code(doc: &mut Document) {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = compiled(&RE, r"`([^`\n]+)`");
    doc.rewrite(re, |doc, caps, _| doc.park(format!("<code>{}</code>", &caps[1])));
}

/// Bold first, then italic, so `*` never eats half of a `**` pair.
///
/// Each pass runs over the previous pass's tags, so a span whose inner text
/// would close a tag it did not open stays literal.
fn emphasis(doc: &mut Document) {
    static BOLD_STAR: OnceLock<Regex> = OnceLock::new();
    static BOLD_UNDERSCORE: OnceLock<Regex> = OnceLock::new();
    static ITALIC_STAR: OnceLock<Regex> = OnceLock::new();
    static ITALIC_UNDERSCORE: OnceLock<Regex> = OnceLock::new();

    let bold_star = compiled(&BOLD_STAR, r"\*\*(\S(?:[^\n]*?\S)?)\*\*");
    doc.rewrite(bold_star, |_, caps, _| star_span(caps, "strong"));

    let bold_underscore = compiled(
        &BOLD_UNDERSCORE,
        r"(?m)(^|[^\w])__(\S(?:[^\n]*?\S)?)__",
    );
    doc.rewrite(bold_underscore, |_, caps, text| {
        underscore_span(caps, text, "strong")
    });

    let italic_star = compiled(&ITALIC_STAR, r"\*([^\s*](?:[^*\n]*[^\s*])?)\*");
    doc.rewrite(italic_star, |_, caps, _| star_span(caps, "em"));

    let italic_underscore = compiled(
        &ITALIC_UNDERSCORE,
        r"(?m)(^|[^\w])_([^\s_](?:[^_\n]*[^\s_])?)_",
    );
    doc.rewrite(italic_underscore, |_, caps, text| {
        underscore_span(caps, text, "em")
    });
}

fn star_span(caps: &Captures, tag: &str) -> String {
    if !tags_balanced(&caps[1]) {
        return caps[0].to_string();
    }
    format!("<{tag}>{}</{tag}>", &caps[1], tag = tag)
}

/// Underscore emphasis only counts at word boundaries (`snake_case` stays put)
fn underscore_span(caps: &Captures, text: &str, tag: &str) -> String {
    let whole = &caps[0];
    let end = caps.get(0).map_or(0, |m| m.end());
    let followed_by_word = text[end..]
        .chars()
        .next()
        .is_some_and(|c| c.is_alphanumeric() || c == '_');
    if followed_by_word || !tags_balanced(&caps[2]) {
        return whole.to_string();
    }
    format!("{}<{tag}>{}</{tag}>", &caps[1], &caps[2], tag = tag)
}

fn headings(doc: &mut Document) {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = compiled(&RE, r"(?m)^(#{1,3})[ \t]+([^\n]+?)[ \t]*$");
    doc.rewrite(re, |_, caps, _| {
        let level = caps[1].len();
        format!("<h{level}>{}</h{level}>", &caps[2], level = level)
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    Bulleted,
    Numbered,
}

impl ListKind {
    fn tag(self) -> &'static str {
        match self {
            ListKind::Bulleted => "ul",
            ListKind::Numbered => "ol",
        }
    }
}

fn list_item(line: &str) -> Option<(ListKind, &str)> {
    static BULLET: OnceLock<Regex> = OnceLock::new();
    static NUMBER: OnceLock<Regex> = OnceLock::new();
    let bullet = compiled(&BULLET, r"^[ \t]*[-*+][ \t]+(.+)$");
    let number = compiled(&NUMBER, r"^[ \t]*\d+[.)][ \t]+(.+)$");

    if let Some(caps) = bullet.captures(line) {
        return caps.get(1).map(|m| (ListKind::Bulleted, m.as_str()));
    }
    number
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| (ListKind::Numbered, m.as_str()))
}

/// Items become `<li>`; each run of same-kind items shares one list element
fn lists(doc: &mut Document) {
    let mut lines: Vec<String> = Vec::new();
    let mut open: Option<ListKind> = None;

    for line in doc.text.split('\n') {
        match list_item(line) {
            Some((kind, body)) => {
                let item = format!("<li>{}</li>", body);
                if open == Some(kind) {
                    if let Some(last) = lines.last_mut() {
                        last.push_str(&item);
                        continue;
                    }
                }
                close_list(&mut lines, open.take());
                lines.push(format!("<{}>{}", kind.tag(), item));
                open = Some(kind);
            }
            None => {
                close_list(&mut lines, open.take());
                lines.push(line.to_string());
            }
        }
    }
    close_list(&mut lines, open);

    doc.text = lines.join("\n");
}

fn close_list(lines: &mut [String], open: Option<ListKind>) {
    if let (Some(kind), Some(last)) = (open, lines.last_mut()) {
        last.push_str(&format!("</{}>", kind.tag()));
    }
}

fn links(doc: &mut Document) {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = compiled(
        &RE,
        r"\[([^\]\n]+)\]\(([^)\s<>\x{E000}\x{E001}]+)\)",
    );
    doc.rewrite(re, |_, caps, _| {
        let label = &caps[1];
        let href = &caps[2];
        if !is_safe_href(href) || !tags_balanced(label) {
            return caps[0].to_string();
        }
        format!(
            "<a href=\"{}\" target=\"_blank\" rel=\"noopener noreferrer\">{}</a>",
            href, label
        )
    });
}

/// Only web, mail and relative targets may become anchors
fn is_safe_href(href: &str) -> bool {
    let lower = href.to_ascii_lowercase();
    match lower.split_once(':') {
        Some((scheme, _)) if !scheme.contains(['/', '?', '#']) => {
            matches!(scheme, "http" | "https" | "mailto")
        }
        Some((prefix, _)) => !prefix.contains('&'),
        None => true,
    }
}

/// True when every tag opened in `fragment` is closed inside it, in order
fn tags_balanced(fragment: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = compiled(&RE, r"<(/?)([a-z0-9]+)[^>]*>");
    let mut stack: Vec<&str> = Vec::new();
    for caps in re.captures_iter(fragment) {
        let name = caps.get(2).map_or("", |m| m.as_str());
        if caps[1].is_empty() {
            stack.push(name);
        } else if stack.pop() != Some(name) {
            return false;
        }
    }
    stack.is_empty()
}

fn line_breaks(doc: &mut Document) {
    static AFTER_BLOCK: OnceLock<Regex> = OnceLock::new();
    static BEFORE_BLOCK: OnceLock<Regex> = OnceLock::new();
    let after = compiled(&AFTER_BLOCK, r"(</h[1-3]>|</ul>|</ol>)\n");
    let before = compiled(&BEFORE_BLOCK, r"\n(<h[1-3]>|<ul>|<ol>)");

    let text = after.replace_all(&doc.text, "${1}").into_owned();
    let text = before.replace_all(&text, "${1}").into_owned();
    doc.text = text.replace('\n', "<br>");
}
