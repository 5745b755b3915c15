use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_width::UnicodeWidthStr;

const HELP_SOURCE: &str = include_str!("../assets/help.ini");
pub const NO_HELP: &str = "No help available.";

static CATALOG: Lazy<HelpCatalog> = Lazy::new(|| HelpCatalog::parse(HELP_SOURCE));

static STYLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\[warning\](?P<warning>.*?)\[/warning\]|\[note\](?P<note>.*?)\[/note\]|\[underline\](?P<underline>.*?)\[/underline\]|\\033\[31m(?P<ansi_red>.*?)\\033\[0m|\\033\[32m(?P<ansi_green>.*?)\\033\[0m|\\033\[4m(?P<ansi_under>.*?)\\033\[0m",
    )
    .expect("valid help style regex")
});

static CHANNEL_SEGMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^channel\s+\d+$").expect("valid channel regex"));

pub fn catalog() -> &'static HelpCatalog {
    &CATALOG
}

/// Human-readable labels and help strings keyed by dotted path.
#[derive(Debug, Default)]
pub struct HelpCatalog {
    labels: HashMap<String, String>,
    help: HashMap<String, String>,
}

impl HelpCatalog {
    pub fn parse(source: &str) -> Self {
        let mut catalog = Self::default();
        let mut section: Option<String> = None;
        for line in source.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                section = Some(line[1..line.len() - 1].to_string());
                continue;
            }
            let parts: Vec<String> = line
                .splitn(3, ',')
                .map(|p| p.trim().trim_matches('"').to_string())
                .collect();
            let key = &parts[0];
            let full_key = match (&section, key.as_str()) {
                (Some(section), "title") => section.clone(),
                (Some(section), _) => format!("{section}.{key}"),
                (None, _) => key.clone(),
            };
            let label = parts
                .get(1)
                .filter(|l| !l.is_empty())
                .cloned()
                .unwrap_or_else(|| key.clone());
            let help = parts
                .get(2)
                .filter(|h| !h.is_empty())
                .cloned()
                .unwrap_or_else(|| NO_HELP.to_string());
            catalog.labels.insert(full_key.clone(), label);
            catalog.help.insert(full_key, help);
        }
        catalog
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn help(&self, key: &str) -> &str {
        self.help.get(key).map(String::as_str).unwrap_or(NO_HELP)
    }
}

/// Maps a menu path to the catalog namespace: the root is dropped, the
/// top-level groups get short names, and numbered channels collapse to one.
pub fn transform_menu_path(path: &[String]) -> Vec<String> {
    path.iter()
        .skip(1)
        .map(|part| match part.as_str() {
            "Radio Settings" => "config".to_string(),
            "Module Settings" => "module".to_string(),
            "User Settings" => "user".to_string(),
            "Channels" => "channels".to_string(),
            other if CHANNEL_SEGMENT_RE.is_match(other) => "channel".to_string(),
            other => other.to_string(),
        })
        .collect()
}

pub fn help_key(path: &[String], option: &str) -> String {
    let mut parts = transform_menu_path(path);
    parts.push(option.to_string());
    parts.join(".")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelpStyle {
    Plain,
    Warning,
    Note,
    Underline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub style: HelpStyle,
}

impl Segment {
    fn new(text: impl Into<String>, style: HelpStyle) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }
}

/// Splits one paragraph into styled runs at the inline markers.
pub fn styled_segments(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut last = 0;
    for caps in STYLE_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        if whole.start() > last {
            segments.push(Segment::new(&text[last..whole.start()], HelpStyle::Plain));
        }
        let styled = [
            ("warning", HelpStyle::Warning),
            ("ansi_red", HelpStyle::Warning),
            ("note", HelpStyle::Note),
            ("ansi_green", HelpStyle::Note),
            ("underline", HelpStyle::Underline),
            ("ansi_under", HelpStyle::Underline),
        ]
        .into_iter()
        .find_map(|(name, style)| caps.name(name).map(|m| Segment::new(m.as_str(), style)));
        if let Some(segment) = styled {
            segments.push(segment);
        }
        last = whole.end();
    }
    if last < text.len() {
        segments.push(Segment::new(&text[last..], HelpStyle::Plain));
    }
    segments
}

/// Word-wraps styled runs to `width` columns. Whitespace never starts a
/// new line on its own; tokens wider than a line are hard-broken.
///
/// `textwrap` only sees plain strings, and a run's style has to survive a
/// break that lands inside it, so help text is wrapped here per token.
pub fn wrap_segments(segments: &[Segment], width: usize) -> Vec<Vec<Segment>> {
    let width = width.max(1);
    let mut lines: Vec<Vec<Segment>> = Vec::new();
    let mut line: Vec<Segment> = Vec::new();
    let mut used = 0usize;

    for segment in segments {
        for token in tokens(&segment.text) {
            let token_width = token.width();
            let is_space = token.trim().is_empty();
            if token_width > width && !is_space {
                if !line.is_empty() {
                    lines.push(std::mem::take(&mut line));
                    used = 0;
                }
                for chunk in hard_break(token, width) {
                    lines.push(vec![Segment::new(chunk, segment.style)]);
                }
                continue;
            }
            if used + token_width > width && !is_space {
                lines.push(std::mem::take(&mut line));
                used = 0;
            }
            push_token(&mut line, token, segment.style);
            used += token_width;
        }
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

fn push_token(line: &mut Vec<Segment>, token: &str, style: HelpStyle) {
    match line.last_mut() {
        Some(last) if last.style == style => last.text.push_str(token),
        _ => line.push(Segment::new(token, style)),
    }
}

fn tokens(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut in_space: Option<bool> = None;
    for (idx, ch) in text.char_indices() {
        let space = ch.is_whitespace();
        match in_space {
            Some(prev) if prev != space => {
                out.push(&text[start..idx]);
                start = idx;
            }
            _ => {}
        }
        in_space = Some(space);
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
    out
}

fn hard_break(token: &str, width: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut used = 0;
    for ch in token.chars() {
        let w = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + w > width && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            used = 0;
        }
        current.push(ch);
        used += w;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Help for the highlighted option, styled and wrapped to the pane. Output
/// beyond `max_lines` is cut and the last kept line ends with an ellipsis.
pub fn wrapped_help(
    catalog: &HelpCatalog,
    path: &[String],
    option: Option<&str>,
    width: usize,
    max_lines: usize,
) -> Vec<Vec<Segment>> {
    let content = match option {
        Some(option) => catalog.help(&help_key(path, option)),
        None => NO_HELP,
    };
    let wrap_width = width.saturating_sub(6).max(10);

    let mut lines = Vec::new();
    for paragraph in content.split("\\n") {
        lines.extend(wrap_segments(&styled_segments(paragraph), wrap_width));
    }
    if lines.len() > max_lines {
        lines.truncate(max_lines.max(1));
        if let Some(last) = lines.last_mut() {
            last.push(Segment::new("...", HelpStyle::Plain));
        }
    }
    lines
}
