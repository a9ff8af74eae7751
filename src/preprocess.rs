//! Markdown cleanup before segmentation.
//!
//! Strips structural markup (front matter, headers, emphasis, links, images,
//! footnote and citation markers, bare URLs, HTML tags, code fences) while
//! keeping every word a listener should hear.  Paragraph breaks (blank
//! lines) survive so the segmenter can split on them.

use fancy_regex::{Captures, Regex};
use once_cell::sync::Lazy;
use std::borrow::Cow;

// ─────────────────────────────────────────────────────────────────────────────
// Compiled regexes (lazily initialised once)
// ─────────────────────────────────────────────────────────────────────────────

static RE_FRONT_MATTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\s*---\r?\n.*?\r?\n---[ \t]*(?:\r?\n|$)").unwrap());
static RE_CODE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]*(?:```|~~~).*$").unwrap());
static RE_HTML: Lazy<Regex> = Lazy::new(|| Regex::new(r"</?[A-Za-z][^>\n]*>").unwrap());
static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").unwrap());
static RE_FOOTNOTE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\^[^\]]+\]:?").unwrap());
static RE_CITATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\d+(?:\s*[,–-]\s*\d+)*\]").unwrap());
static RE_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]+)\]\([^)]*\)").unwrap());
static RE_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+|www\.\S+").unwrap());
static RE_RULE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*([-*_])(?:[ \t]*\1){2,}[ \t]*$").unwrap());
// Delimiters must not touch a word character on the outside, so
// snake_case_names and 2*3*4 are left alone.
static RE_EMPHASIS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?<![\w*])(\*{1,3}|_{1,3})(?=[^\s*_])(.+?)(?<=\S)\1(?![\w*])").unwrap()
});
static RE_INLINE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`\n]+)`").unwrap());
static RE_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]{0,3}#{1,6}[ \t]+(.+?)[ \t#]*$").unwrap());
static RE_BLOCKQUOTE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]*>[ \t]?").unwrap());
static RE_INLINE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());
static RE_TRAILING_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)[ \t]+$").unwrap());
static RE_BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

// ─────────────────────────────────────────────────────────────────────────────
// Individual cleanup steps
// ─────────────────────────────────────────────────────────────────────────────

/// Drop a leading `---` … `---` metadata block.
pub fn remove_front_matter(text: &str) -> Cow<'_, str> {
    RE_FRONT_MATTER.replace(text, "")
}

/// Drop fence lines; the code inside stays.
pub fn remove_code_fences(text: &str) -> Cow<'_, str> {
    RE_CODE_FENCE.replace_all(text, "")
}

pub fn remove_html_tags(text: &str) -> Cow<'_, str> {
    RE_HTML.replace_all(text, " ")
}

pub fn remove_images(text: &str) -> Cow<'_, str> {
    RE_IMAGE.replace_all(text, "")
}

/// `[^1]` markers and `[^1]:` definition prefixes.
pub fn remove_footnote_markers(text: &str) -> Cow<'_, str> {
    RE_FOOTNOTE.replace_all(text, "")
}

/// Numeric citations: `[1]`, `[1, 2]`, `[3-5]`.
pub fn remove_citations(text: &str) -> Cow<'_, str> {
    RE_CITATION.replace_all(text, "")
}

/// `[label](url)` → `label`.
pub fn reduce_links(text: &str) -> Cow<'_, str> {
    RE_LINK.replace_all(text, "$1")
}

pub fn remove_urls(text: &str) -> Cow<'_, str> {
    RE_URL.replace_all(text, " ")
}

pub fn remove_rules(text: &str) -> Cow<'_, str> {
    RE_RULE.replace_all(text, "")
}

/// `*a*`, `__b__`, `***c***` → inner text.
pub fn remove_emphasis(text: &str) -> String {
    // Nested markers (`**_x_**`) need a second pass.
    let once = RE_EMPHASIS.replace_all(text, "$2").into_owned();
    RE_EMPHASIS.replace_all(&once, "$2").into_owned()
}

pub fn remove_inline_code(text: &str) -> Cow<'_, str> {
    RE_INLINE_CODE.replace_all(text, "$1")
}

/// `## Title` → `Title.` so the narrator pauses after it.
pub fn flatten_headers(text: &str) -> String {
    RE_HEADER
        .replace_all(text, |caps: &Captures| {
            let title = caps[1].trim();
            match title.chars().last() {
                Some(c) if ".!?:;".contains(c) => title.to_string(),
                _ => format!("{}.", title),
            }
        })
        .into_owned()
}

pub fn remove_blockquote_markers(text: &str) -> Cow<'_, str> {
    RE_BLOCKQUOTE.replace_all(text, "")
}

/// Collapse runs of spaces, strip trailing spaces and squeeze blank-line
/// runs down to a single paragraph break.
pub fn normalize_whitespace(text: &str) -> String {
    let text = text.replace("\r\n", "\n");
    let text = RE_INLINE_SPACES.replace_all(&text, " ");
    let text = RE_TRAILING_SPACES.replace_all(&text, "");
    let text = RE_BLANK_RUN.replace_all(&text, "\n\n");
    text.trim().to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// MarkdownCleaner — full pipeline
// ─────────────────────────────────────────────────────────────────────────────

/// Which cleanup steps run.  Everything is on by default.
#[derive(Debug, Clone)]
pub struct CleanerConfig {
    pub remove_front_matter: bool,
    pub remove_code_fences: bool,
    pub remove_html: bool,
    pub remove_images: bool,
    pub remove_footnotes: bool,
    pub remove_citations: bool,
    pub reduce_links: bool,
    pub remove_urls: bool,
    pub remove_rules: bool,
    pub remove_emphasis: bool,
    pub remove_inline_code: bool,
    pub flatten_headers: bool,
    pub remove_blockquotes: bool,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            remove_front_matter: true,
            remove_code_fences: true,
            remove_html: true,
            remove_images: true,
            remove_footnotes: true,
            remove_citations: true,
            reduce_links: true,
            remove_urls: true,
            remove_rules: true,
            remove_emphasis: true,
            remove_inline_code: true,
            flatten_headers: true,
            remove_blockquotes: true,
        }
    }
}

/// Markdown → narration text.
#[derive(Debug, Clone, Default)]
pub struct MarkdownCleaner {
    pub config: CleanerConfig,
}

impl MarkdownCleaner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: CleanerConfig) -> Self {
        Self { config }
    }

    pub fn process(&self, text: &str) -> String {
        let cfg = &self.config;
        let mut text = text.replace("\r\n", "\n");

        if cfg.remove_front_matter {
            text = remove_front_matter(&text).into_owned();
        }
        if cfg.remove_code_fences {
            text = remove_code_fences(&text).into_owned();
        }
        if cfg.remove_html {
            text = remove_html_tags(&text).into_owned();
        }
        // Images before links: `![alt](src)` also matches the link pattern.
        if cfg.remove_images {
            text = remove_images(&text).into_owned();
        }
        if cfg.remove_footnotes {
            text = remove_footnote_markers(&text).into_owned();
        }
        if cfg.remove_citations {
            text = remove_citations(&text).into_owned();
        }
        if cfg.reduce_links {
            text = reduce_links(&text).into_owned();
        }
        if cfg.remove_urls {
            text = remove_urls(&text).into_owned();
        }
        if cfg.remove_rules {
            text = remove_rules(&text).into_owned();
        }
        if cfg.remove_emphasis {
            text = remove_emphasis(&text);
        }
        if cfg.remove_inline_code {
            text = remove_inline_code(&text).into_owned();
        }
        if cfg.flatten_headers {
            text = flatten_headers(&text);
        }
        if cfg.remove_blockquotes {
            text = remove_blockquote_markers(&text).into_owned();
        }

        normalize_whitespace(&text)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(s: &str) -> String {
        MarkdownCleaner::new().process(s)
    }

    #[test]
    fn test_front_matter_removed() {
        let out = clean("---\ntitle: Paper\nauthor: A. B.\n---\nBody text.");
        assert_eq!(out, "Body text.");
    }

    #[test]
    fn test_front_matter_only_at_start() {
        let out = clean("Intro.\n\n---\nkey: v\n---\nMore.");
        assert!(out.contains("key: v"), "got: {}", out);
    }

    #[test]
    fn test_headers_get_period() {
        assert_eq!(clean("## Results"), "Results.");
        assert_eq!(clean("# Why?"), "Why?");
        assert_eq!(clean("### Closing ###"), "Closing.");
    }

    #[test]
    fn test_hashtag_is_not_a_header() {
        assert_eq!(clean("#rustlang rocks"), "#rustlang rocks");
    }

    #[test]
    fn test_links_reduced_to_label() {
        assert_eq!(
            clean("See [the docs](https://example.com/a_b) for more."),
            "See the docs for more."
        );
    }

    #[test]
    fn test_images_removed_entirely() {
        assert_eq!(clean("Before ![a chart](fig1.png) after."), "Before after.");
    }

    #[test]
    fn test_citations_and_footnotes() {
        assert_eq!(
            clean("Prior work [1, 2] and [3-5] shows this[^note]."),
            "Prior work and shows this."
        );
    }

    #[test]
    fn test_emphasis_stripped() {
        assert_eq!(clean("a **bold** and *it* and ___both___"), "a bold and it and both");
    }

    #[test]
    fn test_snake_case_untouched() {
        assert_eq!(clean("call my_func_name now"), "call my_func_name now");
        assert_eq!(clean("2*3*4 is 24"), "2*3*4 is 24");
    }

    #[test]
    fn test_bullets_untouched() {
        let out = clean("* first\n* second");
        assert_eq!(out, "* first\n* second");
    }

    #[test]
    fn test_bare_urls_removed() {
        assert_eq!(clean("Visit https://x.org/path now."), "Visit now.");
    }

    #[test]
    fn test_rules_and_quotes() {
        assert_eq!(clean("> quoted line\n\n***\n\nnext"), "quoted line\n\nnext");
    }

    #[test]
    fn test_paragraph_breaks_survive() {
        let out = clean("one\n\n\n\n  \ntwo   words");
        assert_eq!(out, "one\n\ntwo words");
    }

    #[test]
    fn test_disabled_steps_are_skipped() {
        let cfg = CleanerConfig { flatten_headers: false, ..CleanerConfig::default() };
        let out = MarkdownCleaner::with_config(cfg).process("# Title");
        assert_eq!(out, "# Title");
    }
}
