//! Splitting documents into passages that fit a token budget.
//!
//! Markdown is parsed into a tree of sections. A section that fits the
//! budget becomes a single passage, sub-sections included. Otherwise the
//! section's own text is cut along paragraph boundaries, then lines, then
//! words, and every sub-section is processed the same way. Fenced code blocks
//! are never cut: one that does not fit is emitted whole and flagged as
//! oversized.
//!
//! Token counts are always measured on the final passage text with the
//! caller's [`TokenCounter`], so non-additive tokenizers are handled.

use std::path::Path;

use crate::{
    embed::TokenCounter,
    error::{Error, Result},
    passage::heading_anchor,
    text_util::{heading_level, heading_title, is_fence},
};

/// A piece of a document, ready to become a passage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// URL fragment of the nearest heading.
    pub anchor: Option<String>,
    /// Title of the nearest heading, without the `#` marks.
    pub heading: Option<String>,
    /// Trimmed, never empty.
    pub content: String,
    /// An indivisible block exceeded the budget and was kept whole.
    pub oversized: bool,
}

/// How a document's structure is recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Markdown,
    PlainText,
}

impl DocumentFormat {
    /// Markdown for `.md` / `.markdown`, plain text for everything else.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext)
                if ext.eq_ignore_ascii_case("md")
                    || ext.eq_ignore_ascii_case("markdown") =>
            {
                Self::Markdown
            }
            _ => Self::PlainText,
        }
    }
}

/// Decode raw file contents and chunk them.
///
/// Fails with [`Error::Content`] when `raw` is not UTF-8; no chunks are
/// produced in that case. `name` only appears in the error.
pub fn chunk_bytes(
    name: &str,
    raw: &[u8],
    format: DocumentFormat,
    counter: &dyn TokenCounter,
    max_tokens: usize,
) -> Result<Vec<Chunk>> {
    let text = std::str::from_utf8(raw).map_err(|e| Error::Content {
        path: name.to_string(),
        reason: e.to_string(),
    })?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    Ok(chunk_text(text, format, counter, max_tokens))
}

/// Split `text` into chunks of at most `max_tokens` tokens.
///
/// Text that already fits comes back as exactly one chunk equal to the
/// trimmed input. Blank input produces no chunks.
///
/// # Examples
///
/// ```
/// use docindex::chunking::{chunk_text, DocumentFormat};
/// use docindex::embed::WhitespaceTokenCounter;
///
/// let chunks = chunk_text(
///     "  Hello, world!\n",
///     DocumentFormat::Markdown,
///     &WhitespaceTokenCounter,
///     100,
/// );
/// assert_eq!(chunks.len(), 1);
/// assert_eq!(chunks[0].content, "Hello, world!");
/// ```
pub fn chunk_text(
    text: &str,
    format: DocumentFormat,
    counter: &dyn TokenCounter,
    max_tokens: usize,
) -> Vec<Chunk> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    if counter.count_tokens(text) <= max_tokens {
        return vec![Chunk {
            anchor: None,
            heading: None,
            content: text.to_string(),
            oversized: false,
        }];
    }

    let budget = Budget {
        counter,
        max_tokens,
    };
    let mut out = Vec::new();
    match format {
        DocumentFormat::Markdown => {
            Section::parse(text).emit(&budget, &mut out);
        }
        DocumentFormat::PlainText => {
            split_body(text, &Context::default(), false, &budget, &mut out)
        }
    }
    out
}

struct Budget<'a> {
    counter: &'a dyn TokenCounter,
    max_tokens: usize,
}

impl Budget<'_> {
    fn fits(&self, text: &str) -> bool {
        self.counter.count_tokens(text) <= self.max_tokens
    }
}

/// What a chunk cut from inside a section keeps of that section.
#[derive(Default)]
struct Context<'a> {
    heading_line: Option<&'a str>,
    anchor: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Default)]
struct Section {
    heading: Option<String>,
    level: usize,
    body: Vec<String>,
    children: Vec<Section>,
}

impl Section {
    fn parse(text: &str) -> Self {
        let mut root = Section::default();
        let mut in_fence = false;

        for line in text.lines() {
            if is_fence(line) {
                in_fence = !in_fence;
            }
            match heading_level(line) {
                Some(level) if !in_fence => root.insert_heading(line, level),
                _ => root.insert_text(line),
            }
        }

        root
    }

    fn insert_heading(&mut self, line: &str, level: usize) {
        match self.children.last_mut() {
            Some(last) if level > last.level => {
                last.insert_heading(line, level)
            }
            _ => self.children.push(Section {
                heading: Some(line.trim_end().to_string()),
                level,
                ..Section::default()
            }),
        }
    }

    fn insert_text(&mut self, line: &str) {
        match self.children.last_mut() {
            Some(last) => last.insert_text(line),
            None => self.body.push(line.to_string()),
        }
    }

    fn own_body(&self) -> String {
        self.body.join("\n").trim().to_string()
    }

    fn render(&self) -> String {
        let body = self.own_body();
        let mut parts = Vec::with_capacity(self.children.len() + 1);
        match (&self.heading, body.is_empty()) {
            (Some(heading), true) => parts.push(heading.clone()),
            (Some(heading), false) => parts.push(format!("{heading}\n{body}")),
            (None, false) => parts.push(body),
            (None, true) => {}
        }
        parts.extend(
            self.children
                .iter()
                .map(Section::render)
                .filter(|text| !text.is_empty()),
        );
        parts.join("\n\n")
    }

    fn context(&self) -> Context<'_> {
        let heading = self.heading.as_deref();
        Context {
            heading_line: heading,
            anchor: heading.and_then(heading_anchor),
            title: heading
                .map(heading_title)
                .filter(|title| !title.is_empty())
                .map(str::to_string),
        }
    }

    fn emit(&self, budget: &Budget<'_>, out: &mut Vec<Chunk>) {
        let whole = self.render();
        if whole.is_empty() {
            return;
        }

        let ctx = self.context();
        if budget.fits(&whole) {
            out.push(Chunk {
                anchor: ctx.anchor,
                heading: ctx.title,
                content: whole,
                oversized: false,
            });
            return;
        }

        // A heading with no text of its own is carried by its children.
        let body = self.own_body();
        if !body.is_empty() {
            split_body(&body, &ctx, true, budget, out);
        }
        for child in &self.children {
            child.emit(budget, out);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Granularity {
    Blocks,
    Lines,
    Words,
}

impl Granularity {
    fn separator(self) -> &'static str {
        match self {
            Granularity::Blocks => "\n\n",
            Granularity::Lines => "\n",
            Granularity::Words => " ",
        }
    }

    fn finer(self) -> Option<Self> {
        match self {
            Granularity::Blocks => Some(Granularity::Lines),
            Granularity::Lines => Some(Granularity::Words),
            Granularity::Words => None,
        }
    }
}

struct Unit {
    text: String,
    atomic: bool,
}

struct Piece {
    text: String,
    prefixed: bool,
    oversized: bool,
}

/// Paragraphs separated by blank lines. In markdown, a fenced code block is
/// one atomic unit even when it contains blank lines.
fn blocks(text: &str, markdown: bool) -> Vec<Unit> {
    fn flush(current: &mut Vec<&str>, units: &mut Vec<Unit>, atomic: bool) {
        if !current.is_empty() {
            units.push(Unit {
                text: current.join("\n"),
                atomic,
            });
            current.clear();
        }
    }

    let mut units = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut in_fence = false;

    for line in text.lines() {
        if markdown && is_fence(line) {
            if in_fence {
                current.push(line);
                flush(&mut current, &mut units, true);
            } else {
                flush(&mut current, &mut units, false);
                current.push(line);
            }
            in_fence = !in_fence;
        } else if in_fence {
            current.push(line);
        } else if line.trim().is_empty() {
            flush(&mut current, &mut units, false);
        } else {
            current.push(line);
        }
    }
    // An unterminated fence still runs to the end of the section.
    flush(&mut current, &mut units, in_fence);

    units
}

fn split_units(text: &str, granularity: Granularity) -> Vec<Unit> {
    let unit = |s: &str| Unit {
        text: s.to_string(),
        atomic: false,
    };
    match granularity {
        Granularity::Blocks => blocks(text, false),
        Granularity::Lines => text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(unit)
            .collect(),
        Granularity::Words => text.split_whitespace().map(unit).collect(),
    }
}

struct Packer<'a> {
    budget: &'a Budget<'a>,
    prefix: Option<&'a str>,
}

impl Packer<'_> {
    fn fits(&self, text: &str) -> bool {
        match self.prefix {
            Some(prefix) => self.budget.fits(&format!("{prefix}\n\n{text}")),
            None => self.budget.fits(text),
        }
    }

    fn pack(
        &self,
        units: Vec<Unit>,
        granularity: Granularity,
        out: &mut Vec<Piece>,
    ) {
        let separator = granularity.separator();
        let mut current = String::new();

        for unit in units {
            if !current.is_empty() {
                let candidate = format!("{current}{separator}{}", unit.text);
                if self.fits(&candidate) {
                    current = candidate;
                    continue;
                }
                out.push(Piece {
                    text: std::mem::take(&mut current),
                    prefixed: true,
                    oversized: false,
                });
            }

            if self.fits(&unit.text) {
                current = unit.text;
            } else if self.budget.fits(&unit.text) {
                out.push(Piece {
                    text: unit.text,
                    prefixed: false,
                    oversized: false,
                });
            } else {
                match granularity.finer() {
                    Some(finer) if !unit.atomic => {
                        self.pack(split_units(&unit.text, finer), finer, out)
                    }
                    _ => out.push(Piece {
                        text: unit.text,
                        prefixed: false,
                        oversized: true,
                    }),
                }
            }
        }

        if !current.is_empty() {
            out.push(Piece {
                text: current,
                prefixed: true,
                oversized: false,
            });
        }
    }
}

fn split_body(
    text: &str,
    ctx: &Context<'_>,
    markdown: bool,
    budget: &Budget<'_>,
    out: &mut Vec<Chunk>,
) {
    // Repeat the heading in front of every piece, unless it would eat most
    // of the budget on its own.
    let prefix = ctx.heading_line.filter(|heading| {
        budget.counter.count_tokens(heading) <= budget.max_tokens / 2
    });
    let packer = Packer { budget, prefix };

    let mut pieces = Vec::new();
    packer.pack(blocks(text, markdown), Granularity::Blocks, &mut pieces);

    for piece in pieces {
        let content = match prefix {
            Some(prefix) if piece.prefixed => {
                format!("{prefix}\n\n{}", piece.text)
            }
            _ => piece.text,
        };
        let content = content.trim();
        if content.is_empty() {
            continue;
        }
        out.push(Chunk {
            anchor: ctx.anchor.clone(),
            heading: ctx.title.clone(),
            content: content.to_string(),
            oversized: piece.oversized,
        });
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::embed::WhitespaceTokenCounter;

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
    }

    fn count(text: &str) -> usize {
        WhitespaceTokenCounter.count_tokens(text)
    }

    #[test]
    fn short_text_single_chunk() {
        let chunks = chunk_text(
            "\n  # Title\n\nSome body.  \n",
            DocumentFormat::Markdown,
            &WhitespaceTokenCounter,
            50,
        );
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "# Title\n\nSome body.");
        assert!(!chunks[0].oversized);
    }

    #[test]
    fn blank_text_has_no_chunks() {
        let chunks = chunk_text(
            " \n\t\n",
            DocumentFormat::PlainText,
            &WhitespaceTokenCounter,
            10,
        );
        assert!(chunks.is_empty());
    }

    #[test]
    fn splits_along_headings() {
        let text = "# Intro\nwelcome to the docs\n\n\
                    ## Jobs\nsubmit jobs with sbatch\n\n\
                    ## Storage\nscratch is purged weekly";
        let chunks = chunk_text(
            text,
            DocumentFormat::Markdown,
            &WhitespaceTokenCounter,
            8,
        );

        let anchors: Vec<_> =
            chunks.iter().map(|c| c.anchor.as_deref()).collect();
        assert_eq!(anchors, vec![Some("intro"), Some("jobs"), Some("storage")]);
        assert_eq!(chunks[0].content, "# Intro\n\nwelcome to the docs");
        assert_eq!(chunks[1].content, "## Jobs\nsubmit jobs with sbatch");
        assert_eq!(chunks[2].heading.as_deref(), Some("Storage"));
    }

    #[test]
    fn fitting_section_keeps_subsections() {
        let text = format!(
            "# Big\n{}\n\n# Small\nintro\n\n## Child\nchild text",
            words(20)
        );
        let chunks = chunk_text(
            &text,
            DocumentFormat::Markdown,
            &WhitespaceTokenCounter,
            12,
        );

        let small = chunks
            .iter()
            .find(|c| c.anchor.as_deref() == Some("small"))
            .unwrap();
        assert_eq!(small.content, "# Small\nintro\n\n## Child\nchild text");
        assert!(chunks.iter().all(|c| c.anchor.as_deref() != Some("child")));
    }

    #[test]
    fn oversized_code_fence_is_kept_whole() {
        let text = "# Build\n```\nmake all\n\nmake install\nmake check\n```\n\
                    then done";
        let chunks = chunk_text(
            text,
            DocumentFormat::Markdown,
            &WhitespaceTokenCounter,
            5,
        );

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].oversized);
        assert!(chunks[0].content.starts_with("```"));
        assert!(chunks[0].content.ends_with("```"));
        assert!(chunks[0].content.contains("make install"));
        assert!(!chunks[1].oversized);
        assert_eq!(chunks[1].content, "# Build\n\nthen done");
        assert!(chunks.iter().all(|c| c.anchor.as_deref() == Some("build")));
    }

    #[test]
    fn long_line_falls_back_to_words() {
        let text = words(25);
        let chunks = chunk_text(
            &text,
            DocumentFormat::PlainText,
            &WhitespaceTokenCounter,
            10,
        );

        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| count(&c.content) <= 10));
        let rejoined = chunks
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(rejoined, text);
    }

    #[test]
    fn continuation_pieces_repeat_heading() {
        let text = format!("## Setup\n{}\n\n{}", words(6), words(6));
        let chunks = chunk_text(
            &text,
            DocumentFormat::Markdown,
            &WhitespaceTokenCounter,
            9,
        );

        assert_eq!(chunks.len(), 2);
        for chunk in &chunks {
            assert!(chunk.content.starts_with("## Setup\n\n"));
            assert_eq!(chunk.anchor.as_deref(), Some("setup"));
            assert!(count(&chunk.content) <= 9);
        }
    }

    #[test]
    fn headings_inside_fences_are_text() {
        let root = Section::parse("# Real\n```\n# comment\n```");
        assert_eq!(root.children.len(), 1);
        assert!(root.children[0].children.is_empty());
        assert!(root.children[0].body.contains(&"# comment".to_string()));
    }

    #[test]
    fn plain_text_ignores_markdown_structure() {
        let text = format!("# not a heading {}\n\n{}", words(4), words(6));
        let chunks = chunk_text(
            &text,
            DocumentFormat::PlainText,
            &WhitespaceTokenCounter,
            8,
        );
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.anchor.is_none()));
    }

    #[test]
    fn invalid_utf8_is_a_content_error() {
        let err = chunk_bytes(
            "bad.md",
            &[0x66, 0xff, 0xfe, 0x00],
            DocumentFormat::Markdown,
            &WhitespaceTokenCounter,
            10,
        )
        .unwrap_err();
        assert!(
            matches!(err, Error::Content { ref path, .. } if path == "bad.md")
        );
    }

    #[test]
    fn byte_order_mark_is_dropped() {
        let chunks = chunk_bytes(
            "a.txt",
            "\u{feff}hello".as_bytes(),
            DocumentFormat::PlainText,
            &WhitespaceTokenCounter,
            10,
        )
        .unwrap();
        assert_eq!(chunks[0].content, "hello");
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(
            DocumentFormat::from_path(Path::new("a/b.MD")),
            DocumentFormat::Markdown
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("notes.txt")),
            DocumentFormat::PlainText
        );
    }

    fn document() -> impl Strategy<Value = String> {
        let line = prop_oneof![
            4 => "[a-z]{1,8}( [a-z]{1,8}){0,6}",
            1 => "#{1,3} [a-z]{1,8}",
            1 => Just("```".to_string()),
            2 => Just(String::new()),
        ];
        prop::collection::vec(line, 1..40).prop_map(|lines| lines.join("\n"))
    }

    proptest! {
        #[test]
        fn fitting_text_is_one_trimmed_chunk(
            text in "[ \n]{0,3}[a-z]{1,8}( [a-z]{1,8}){0,10}[ \n]{0,3}",
        ) {
            let chunks = chunk_text(
                &text,
                DocumentFormat::Markdown,
                &WhitespaceTokenCounter,
                11,
            );
            prop_assert_eq!(chunks.len(), 1);
            prop_assert_eq!(chunks[0].content.as_str(), text.trim());
        }

        #[test]
        fn chunks_respect_budget_unless_oversized(
            text in document(),
            max_tokens in 1usize..15,
            markdown in any::<bool>(),
        ) {
            let format = if markdown {
                DocumentFormat::Markdown
            } else {
                DocumentFormat::PlainText
            };
            let chunks =
                chunk_text(&text, format, &WhitespaceTokenCounter, max_tokens);
            for chunk in &chunks {
                prop_assert!(!chunk.content.trim().is_empty());
                prop_assert!(
                    chunk.oversized || count(&chunk.content) <= max_tokens,
                    "chunk over budget: {:?}",
                    chunk.content
                );
            }
        }
    }
}
