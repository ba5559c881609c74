//! Passages: the unit of text the index stores and returns.

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::{Deserialize, Serialize};

/// Characters escaped when a source path is turned into a URL path.
const URL_PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Where a passage came from: a path relative to the documentation folder
/// plus the anchor of the section it was cut from.
///
/// # Examples
///
/// ```
/// use docindex::passage::SourceLocator;
///
/// let source = SourceLocator::new("jobs/index.md", Some("queues".into()));
/// assert_eq!(source.to_string(), "jobs/index.md#queues");
/// assert_eq!(
///     source.to_url("https://docs.example.org/"),
///     "https://docs.example.org/jobs/#queues"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocator {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
}

impl SourceLocator {
    pub fn new(path: impl Into<String>, anchor: Option<String>) -> Self {
        Self {
            path: path.into(),
            anchor,
        }
    }

    /// Build a display URL rooted at `base`.
    ///
    /// `dir/index.md` maps to `dir/` and `page.md` maps to `page/`, the way
    /// static documentation generators publish markdown pages.
    pub fn to_url(&self, base: &str) -> String {
        let page = if self.path == "index.md" {
            String::new()
        } else if let Some(dir) = self.path.strip_suffix("/index.md") {
            format!("{dir}/")
        } else if let Some(stem) = self.path.strip_suffix(".md") {
            format!("{stem}/")
        } else {
            self.path.clone()
        };

        let mut url = String::with_capacity(base.len() + page.len() + 16);
        url.push_str(base);
        if !base.is_empty() && !base.ends_with('/') {
            url.push('/');
        }
        url.extend(utf8_percent_encode(&page, URL_PATH));
        if let Some(anchor) = &self.anchor {
            url.push('#');
            url.push_str(anchor);
        }
        url
    }
}

impl std::fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.anchor {
            Some(anchor) => write!(f, "{}#{anchor}", self.path),
            None => f.write_str(&self.path),
        }
    }
}

/// An indexed unit of text.
///
/// `content` is always trimmed. The `id` is assigned by the index backend
/// when the passage is inserted and is never reused while the passage is
/// stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    pub id: u64,
    pub source: SourceLocator,
    pub content: String,
}

impl Passage {
    pub fn new(id: u64, source: SourceLocator, content: &str) -> Self {
        Self {
            id,
            source,
            content: content.trim().to_string(),
        }
    }
}

/// Turn a markdown heading line into a URL fragment.
///
/// Lower-cases, drops everything outside `[a-z0-9- ]` (including the leading
/// `#` marks), trims, and joins words with dashes. Returns `None` when
/// nothing is left.
///
/// # Examples
///
/// ```
/// use docindex::passage::heading_anchor;
///
/// assert_eq!(heading_anchor("## Running Jobs!").as_deref(), Some("running-jobs"));
/// assert_eq!(heading_anchor("# ???"), None);
/// ```
pub fn heading_anchor(heading: &str) -> Option<String> {
    let kept: String = heading
        .to_lowercase()
        .chars()
        .filter(|c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | ' ')
        })
        .collect();
    let slug = kept.trim().replace(' ', "-");
    (!slug.is_empty()).then_some(slug)
}
