/// Number of lines in a snippet when no query term is found.
pub const DEFAULT_SNIPPET_LINES: usize = 6;

/// Maximum number of characters in a snippet before truncation.
pub const DEFAULT_SNIPPET_MAX_CHARS: usize = 400;

/// Whether `line` opens or closes a fenced code block.
pub(crate) fn is_fence(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

/// Level of an ATX heading line (`#` to `######` followed by a space).
pub(crate) fn heading_level(line: &str) -> Option<usize> {
    let hashes = line.bytes().take_while(|b| *b == b'#').count();
    let followed_by_space =
        line[hashes..].chars().next().is_none_or(char::is_whitespace);
    ((1..=6).contains(&hashes) && followed_by_space).then_some(hashes)
}

/// Heading text without the `#` marks.
pub(crate) fn heading_title(line: &str) -> &str {
    line.trim_start_matches('#').trim()
}

/// Titles of the markdown headings in `content`, in order.
///
/// Lines inside fenced code blocks are not headings.
pub fn extract_headlines(content: &str) -> Vec<&str> {
    let mut in_fence = false;
    let mut headlines = Vec::new();
    for line in content.lines() {
        if is_fence(line) {
            in_fence = !in_fence;
        } else if !in_fence
            && heading_level(line).is_some()
            && !heading_title(line).is_empty()
        {
            headlines.push(heading_title(line));
        }
    }
    headlines
}

/// Headline text for a passage: the headings it contains, or the heading of
/// the section it was cut from.
///
/// # Examples
///
/// ```
/// use docindex::text_util::headline_for;
///
/// assert_eq!(headline_for("# Jobs\nbody\n## Arrays", None), "Jobs\nArrays");
/// assert_eq!(headline_for("just body", Some("Queues")), "Queues");
/// assert_eq!(headline_for("just body", None), "");
/// ```
pub fn headline_for(content: &str, section_heading: Option<&str>) -> String {
    let headlines = extract_headlines(content);
    if headlines.is_empty() {
        section_heading.unwrap_or_default().to_string()
    } else {
        headlines.join("\n")
    }
}

/// Extract a few lines of `text` around the first line containing any word
/// of `query`.
///
/// Returns `(snippet_text, start_line_number)` where the line number is
/// 1-indexed. Without a match, returns the first few lines. Returns `None`
/// if the text is empty.
pub fn extract_snippet(text: &str, query: &str) -> Option<(String, usize)> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return None;
    }

    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|term| term.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect();
    let match_idx = lines.iter().position(|line| {
        let line = line.to_lowercase();
        terms.iter().any(|term| line.contains(term.as_str()))
    });

    let (start, end) = match match_idx {
        Some(idx) => (idx.saturating_sub(2), (idx + 3).min(lines.len())),
        None => (0, DEFAULT_SNIPPET_LINES.min(lines.len())),
    };

    let mut snippet = lines[start..end].join("\n");
    if let Some((cut, _)) = snippet.char_indices().nth(DEFAULT_SNIPPET_MAX_CHARS)
    {
        snippet.truncate(cut);
        snippet.push_str("...");
    }

    Some((snippet, start + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headings_in_fences_are_not_headlines() {
        let content = "# Build\n```sh\n# comment\n```\n## Test";
        assert_eq!(extract_headlines(content), vec!["Build", "Test"]);
    }

    #[test]
    fn hashtags_are_not_headlines() {
        assert!(extract_headlines("#hashtag\n#").is_empty());
    }

    #[test]
    fn heading_levels() {
        assert_eq!(heading_level("#hashtag"), None);
        assert_eq!(heading_level("### Three"), Some(3));
        assert_eq!(heading_level("#"), Some(1));
        assert_eq!(heading_level("####### seven"), None);
        assert_eq!(heading_level("text # not"), None);
    }

    #[test]
    fn fences_with_tildes() {
        assert!(is_fence("  ~~~python"));
        assert!(is_fence("```"));
        assert!(!is_fence("`inline`"));
    }

    #[test]
    fn extract_snippet_match_found() {
        let text = "line1\nline2\nline3\nThe GPU partition\nline5\nline6\nline7";
        let (snippet, start) = extract_snippet(text, "gpu nodes").unwrap();
        assert_eq!(start, 2);
        assert!(snippet.contains("GPU partition"));
        assert!(snippet.starts_with("line2"));
    }

    #[test]
    fn extract_snippet_no_match_returns_head() {
        let text = "a\nb\nc\nd\ne\nf\ng\nh";
        let (snippet, start) = extract_snippet(text, "zzz").unwrap();
        assert_eq!(start, 1);
        assert_eq!(snippet, "a\nb\nc\nd\ne\nf");
    }

    #[test]
    fn extract_snippet_empty_text() {
        assert!(extract_snippet("", "query").is_none());
    }

    #[test]
    fn extract_snippet_truncates_on_char_boundary() {
        let text = "é".repeat(DEFAULT_SNIPPET_MAX_CHARS + 10);
        let (snippet, _) = extract_snippet(&text, "x").unwrap();
        assert!(snippet.ends_with("..."));
        assert_eq!(snippet.chars().count(), DEFAULT_SNIPPET_MAX_CHARS + 3);
    }
}
