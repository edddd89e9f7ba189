//! Turns raw agent output into display text.
//!
//! Steps, in order: normalise line endings, strip bracketed citation and
//! debug markers (anything in `[...]` or `【...】` containing `:`, `*` or
//! `†`), collapse whitespace, turn newlines into `<br/>` markers and
//! `**bold**` into `<strong>`. Markers may span lines and are stripped until
//! none remain, so the result contains no newlines and no strippable markers
//! and formatting it again changes nothing.

use std::borrow::Cow;

use regex::Regex;

/// Compiled patterns for response formatting.
pub struct ResponseSanitizer {
    marker: Regex,
    horizontal_space: Regex,
    space_around_newline: Regex,
    blank_lines: Regex,
    bold: Regex,
}

impl ResponseSanitizer {
    /// Compile the formatting patterns.
    ///
    /// # Errors
    /// Returns an error if a pattern fails to compile.
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            marker: Regex::new(r"[^\S\n]*[【\[][^【】\[\]]*[:*†][^【】\[\]]*[】\]]")?,
            horizontal_space: Regex::new(r"[^\S\n]+")?,
            space_around_newline: Regex::new(r" ?\n ?")?,
            blank_lines: Regex::new(r"\n{3,}")?,
            bold: Regex::new(r"\*\*(.+?)\*\*")?,
        })
    }

    /// Format raw agent text for display.
    #[must_use]
    pub fn format(&self, raw: &str) -> String {
        let mut text = raw.replace("\r\n", "\n").replace('\r', "\n");

        // Each pass removes the innermost markers; every match shortens the text.
        loop {
            let stripped = match self.marker.replace_all(&text, "") {
                Cow::Borrowed(_) => break,
                Cow::Owned(owned) => owned,
            };
            text = stripped;
        }

        let text = self.horizontal_space.replace_all(&text, " ");
        let text = self.space_around_newline.replace_all(&text, "\n");
        let text = self.blank_lines.replace_all(&text, "\n\n");
        let text = text.trim().replace('\n', "<br/>");

        self.bold.replace_all(&text, "<strong>$1</strong>").into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sanitizer() -> ResponseSanitizer {
        ResponseSanitizer::new().unwrap()
    }

    #[test]
    fn test_strips_citation_markers() {
        let s = sanitizer();
        assert_eq!(
            s.format("The red dress is in stock 【4:0†source】."),
            "The red dress is in stock."
        );
        assert_eq!(s.format("Price [doc:12] is $40"), "Price is $40");
        assert_eq!(s.format("[**debug**] Done"), "Done");
    }

    #[test]
    fn test_keeps_plain_brackets() {
        assert_eq!(sanitizer().format("Sizes [S, M, L]"), "Sizes [S, M, L]");
    }

    #[test]
    fn test_nested_markers() {
        assert_eq!(sanitizer().format("a [x [b:c] y:z] b"), "a b");
    }

    #[test]
    fn test_deeply_nested_markers() {
        let nested = format!("x {}{} y", "[a:".repeat(12), "]".repeat(12));
        assert_eq!(sanitizer().format(&nested), "x y");
    }

    #[test]
    fn test_marker_spanning_lines() {
        assert_eq!(sanitizer().format("see [a\n:b] here"), "see here");
        assert_eq!(sanitizer().format("see 【4:0\r\n†source】 here"), "see here");
    }

    #[test]
    fn test_whitespace_and_newlines() {
        let s = sanitizer();
        assert_eq!(s.format("  Hello \t  world  "), "Hello world");
        assert_eq!(s.format("one\r\ntwo"), "one<br/>two");
        assert_eq!(s.format("para one \n\n\n\n para two"), "para one<br/><br/>para two");
    }

    #[test]
    fn test_bold() {
        assert_eq!(
            sanitizer().format("Added **red dress (M)** to your cart."),
            "Added <strong>red dress (M)</strong> to your cart."
        );
    }

    #[test]
    fn test_plain_text_is_unchanged() {
        let text = "Added red dress (M) to your cart.";
        assert_eq!(sanitizer().format(text), text);
    }

    #[test]
    fn test_format_is_idempotent() {
        let s = sanitizer();
        let samples = [
            "",
            "   ",
            "Added red dress (M) to your cart.",
            "**Bold** and **more bold**\n\nNext paragraph 【1:2†catalog】",
            "**spans\nlines** here",
            "odd ** asterisks *** everywhere ****",
            "line one  \r\n  line two\n\n\n\nline three [ref:1]",
            "[a:b][c*d] tail\t\twith tabs",
            "a [x [b:c] y:z] b",
            "<br/> already formatted <strong>x</strong>",
            "see [a\n:b] here",
            "open [bracket\n\nacross: lines",
        ];
        let nested = format!("x {}{} y", "[a:".repeat(10), "]".repeat(10));
        for sample in samples.iter().copied().chain([nested.as_str()]) {
            let once = s.format(sample);
            assert_eq!(s.format(&once), once, "not idempotent for {sample:?}");
        }
    }
}
