// ============================================================
// Layer 4 - Sentence Preprocessor
// ============================================================
// Normalises one CSV cell into a single clean line before it
// reaches the tokenizer:
//
//   1. Tabs, newlines, non-breaking and zero-width spaces → space
//   2. Remaining control characters → space
//   3. Runs of spaces collapsed to one
//   4. Leading/trailing whitespace trimmed

pub struct Preprocessor;

impl Preprocessor {
    pub fn new() -> Self {
        Self
    }

    pub fn clean(&self, text: &str) -> String {
        let mut out        = String::with_capacity(text.len());
        let mut last_space = true;

        for c in text.chars() {
            let c = match c {
                '\u{00A0}' | '\u{200B}' | '\u{FEFF}' => ' ',
                c if c.is_whitespace() || c.is_control() => ' ',
                c => c,
            };
            if c == ' ' {
                if !last_space {
                    out.push(' ');
                }
                last_space = true;
            } else {
                out.push(c);
                last_space = false;
            }
        }

        out.truncate(out.trim_end().len());
        out
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapses_multiple_spaces() {
        let p = Preprocessor::new();
        assert_eq!(p.clean("hello   world"), "hello world");
    }

    #[test]
    fn test_trims_edges() {
        let p = Preprocessor::new();
        assert_eq!(p.clean("  hello world  "), "hello world");
    }

    #[test]
    fn test_flattens_newlines_and_control_chars() {
        let p = Preprocessor::new();
        assert_eq!(p.clean("hello\r\n\x01world\tagain"), "hello world again");
    }

    #[test]
    fn test_unicode_spaces() {
        let p = Preprocessor::new();
        assert_eq!(p.clean("a\u{00A0}\u{200B}b"), "a b");
    }

    #[test]
    fn test_empty_string() {
        let p = Preprocessor::new();
        assert_eq!(p.clean(""), "");
        assert_eq!(p.clean(" \t\n "), "");
    }
}
