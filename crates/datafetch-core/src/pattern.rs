//! Glob-style filename patterns for directory mode.
//!
//! `*` matches any run of characters, `?` exactly one, `[abc]` / `[a-z]` a
//! class and `[!abc]` a negated class. Everything else is literal. Matching is
//! anchored at both ends and case-insensitive.

use regex::{Regex, RegexBuilder};

use crate::error::TransferError;

#[derive(Debug, Clone)]
pub struct FilenamePattern {
    glob: String,
    regex: Regex,
}

impl FilenamePattern {
    pub fn new(glob: &str) -> Result<Self, TransferError> {
        let source = glob_to_regex(glob);
        let regex = RegexBuilder::new(&source)
            .case_insensitive(true)
            .build()
            .map_err(|e| TransferError::InvalidSource(format!("filename pattern '{}': {}", glob, e)))?;
        Ok(Self {
            glob: glob.to_string(),
            regex,
        })
    }

    pub fn glob(&self) -> &str {
        &self.glob
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }
}

fn glob_to_regex(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::with_capacity(glob.len() * 2 + 2);
    out.push('^');
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => match class_end(&chars, i) {
                Some(end) => {
                    out.push('[');
                    let mut j = i + 1;
                    if chars[j] == '!' {
                        out.push('^');
                        j += 1;
                    }
                    while j < end {
                        let c = chars[j];
                        // Keep ranges, escape anything regex treats specially inside a class.
                        if c == '\\' || c == '[' || c == ']' || c == '^' || c == '&' || c == '~' {
                            out.push('\\');
                        }
                        out.push(c);
                        j += 1;
                    }
                    out.push(']');
                    i = end;
                }
                None => out.push_str(r"\["),
            },
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    out.push('$');
    out
}

/// Index of the `]` closing the class opened at `start`, if any.
/// A `]` directly after `[` or `[!` is a literal member.
fn class_end(chars: &[char], start: usize) -> Option<usize> {
    let mut j = start + 1;
    if chars.get(j) == Some(&'!') {
        j += 1;
    }
    if chars.get(j) == Some(&']') {
        j += 1;
    }
    while j < chars.len() {
        if chars[j] == ']' {
            return Some(j);
        }
        j += 1;
    }
    None
}
