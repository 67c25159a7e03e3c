//! Whitespace- and comment-insensitive normalization of C-family sources.
//!
//! Hashing the normalized text instead of the raw bytes lets reformatting,
//! comment edits and trailing-whitespace changes keep a cache entry valid,
//! while any change to code, string literals or preprocessor directives
//! still changes the hash.

/// File extensions (lowercase) whose content is normalized before hashing.
pub const NORMALIZED_EXTENSIONS: &[&str] = &[
    "c", "cc", "cpp", "cxx", "h", "hh", "hpp", "hxx", "inl", "ipp",
];

/// Returns `true` if files with this extension are normalized before hashing.
pub fn is_normalized_extension(ext: &str) -> bool {
    NORMALIZED_EXTENSIONS.contains(&ext)
}

fn is_ident(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_operator(c: char) -> bool {
    "+-*/%<>=!&|^~.:?#".contains(c)
}

/// Whether a whitespace run between `prev` and `next` changes tokenization.
fn space_is_significant(prev: char, next: char) -> bool {
    (is_ident(prev) && is_ident(next)) || (is_operator(prev) && is_operator(next))
}

struct Normalizer {
    out: String,
    line: String,
    pending_space: bool,
}

impl Normalizer {
    fn push(&mut self, c: char) {
        if self.pending_space {
            if let Some(prev) = self.line.chars().last() {
                if space_is_significant(prev, c) {
                    self.line.push(' ');
                }
            }
            self.pending_space = false;
        }
        self.line.push(c);
    }

    fn push_str(&mut self, s: &str) {
        for c in s.chars() {
            self.push(c);
        }
    }

    /// Ends a line inside a raw string literal, where trailing whitespace
    /// is content.
    fn end_raw_line(&mut self) {
        self.out.push_str(&self.line);
        self.out.push('\n');
        self.line.clear();
    }

    fn end_line(&mut self) {
        self.out.push_str(self.line.trim_end());
        self.out.push('\n');
        self.line.clear();
        self.pending_space = false;
    }

    fn finish(mut self) -> String {
        let tail = self.line.trim_end().to_string();
        self.out.push_str(&tail);
        let trimmed = self.out.trim_end_matches('\n').len();
        self.out.truncate(trimmed);
        self.out
    }
}

/// Normalizes C-family source text.
///
/// - Leading indentation, trailing whitespace, CR characters and trailing
///   blank lines are dropped.
/// - Runs of spaces inside a line collapse to nothing, or to one space when
///   removing them would merge two identifiers or two operators.
/// - Comment text is dropped; comment markers and the line breaks inside
///   block comments are kept.
/// - Preprocessor lines, string literals and character literals are copied
///   verbatim. Raw string literals (`R"delim( ... )delim"`) are copied
///   verbatim across line breaks.
pub fn normalize_source(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut n = Normalizer {
        out: String::with_capacity(text.len()),
        line: String::new(),
        pending_space: false,
    };
    let mut at_line_start = true;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if c == '\n' {
            n.end_line();
            at_line_start = true;
            i += 1;
            continue;
        }
        if matches!(c, ' ' | '\t' | '\r' | '\x0c') {
            if !at_line_start {
                n.pending_space = true;
            }
            i += 1;
            continue;
        }

        if at_line_start && c == '#' {
            while i < chars.len() && chars[i] != '\n' {
                n.line.push(chars[i]);
                i += 1;
            }
            at_line_start = false;
            continue;
        }
        at_line_start = false;

        match (c, next) {
            ('/', Some('*')) => {
                n.push_str("/*");
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    if chars[i] == '\n' {
                        n.end_line();
                    }
                    i += 1;
                }
                if i < chars.len() {
                    n.push_str("*/");
                    i += 2;
                }
            }
            ('/', Some('/')) => {
                n.push_str("//");
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            ('"', _) if raw_prefix_before(&chars, i) && raw_delimiter(&chars, i + 1).is_some() => {
                let delim = raw_delimiter(&chars, i + 1).unwrap_or_default();
                let terminator: Vec<char> =
                    std::iter::once(')').chain(delim).chain(std::iter::once('"')).collect();
                n.push(c);
                i += 1;
                while i < chars.len() && !chars[i..].starts_with(&terminator) {
                    if chars[i] == '\n' {
                        n.end_raw_line();
                    } else {
                        n.line.push(chars[i]);
                    }
                    i += 1;
                }
                let end = (i + terminator.len()).min(chars.len());
                n.line.extend(&chars[i..end]);
                i = end;
            }
            ('"' | '\'', _) => {
                n.push(c);
                i += 1;
                while i < chars.len() && chars[i] != '\n' {
                    let lc = chars[i];
                    n.line.push(lc);
                    i += 1;
                    if lc == '\\' {
                        if let Some(&escaped) = chars.get(i) {
                            n.line.push(escaped);
                            i += 1;
                        }
                    } else if lc == c {
                        break;
                    }
                }
            }
            _ => {
                n.push(c);
                i += 1;
            }
        }
    }

    n.finish()
}

/// Whether the `"` at `quote` opens a raw string: it directly follows an
/// `R`, `u8R`, `uR`, `UR` or `LR` token.
fn raw_prefix_before(chars: &[char], quote: usize) -> bool {
    let mut start = quote;
    while start > 0 && is_ident(chars[start - 1]) {
        start -= 1;
    }
    let prefix: String = chars[start..quote].iter().collect();
    matches!(prefix.as_str(), "R" | "u8R" | "uR" | "UR" | "LR")
}

/// Reads the delimiter of a raw string starting after its opening quote.
/// Returns `None` if no `(` follows within the 16 characters C++ allows.
fn raw_delimiter(chars: &[char], from: usize) -> Option<Vec<char>> {
    let mut delim = Vec::new();
    for &c in chars.get(from..)?.iter().take(17) {
        match c {
            '(' => return Some(delim),
            ')' | '\\' | '"' | ' ' | '\t' | '\n' => return None,
            _ => delim.push(c),
        }
    }
    None
}
