//! Source preprocessing applied to every file before it is sent.
//!
//! Preprocessors must be referentially transparent: the same input always
//! yields the same output, otherwise fingerprints would churn on every scan.

use std::ops::Range;

/// Modules provided by the client runtime that must not be rewritten.
pub const BUILTIN_MODULES: &[&str] = &[
    "cc.audio.dfpwm",
    "cc.completion",
    "cc.expect",
    "cc.image.nft",
    "cc.pretty",
    "cc.require",
    "cc.shell.completion",
    "cc.strings",
];

/// A pure `text -> text` transform.
pub trait Preprocessor: Send + Sync {
    fn process(&self, source: &str) -> String;
}

/// Passes text through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Preprocessor for Passthrough {
    fn process(&self, source: &str) -> String {
        source.to_string()
    }
}

/// Rewrites `local x = require("mod")` to root-qualified `require("/mod")`
/// and optionally strips comments and redundant whitespace.
#[derive(Debug, Clone)]
pub struct LuaPreprocessor {
    minify: bool,
    ignored_modules: Vec<String>,
}

impl LuaPreprocessor {
    pub fn new(minify: bool) -> Self {
        Self {
            minify,
            ignored_modules: BUILTIN_MODULES.iter().map(|m| m.to_string()).collect(),
        }
    }

    /// Replace the list of modules left untouched by require rewriting.
    pub fn with_ignored_modules(mut self, modules: Vec<String>) -> Self {
        self.ignored_modules = modules;
        self
    }

    fn is_ignored(&self, module: &str) -> bool {
        self.ignored_modules.iter().any(|m| m == module)
    }

    /// Rewrite `require("mod")` calls that directly initialize a `local`.
    ///
    /// Only a bare call counts: `local x = f(require("m"))`,
    /// `local x = require("m").field` and requires inside function bodies
    /// declared with `local function` are left alone.
    pub fn rewrite_requires(&self, source: &str) -> String {
        let mut out = String::with_capacity(source.len() + 16);
        let mut copied = 0;

        for start in local_statements(source) {
            for (range, module) in require_initializers(source, start) {
                if range.start < copied || self.is_ignored(module) {
                    continue;
                }
                out.push_str(&source[copied..range.start]);
                out.push_str("require(\"/");
                out.push_str(module.trim_start_matches('/'));
                out.push_str("\")");
                copied = range.end;
            }
        }

        out.push_str(&source[copied..]);
        out
    }
}

impl Default for LuaPreprocessor {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Preprocessor for LuaPreprocessor {
    fn process(&self, source: &str) -> String {
        let rewritten = self.rewrite_requires(source);
        if self.minify {
            minify(&rewritten)
        } else {
            rewritten
        }
    }
}

/// Byte offsets of every `local` keyword that starts a line.
fn local_statements(source: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut offset = 0;
    for line in source.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if let Some(after) = trimmed.strip_prefix("local") {
            if after.starts_with(char::is_whitespace) {
                starts.push(offset + line.len() - trimmed.len());
            }
        }
        offset += line.len();
    }
    starts
}

/// Direct `require("mod")` initializers of the `local` statement at `start`.
///
/// Returns the byte range of each call and its module name.
fn require_initializers(source: &str, start: usize) -> Vec<(Range<usize>, &str)> {
    let mut found = Vec::new();
    let mut pos = start + "local".len();

    // Name list, with optional `<attrib>` after each name.
    loop {
        pos = skip_space(source, pos);
        let Some(end) = ident_end(source, pos) else {
            return found;
        };
        if &source[pos..end] == "function" {
            return found;
        }
        pos = skip_space(source, end);
        if source[pos..].starts_with('<') {
            let Some(close) = source[pos..].find('>') else {
                return found;
            };
            pos = skip_space(source, pos + close + 1);
        }
        if !source[pos..].starts_with(',') {
            break;
        }
        pos += 1;
    }

    if !source[pos..].starts_with('=') || source[pos..].starts_with("==") {
        return found;
    }
    pos += 1;

    // Expression list.
    loop {
        pos = skip_space(source, pos);
        let rest = &source[pos..];
        let direct = parse_require_call(rest).filter(|&(_, len)| ends_expression(&rest[len..]));
        pos = match direct {
            Some((module, len)) => {
                found.push((pos..pos + len, module));
                pos + len
            }
            None => skip_expression(source, pos),
        };
        pos += source[pos..].len() - source[pos..].trim_start_matches([' ', '\t']).len();
        if !source[pos..].starts_with(',') {
            return found;
        }
        pos += 1;
    }
}

fn skip_space(source: &str, pos: usize) -> usize {
    pos + source[pos..].len() - source[pos..].trim_start().len()
}

fn ident_end(source: &str, pos: usize) -> Option<usize> {
    let rest = &source[pos..];
    if !rest.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        return None;
    }
    let len = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    Some(pos + len)
}

/// Whether `tail` continues with the next expression or ends the statement.
fn ends_expression(tail: &str) -> bool {
    let tail = tail.trim_start_matches([' ', '\t']);
    tail.is_empty() || tail.starts_with([',', ';', '\n', '\r']) || tail.starts_with("--")
}

/// Skip one expression, stopping at a top-level `,`, `;`, newline or comment.
fn skip_expression(source: &str, pos: usize) -> usize {
    let mut depth = 0usize;
    let mut chars = source[pos..].char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            '"' | '\'' => {
                while let Some((_, s)) = chars.next() {
                    if s == '\\' {
                        chars.next();
                    } else if s == c || s == '\n' {
                        break;
                    }
                }
            }
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                if depth == 0 {
                    return pos + i;
                }
                depth -= 1;
            }
            ',' | ';' | '\n' if depth == 0 => return pos + i,
            '-' if depth == 0 && matches!(chars.peek(), Some((_, '-'))) => return pos + i,
            _ => {}
        }
    }
    source.len()
}

/// Parse `require ( "name" )` at the start of `s`.
///
/// Returns the module name and the number of bytes consumed.
fn parse_require_call(s: &str) -> Option<(&str, usize)> {
    let after_kw = s.strip_prefix("require")?;
    let after_ws = after_kw.trim_start();
    let after_paren = after_ws.strip_prefix('(')?.trim_start();

    let quote = after_paren.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let body = &after_paren[1..];
    let close = body.find(quote)?;
    let module = &body[..close];
    if module.contains('\\') || module.contains('\n') {
        return None;
    }

    let tail = body[close + 1..].trim_start();
    let tail = tail.strip_prefix(')')?;
    Some((module, s.len() - tail.len()))
}

/// Lexer state for [`minify`].
#[derive(Clone, Copy)]
enum State {
    Code,
    ShortString(char),
    LongString(usize),
    LongComment(usize),
    LineComment,
}

/// Strip comments, indentation, trailing whitespace and blank lines.
///
/// String literals, including multi-line long strings, are copied verbatim.
pub fn minify(source: &str) -> String {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut line = String::new();
    let mut state = State::Code;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match state {
            State::Code => match c {
                '\n' => {
                    flush_line(&mut out, &mut line);
                    i += 1;
                }
                '"' | '\'' => {
                    line.push(c);
                    state = State::ShortString(c);
                    i += 1;
                }
                '-' if chars.get(i + 1) == Some(&'-') => {
                    if let Some((level, len)) = long_bracket_open(&chars, i + 2) {
                        state = State::LongComment(level);
                        i += 2 + len;
                    } else {
                        state = State::LineComment;
                        i += 2;
                    }
                }
                '[' => {
                    if let Some((level, len)) = long_bracket_open(&chars, i) {
                        line.extend(&chars[i..i + len]);
                        state = State::LongString(level);
                        i += len;
                    } else {
                        line.push(c);
                        i += 1;
                    }
                }
                _ => {
                    line.push(c);
                    i += 1;
                }
            },
            State::ShortString(quote) => {
                line.push(c);
                if c == '\\' {
                    if let Some(&next) = chars.get(i + 1) {
                        line.push(next);
                    }
                    i += 2;
                    continue;
                }
                if c == quote || c == '\n' {
                    state = State::Code;
                }
                i += 1;
            }
            State::LongString(level) => {
                if let Some(len) = long_bracket_close(&chars, i, level) {
                    line.extend(&chars[i..i + len]);
                    state = State::Code;
                    i += len;
                } else {
                    line.push(c);
                    i += 1;
                }
            }
            State::LongComment(level) => {
                if let Some(len) = long_bracket_close(&chars, i, level) {
                    if !line.ends_with(char::is_whitespace) {
                        line.push(' ');
                    }
                    state = State::Code;
                    i += len;
                } else {
                    i += 1;
                }
            }
            State::LineComment => {
                if c == '\n' {
                    state = State::Code;
                    flush_line(&mut out, &mut line);
                }
                i += 1;
            }
        }
    }

    flush_line(&mut out, &mut line);
    out
}

fn flush_line(out: &mut String, line: &mut String) {
    let trimmed = line.trim();
    if !trimmed.is_empty() {
        out.push_str(trimmed);
        out.push('\n');
    }
    line.clear();
}

/// Match `[`, `=`*, `[` at `start`. Returns the level and matched length.
fn long_bracket_open(chars: &[char], start: usize) -> Option<(usize, usize)> {
    if chars.get(start) != Some(&'[') {
        return None;
    }
    let mut level = 0;
    while chars.get(start + 1 + level) == Some(&'=') {
        level += 1;
    }
    if chars.get(start + 1 + level) == Some(&'[') {
        Some((level, level + 2))
    } else {
        None
    }
}

/// Match `]`, `=`{level}, `]` at `start`. Returns the matched length.
fn long_bracket_close(chars: &[char], start: usize, level: usize) -> Option<usize> {
    if chars.get(start) != Some(&']') {
        return None;
    }
    for offset in 1..=level {
        if chars.get(start + offset) != Some(&'=') {
            return None;
        }
    }
    if chars.get(start + 1 + level) == Some(&']') {
        Some(level + 2)
    } else {
        None
    }
}
