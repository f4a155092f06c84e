//! Line tokenizers for syntax highlighting
//!
//! A tokenizer lexes one line at a time. Anything a construct carries over the
//! line break (an open block comment, say) travels in an opaque
//! [`ContinuationState`] that is handed to the next line.

use crate::text_effects::Style;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Token types (universal across languages)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    Text,
    Whitespace,
    Keyword,
    Function,
    Type,
    String,
    Number,
    Comment,
    Constant,
    Operator,
    Punctuation,
    Variable,
    /// Fallback when a tokenizer could not classify a line
    Unknown,
}

impl TokenKind {
    pub fn class_name(self) -> &'static str {
        match self {
            TokenKind::Text => "text",
            TokenKind::Whitespace => "whitespace",
            TokenKind::Keyword => "keyword",
            TokenKind::Function => "function",
            TokenKind::Type => "type",
            TokenKind::String => "string",
            TokenKind::Number => "number",
            TokenKind::Comment => "comment",
            TokenKind::Constant => "constant",
            TokenKind::Operator => "operator",
            TokenKind::Punctuation => "punctuation",
            TokenKind::Variable => "variable",
            TokenKind::Unknown => "unknown",
        }
    }

    /// Style applied on the syntax layer
    pub fn style(self) -> Style {
        Style::new().with("class", self.class_name())
    }
}

/// Run-length classified slice of a line, in bytes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub len: usize,
    pub kind: TokenKind,
}

impl Token {
    pub fn new(len: usize, kind: TokenKind) -> Self {
        Self { len, kind }
    }
}

/// Opaque tokenizer state carried across a line break
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContinuationState(Vec<u8>);

impl ContinuationState {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// A language mode
pub trait Tokenizer: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn initial_state(&self) -> ContinuationState {
        ContinuationState::default()
    }

    /// Lex one line (without its line break); token lengths sum to `line.len()`
    fn tokenize(&self, line: &str, state: &ContinuationState) -> (Vec<Token>, ContinuationState);
}

/// Lex `text` from scratch, one token list per line
pub fn tokenize_all(tokenizer: &dyn Tokenizer, text: &str) -> Vec<Vec<Token>> {
    let mut state = tokenizer.initial_state();
    text.split('\n')
        .map(|line| {
            let (tokens, next) = tokenizer.tokenize(line, &state);
            state = next;
            tokens
        })
        .collect()
}

/// Append a token, merging it into the previous one when the kind repeats
pub fn push_token(tokens: &mut Vec<Token>, len: usize, kind: TokenKind) {
    if len == 0 {
        return;
    }
    match tokens.last_mut() {
        Some(last) if last.kind == kind => last.len += len,
        _ => tokens.push(Token::new(len, kind)),
    }
}

// === Plain Text ===

/// One text run per line
#[derive(Clone, Copy, Debug, Default)]
pub struct PlainText;

impl Tokenizer for PlainText {
    fn name(&self) -> &str {
        "plain"
    }

    fn tokenize(&self, line: &str, state: &ContinuationState) -> (Vec<Token>, ContinuationState) {
        let mut tokens = Vec::new();
        push_token(&mut tokens, line.len(), TokenKind::Text);
        (tokens, state.clone())
    }
}

// === C-like Languages ===

const RUST_KEYWORDS: &[&str] = &[
    "as", "async", "await", "break", "const", "continue", "crate", "dyn", "else", "enum", "extern",
    "false", "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod", "move", "mut", "pub",
    "ref", "return", "self", "Self", "static", "struct", "super", "trait", "true", "type",
    "unsafe", "use", "where", "while",
];

const OPERATOR_CHARS: &[u8] = b"+-*/%=<>!&|^~?:@";
const PUNCTUATION_CHARS: &[u8] = b"(){}[];,.#";

/// State byte for an unterminated block comment
const IN_BLOCK_COMMENT: u8 = 1;

/// Best-effort lexer for brace languages with `//` and `/* */` comments
#[derive(Clone, Debug)]
pub struct CLike {
    name: String,
    keywords: HashSet<String>,
}

impl CLike {
    pub fn new<I, S>(name: impl Into<String>, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            keywords: keywords.into_iter().map(Into::into).collect(),
        }
    }

    pub fn rust() -> Self {
        Self::new("rust", RUST_KEYWORDS.iter().copied())
    }

    fn classify_word(&self, word: &str, rest: &[u8]) -> TokenKind {
        if self.keywords.contains(word) {
            TokenKind::Keyword
        } else if rest.first() == Some(&b'(') || rest.first() == Some(&b'!') {
            TokenKind::Function
        } else if word.len() > 1 && word.bytes().all(|b| b.is_ascii_uppercase() || b == b'_' || b.is_ascii_digit()) {
            TokenKind::Constant
        } else if word.starts_with(|c: char| c.is_ascii_uppercase()) {
            TokenKind::Type
        } else {
            TokenKind::Variable
        }
    }
}

impl Default for CLike {
    fn default() -> Self {
        Self::rust()
    }
}

impl Tokenizer for CLike {
    fn name(&self) -> &str {
        &self.name
    }

    fn tokenize(&self, line: &str, state: &ContinuationState) -> (Vec<Token>, ContinuationState) {
        let bytes = line.as_bytes();
        let mut tokens = Vec::new();
        let mut in_comment = state.as_bytes().first() == Some(&IN_BLOCK_COMMENT);
        let mut i = 0;

        while i < bytes.len() {
            let start = i;
            if in_comment {
                match find_pair(&bytes[i..], b'*', b'/') {
                    Some(at) => {
                        i += at + 2;
                        in_comment = false;
                    }
                    None => i = bytes.len(),
                }
                push_token(&mut tokens, i - start, TokenKind::Comment);
                continue;
            }

            let b = bytes[i];
            let next = bytes.get(i + 1).copied();
            let kind = if b.is_ascii_whitespace() {
                i += run_len(&bytes[i..], |b| b.is_ascii_whitespace());
                TokenKind::Whitespace
            } else if b == b'/' && next == Some(b'/') {
                i = bytes.len();
                TokenKind::Comment
            } else if b == b'/' && next == Some(b'*') {
                i += 2;
                in_comment = true;
                TokenKind::Comment
            } else if b == b'"' || (b == b'\'' && is_char_literal(&bytes[i..])) {
                i += string_len(&bytes[i..], b);
                TokenKind::String
            } else if b.is_ascii_digit() {
                i += run_len(&bytes[i..], |b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.');
                TokenKind::Number
            } else if b.is_ascii_alphabetic() || b == b'_' {
                i += run_len(&bytes[i..], |b| b.is_ascii_alphanumeric() || b == b'_');
                self.classify_word(&line[start..i], &bytes[i..])
            } else if OPERATOR_CHARS.contains(&b) || b == b'\'' {
                i += 1;
                TokenKind::Operator
            } else if PUNCTUATION_CHARS.contains(&b) {
                i += 1;
                TokenKind::Punctuation
            } else {
                // Non-ASCII or stray byte: step one whole character
                i += line[i..].chars().next().map_or(1, char::len_utf8);
                TokenKind::Text
            };
            push_token(&mut tokens, i - start, kind);
        }

        let state = if in_comment {
            ContinuationState::from_bytes([IN_BLOCK_COMMENT])
        } else {
            ContinuationState::default()
        };
        (tokens, state)
    }
}

fn run_len(bytes: &[u8], pred: impl Fn(u8) -> bool) -> usize {
    bytes.iter().take_while(|&&b| pred(b)).count()
}

fn find_pair(bytes: &[u8], first: u8, second: u8) -> Option<usize> {
    bytes.windows(2).position(|w| w[0] == first && w[1] == second)
}

/// `'x'` or `'\n'`, as opposed to a lifetime
fn is_char_literal(bytes: &[u8]) -> bool {
    match bytes.get(1) {
        Some(b'\\') => true,
        Some(_) => {
            let rest = &bytes[1..];
            let width = std::str::from_utf8(rest)
                .ok()
                .and_then(|s| s.chars().next())
                .map_or(1, char::len_utf8);
            rest.get(width) == Some(&b'\'')
        }
        None => false,
    }
}

/// Length of a quoted literal starting at `bytes[0]`, or the rest of the line if unterminated
fn string_len(bytes: &[u8], quote: u8) -> usize {
    let mut i = 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
        tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn tokens_cover_the_line() {
        let lexer = CLike::rust();
        for line in ["fn main() { let x = 42; }", "  \"unterminated", "é = 'a' + b'\\n'", "/* a */ b"] {
            let (tokens, _) = lexer.tokenize(line, &lexer.initial_state());
            assert_eq!(tokens.iter().map(|t| t.len).sum::<usize>(), line.len(), "{line}");
        }
    }

    #[test]
    fn keywords_and_functions() {
        let lexer = CLike::rust();
        let (tokens, _) = lexer.tokenize("fn main()", &lexer.initial_state());
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::Keyword,
                TokenKind::Whitespace,
                TokenKind::Function,
                TokenKind::Punctuation
            ]
        );
        assert_eq!(tokens[3].len, 2);
    }

    #[test]
    fn block_comment_spans_lines() {
        let lexer = CLike::rust();
        let lines = tokenize_all(&lexer, "a /* open\nstill\nclose */ b");
        assert_eq!(kinds(&lines[1]), vec![TokenKind::Comment]);
        assert_eq!(lines[2][0], Token::new(8, TokenKind::Comment));
        assert_eq!(lines[2].last().map(|t| t.kind), Some(TokenKind::Variable));
    }

    #[test]
    fn lifetimes_are_not_strings() {
        let lexer = CLike::rust();
        let (tokens, _) = lexer.tokenize("&'a str", &lexer.initial_state());
        assert!(!tokens.iter().any(|t| t.kind == TokenKind::String));
    }

    #[test]
    fn plain_text_is_one_run() {
        let lines = tokenize_all(&PlainText, "abc\n\nxy");
        assert_eq!(lines, vec![vec![Token::new(3, TokenKind::Text)], vec![], vec![Token::new(2, TokenKind::Text)]]);
    }
}
