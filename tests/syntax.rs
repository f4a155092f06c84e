use proptest::prelude::*;
use tiny_editor_core::syntax::*;

fn kinds_with_text<'a>(line: &'a str, tokens: &[Token]) -> Vec<(&'a str, TokenKind)> {
    let mut offset = 0;
    tokens
        .iter()
        .map(|t| {
            let piece = &line[offset..offset + t.len];
            offset += t.len;
            (piece, t.kind)
        })
        .collect()
}

#[test]
fn test_rust_highlighting() {
    let lexer = CLike::rust();
    assert_eq!(lexer.name(), "rust");

    let line = "let s = \"hi\"; // done";
    let (tokens, state) = lexer.tokenize(line, &lexer.initial_state());
    assert_eq!(state, lexer.initial_state());
    assert_eq!(
        kinds_with_text(line, &tokens),
        vec![
            ("let", TokenKind::Keyword),
            (" ", TokenKind::Whitespace),
            ("s", TokenKind::Variable),
            (" ", TokenKind::Whitespace),
            ("=", TokenKind::Operator),
            (" ", TokenKind::Whitespace),
            ("\"hi\"", TokenKind::String),
            (";", TokenKind::Punctuation),
            (" ", TokenKind::Whitespace),
            ("// done", TokenKind::Comment),
        ]
    );
}

#[test]
fn test_custom_keywords() {
    let lexer = CLike::new("tiny-c", ["int", "return"]);
    let (tokens, _) = lexer.tokenize("int let", &lexer.initial_state());
    assert_eq!(tokens[0].kind, TokenKind::Keyword);
    assert_eq!(tokens[2].kind, TokenKind::Variable);
}

#[test]
fn test_types_constants_and_numbers() {
    let lexer = CLike::rust();
    let line = "Vec::new(MAX_LEN, 0x1f)";
    let (tokens, _) = lexer.tokenize(line, &lexer.initial_state());
    let pieces = kinds_with_text(line, &tokens);
    assert!(pieces.contains(&("Vec", TokenKind::Type)));
    assert!(pieces.contains(&("new", TokenKind::Function)));
    assert!(pieces.contains(&("MAX_LEN", TokenKind::Constant)));
    assert!(pieces.contains(&("0x1f", TokenKind::Number)));
}

#[test]
fn test_comment_state_threads_through_lines() {
    let lexer = CLike::rust();
    let text = "/* start\nmiddle\nend */ let";
    let lines = tokenize_all(&lexer, text);
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[1], vec![Token::new(6, TokenKind::Comment)]);
    assert_eq!(lines[2].last(), Some(&Token::new(3, TokenKind::Keyword)));

    // Lexing a later line from the default state gives a different answer
    let (cold, _) = lexer.tokenize("middle", &lexer.initial_state());
    assert_ne!(cold, lines[1]);
}

#[test]
fn test_token_styles_use_class_names() {
    assert_eq!(TokenKind::Keyword.style().get("class"), Some("keyword"));
    assert_eq!(TokenKind::Unknown.class_name(), "unknown");
}

proptest! {
    #[test]
    fn tokens_always_cover_the_line(line in "\\PC{0,80}", open in any::<bool>()) {
        let lexer = CLike::rust();
        let state = if open {
            let (_, state) = lexer.tokenize("/*", &lexer.initial_state());
            state
        } else {
            lexer.initial_state()
        };
        let (tokens, _) = lexer.tokenize(&line, &state);
        prop_assert_eq!(tokens.iter().map(|t| t.len).sum::<usize>(), line.len());
        prop_assert!(tokens.iter().all(|t| t.len > 0));
        prop_assert!(tokens.windows(2).all(|w| w[0].kind != w[1].kind));
    }
}
