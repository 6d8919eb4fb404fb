use gotpl_lexer::{tokenize, Token, TokenKind, Tokenizer};

fn significant(input: &str) -> Vec<Token<'_>> {
    tokenize(input).into_iter().filter(|t| !t.is_trivia()).collect()
}

#[test]
fn test_loop_header_from_template() {
    let tokens = significant("for (var i = 0; i < items.length; i++) {");
    let names: Vec<_> = tokens
        .iter()
        .filter(|t| t.is_identifier())
        .map(|t| t.text)
        .collect();
    assert_eq!(names, vec!["i", "i", "items", "length", "i"]);
    assert!(tokens.last().unwrap().is_punct("{"));
}

#[test]
fn test_delimiter_lookalikes_stay_inside_strings() {
    let tokens = significant(r#"'%>' + "<%" + /%>/.source"#);
    assert_eq!(tokens[0].kind, TokenKind::String);
    assert_eq!(tokens[2].kind, TokenKind::String);
    assert_eq!(tokens[4].kind, TokenKind::Regex);
}

#[test]
fn test_comment_hides_identifiers() {
    let tokens = significant("a /* b c */ // d\n e");
    let names: Vec<_> = tokens.iter().map(|t| t.text).collect();
    assert_eq!(names, vec!["a", "e"]);
}

#[test]
fn test_iterator_is_resumable() {
    let mut tokenizer = Tokenizer::new("x+y");
    assert_eq!(tokenizer.next().map(|t| t.text), Some("x"));
    let rest: Vec<_> = tokenizer.map(|t| t.text).collect();
    assert_eq!(rest, vec!["+", "y"]);
}

#[test]
fn test_invalid_tokens_are_reported_not_dropped() {
    let tokens = tokenize("a # \\ b");
    let invalid: Vec<_> = tokens
        .iter()
        .filter(|t| t.kind == TokenKind::Invalid)
        .map(|t| t.text)
        .collect();
    assert_eq!(invalid, vec!["\\"]);
    assert!(tokens.iter().any(|t| t.is_punct("#")));
}

#[test]
fn test_line_break_in_whitespace_token() {
    let tokens = tokenize("a\r\n  b");
    assert_eq!(tokens[1].kind, TokenKind::Whitespace);
    assert!(tokens[1].has_line_break());
}
