//! Lossless tokenizer for the logic spans of gotpl templates.
//!
//! Logic spans hold JavaScript-flavoured code. Before the compiler can decide
//! which identifiers a span references, it must know which characters belong
//! to strings, comments and regular expressions, because all of those can
//! contain text that looks like an identifier or a template delimiter.
//!
//! The [`Tokenizer`] classifies its input into [`Token`]s without ever
//! failing: text it cannot match becomes a [`TokenKind::Invalid`] token, and
//! concatenating the text of every token always reproduces the input.
//!
//! # Example
//!
//! ```rust
//! use gotpl_lexer::{tokenize, TokenKind};
//!
//! let tokens = tokenize("user.name + 'x'");
//! let kinds: Vec<_> = tokens
//!     .iter()
//!     .filter(|t| !t.is_trivia())
//!     .map(|t| t.kind)
//!     .collect();
//!
//! assert_eq!(
//!     kinds,
//!     vec![
//!         TokenKind::Name,
//!         TokenKind::Punctuator,
//!         TokenKind::Name,
//!         TokenKind::Punctuator,
//!         TokenKind::String,
//!     ]
//! );
//! ```
//!
//! # Regex or division
//!
//! A `/` starts a regular expression literal only where an operand is
//! expected: at the start of input, after most punctuators, and after
//! keywords such as `return` or `typeof`. Everywhere else it is a division
//! punctuator. When a regex literal turns out to be unterminated the slash
//! falls back to a punctuator.

/// Classification of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// Quoted string (`'…'`, `"…"`) or template literal (`` `…` ``).
    String,
    /// Line (`// …`) or block (`/* … */`) comment.
    Comment,
    /// Regular expression literal including its flags.
    Regex,
    /// Numeric literal.
    Number,
    /// Identifier or keyword.
    Name,
    /// Operator or punctuation.
    Punctuator,
    /// Spaces, tabs and line breaks.
    Whitespace,
    /// Text that does not form a valid token (unterminated strings, stray `\`).
    Invalid,
}

/// A classified slice of the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    /// What the slice is.
    pub kind: TokenKind,
    /// The exact source text.
    pub text: &'a str,
    /// Byte offset of `text` in the tokenized input.
    pub offset: usize,
}

impl<'a> Token<'a> {
    /// Whitespace and comments carry no meaning for the parser.
    pub fn is_trivia(&self) -> bool {
        matches!(self.kind, TokenKind::Whitespace | TokenKind::Comment)
    }

    /// Returns `true` if the token text contains a line terminator.
    pub fn has_line_break(&self) -> bool {
        self.text
            .chars()
            .any(|c| matches!(c, '\n' | '\r' | '\u{2028}' | '\u{2029}'))
    }

    /// Returns `true` for a punctuator with exactly this text.
    pub fn is_punct(&self, punct: &str) -> bool {
        self.kind == TokenKind::Punctuator && self.text == punct
    }

    /// Returns `true` for a name token that is not a reserved keyword.
    pub fn is_identifier(&self) -> bool {
        self.kind == TokenKind::Name && !is_keyword(self.text)
    }
}

/// Reserved words of the logic language, sorted for binary search.
///
/// Includes the literal names `null`, `true` and `false` and the words
/// reserved in strict mode.
pub const KEYWORDS: &[&str] = &[
    "await",
    "break",
    "case",
    "catch",
    "class",
    "const",
    "continue",
    "debugger",
    "default",
    "delete",
    "do",
    "else",
    "enum",
    "export",
    "extends",
    "false",
    "finally",
    "for",
    "function",
    "if",
    "implements",
    "import",
    "in",
    "instanceof",
    "interface",
    "let",
    "new",
    "null",
    "package",
    "private",
    "protected",
    "public",
    "return",
    "static",
    "super",
    "switch",
    "this",
    "throw",
    "true",
    "try",
    "typeof",
    "var",
    "void",
    "while",
    "with",
    "yield",
];

/// Returns `true` if `name` is a reserved keyword.
pub fn is_keyword(name: &str) -> bool {
    KEYWORDS.binary_search(&name).is_ok()
}

/// Keywords after which a `/` begins a regular expression.
const REGEX_AFTER_KEYWORD: &[&str] = &[
    "case",
    "delete",
    "do",
    "else",
    "in",
    "instanceof",
    "new",
    "of",
    "return",
    "throw",
    "typeof",
    "void",
    "yield",
];

/// Punctuators, longest first so the first prefix match wins.
const PUNCTUATORS: &[&str] = &[
    ">>>=", "===", "!==", "**=", "<<=", ">>=", ">>>", "...", "&&=", "||=", "??=", "=>", "==",
    "!=", "<=", ">=", "&&", "||", "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=",
    "|=", "^=", "**", "<<", ">>", "{", "}", "(", ")", "[", "]", ";", ",", "<", ">", "+", "-",
    "*", "/", "%", "&", "|", "^", "!", "~", "?", ":", "=", ".", "@", "#",
];

/// Returns `true` if `c` can start an identifier.
pub fn is_identifier_start(c: char) -> bool {
    c == '$' || c == '_' || c.is_alphabetic()
}

/// Returns `true` if `c` can continue an identifier.
pub fn is_identifier_part(c: char) -> bool {
    is_identifier_start(c) || c.is_alphanumeric() || c == '\u{200c}' || c == '\u{200d}'
}

fn is_whitespace(c: char) -> bool {
    c.is_whitespace() || c == '\u{feff}'
}

fn is_line_terminator(c: char) -> bool {
    matches!(c, '\n' | '\r' | '\u{2028}' | '\u{2029}')
}

/// Tokenizes the whole input.
pub fn tokenize(input: &str) -> Vec<Token<'_>> {
    Tokenizer::new(input).collect()
}

/// The pieces of a template literal token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateParts<'a> {
    /// Raw text around the substitutions; always one more than `substitutions`.
    pub quasis: Vec<&'a str>,
    /// Source text inside each `${ … }`.
    pub substitutions: Vec<&'a str>,
}

/// Splits a template literal token into raw text and substitution sources.
///
/// Returns `None` unless `text` is exactly one complete template literal.
///
/// ```rust
/// use gotpl_lexer::split_template;
///
/// let parts = split_template("`a ${b} c`").unwrap();
/// assert_eq!(parts.quasis, vec!["a ", " c"]);
/// assert_eq!(parts.substitutions, vec!["b"]);
/// ```
pub fn split_template(text: &str) -> Option<TemplateParts<'_>> {
    if !text.starts_with('`') || template_len(text)? != text.len() {
        return None;
    }

    let bytes = text.as_bytes();
    let end = text.len() - 1;
    let mut quasis = Vec::new();
    let mut substitutions = Vec::new();
    let mut start = 1;
    let mut i = 1;
    while i < end {
        match bytes[i] {
            b'\\' => i += 2,
            b'$' if bytes.get(i + 1) == Some(&b'{') => {
                quasis.push(&text[start..i]);
                let inner = i + 2;
                let len = substitution_len(&text[inner..])?;
                substitutions.push(&text[inner..inner + len]);
                i = inner + len + 1;
                start = i;
            }
            _ => i += 1,
        }
    }
    quasis.push(&text[start..end]);

    Some(TemplateParts {
        quasis,
        substitutions,
    })
}

/// Streaming tokenizer over a logic span.
#[derive(Debug, Clone)]
pub struct Tokenizer<'a> {
    input: &'a str,
    pos: usize,
    regex_allowed: bool,
}

impl<'a> Tokenizer<'a> {
    /// Creates a tokenizer positioned at the start of `input`.
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            regex_allowed: true,
        }
    }

    /// Scans one token starting at `rest` and returns its kind and byte length.
    fn scan_token(&self, rest: &str) -> (TokenKind, usize) {
        let mut chars = rest.chars();
        let first = match chars.next() {
            Some(c) => c,
            None => return (TokenKind::Invalid, 0),
        };
        let second = chars.next();

        match first {
            c if is_whitespace(c) => (TokenKind::Whitespace, take_while(rest, is_whitespace)),
            '/' if second == Some('/') => {
                let len = rest.find(is_line_terminator).unwrap_or(rest.len());
                (TokenKind::Comment, len)
            }
            '/' if second == Some('*') => match rest[2..].find("*/") {
                Some(end) => (TokenKind::Comment, end + 4),
                None => (TokenKind::Invalid, rest.len()),
            },
            '/' if self.regex_allowed => match regex_len(rest) {
                Some(len) => (TokenKind::Regex, len),
                None => punctuator(rest),
            },
            '"' | '\'' => match string_len(rest, first) {
                Ok(len) => (TokenKind::String, len),
                Err(len) => (TokenKind::Invalid, len),
            },
            '`' => match template_len(rest) {
                Some(len) => (TokenKind::String, len),
                None => (TokenKind::Invalid, rest.len()),
            },
            '0'..='9' => (TokenKind::Number, number_len(rest)),
            '.' if second.is_some_and(|c| c.is_ascii_digit()) => {
                (TokenKind::Number, number_len(rest))
            }
            c if is_identifier_start(c) => (TokenKind::Name, take_while(rest, is_identifier_part)),
            _ => punctuator(rest),
        }
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.input.len() {
            return None;
        }

        let rest = &self.input[self.pos..];
        let (kind, len) = self.scan_token(rest);
        // Always make progress, even on a zero-length scan.
        let len = if len == 0 {
            rest.chars().next().map_or(rest.len(), char::len_utf8)
        } else {
            len
        };

        let token = Token {
            kind,
            text: &rest[..len],
            offset: self.pos,
        };
        self.pos += len;

        match kind {
            TokenKind::Whitespace | TokenKind::Comment => {}
            TokenKind::Name => {
                self.regex_allowed = REGEX_AFTER_KEYWORD.contains(&token.text);
            }
            TokenKind::Number | TokenKind::String | TokenKind::Regex => {
                self.regex_allowed = false;
            }
            TokenKind::Punctuator => {
                self.regex_allowed = !matches!(token.text, ")" | "]" | "}");
            }
            TokenKind::Invalid => self.regex_allowed = true,
        }

        Some(token)
    }
}

/// Length of the longest prefix whose chars satisfy `pred`.
fn take_while(s: &str, pred: impl Fn(char) -> bool) -> usize {
    s.char_indices()
        .find(|&(_, c)| !pred(c))
        .map_or(s.len(), |(i, _)| i)
}

fn punctuator(rest: &str) -> (TokenKind, usize) {
    for p in PUNCTUATORS {
        if rest.starts_with(p) {
            // `a?.5:b` is a conditional, not optional chaining.
            if *p == "?." && rest[2..].starts_with(|c: char| c.is_ascii_digit()) {
                continue;
            }
            return (TokenKind::Punctuator, p.len());
        }
    }
    let len = rest.chars().next().map_or(0, char::len_utf8);
    (TokenKind::Invalid, len)
}

/// Length of a quoted string including both quotes.
///
/// `Err` carries the length of an unterminated string, which stops before the
/// line break or at the end of input.
fn string_len(s: &str, quote: char) -> Result<usize, usize> {
    let mut iter = s.char_indices().skip(1);
    while let Some((i, c)) = iter.next() {
        match c {
            '\\' => {
                iter.next();
            }
            '\n' | '\r' => return Err(i),
            c if c == quote => return Ok(i + c.len_utf8()),
            _ => {}
        }
    }
    Err(s.len())
}

/// Length of a template literal including both backticks.
fn template_len(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'`' => return Some(i + 1),
            b'$' if bytes.get(i + 1) == Some(&b'{') => {
                i += 2;
                i += substitution_len(&s[i..])? + 1;
            }
            _ => i += 1,
        }
    }
    None
}

/// Byte offset of the `}` closing a `${` substitution.
fn substitution_len(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'{' => depth += 1,
            b'}' if depth == 0 => return Some(i),
            b'}' => depth -= 1,
            b'\'' | b'"' => {
                i += string_len(&s[i..], bytes[i] as char).ok()?;
                continue;
            }
            b'`' => {
                i += template_len(&s[i..])?;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Length of a regex literal including flags, or `None` if unterminated.
fn regex_len(s: &str) -> Option<usize> {
    let mut in_class = false;
    let mut iter = s.char_indices().skip(1);
    while let Some((i, c)) = iter.next() {
        match c {
            '\\' => {
                iter.next();
            }
            '[' => in_class = true,
            ']' => in_class = false,
            '/' if !in_class => {
                let end = i + 1;
                return Some(end + take_while(&s[end..], is_identifier_part));
            }
            c if is_line_terminator(c) => return None,
            _ => {}
        }
    }
    None
}

fn number_len(s: &str) -> usize {
    let bytes = s.as_bytes();
    if bytes.len() > 1 && bytes[0] == b'0' {
        let digits: Option<fn(char) -> bool> = match bytes[1] {
            b'x' | b'X' => Some(|c| c.is_ascii_hexdigit() || c == '_'),
            b'b' | b'B' => Some(|c| c == '0' || c == '1' || c == '_'),
            b'o' | b'O' => Some(|c| ('0'..='7').contains(&c) || c == '_'),
            _ => None,
        };
        if let Some(pred) = digits {
            return 2 + take_while(&s[2..], pred);
        }
    }

    let decimal = |c: char| c.is_ascii_digit() || c == '_';
    let mut len = take_while(s, decimal);
    if s[len..].starts_with('.') {
        len += 1;
        len += take_while(&s[len..], decimal);
    }
    let rest = &s[len..];
    if rest.starts_with(['e', 'E']) {
        let sign = usize::from(rest[1..].starts_with(['+', '-']));
        let digits = take_while(&rest[1 + sign..], |c| c.is_ascii_digit());
        if digits > 0 {
            len += 1 + sign + digits;
        }
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<(TokenKind, &str)> {
        tokenize(input)
            .into_iter()
            .filter(|t| !t.is_trivia())
            .map(|t| (t.kind, t.text))
            .collect()
    }

    mod names {
        use super::*;

        #[test]
        fn identifiers_and_keywords() {
            assert_eq!(
                kinds("var $x = _y"),
                vec![
                    (TokenKind::Name, "var"),
                    (TokenKind::Name, "$x"),
                    (TokenKind::Punctuator, "="),
                    (TokenKind::Name, "_y"),
                ]
            );
        }

        #[test]
        fn unicode_identifier() {
            assert_eq!(kinds("héllo"), vec![(TokenKind::Name, "héllo")]);
        }

        #[test]
        fn keyword_lookup() {
            assert!(is_keyword("typeof"));
            assert!(is_keyword("null"));
            assert!(!is_keyword("name"));
            assert!(!is_keyword("undefined"));
        }

        #[test]
        fn keyword_table_is_sorted() {
            let mut sorted = KEYWORDS.to_vec();
            sorted.sort_unstable();
            assert_eq!(sorted, KEYWORDS);
        }
    }

    mod strings {
        use super::*;

        #[test]
        fn quoted_strings_hide_identifiers() {
            assert_eq!(
                kinds(r#"'a b' + "c\"d""#),
                vec![
                    (TokenKind::String, "'a b'"),
                    (TokenKind::Punctuator, "+"),
                    (TokenKind::String, r#""c\"d""#),
                ]
            );
        }

        #[test]
        fn unterminated_string_is_invalid() {
            let tokens = kinds("'abc");
            assert_eq!(tokens, vec![(TokenKind::Invalid, "'abc")]);
        }

        #[test]
        fn string_stops_at_line_break() {
            let tokens = tokenize("'ab\ncd'");
            assert_eq!(tokens[0].kind, TokenKind::Invalid);
            assert_eq!(tokens[0].text, "'ab");
        }

        #[test]
        fn template_literal_with_substitution() {
            assert_eq!(
                kinds("`a ${ {b: '}'}.b } c` + 1"),
                vec![
                    (TokenKind::String, "`a ${ {b: '}'}.b } c`"),
                    (TokenKind::Punctuator, "+"),
                    (TokenKind::Number, "1"),
                ]
            );
        }

        #[test]
        fn split_template_parts() {
            let parts = split_template("`${a}-${ {b: 1}.b }`").unwrap();
            assert_eq!(parts.quasis, vec!["", "-", ""]);
            assert_eq!(parts.substitutions, vec!["a", " {b: 1}.b "]);
        }

        #[test]
        fn split_template_without_substitutions() {
            let parts = split_template(r"`plain \${x}`").unwrap();
            assert_eq!(parts.quasis, vec![r"plain \${x}"]);
            assert!(parts.substitutions.is_empty());
        }

        #[test]
        fn split_template_rejects_other_tokens() {
            assert!(split_template("'x'").is_none());
            assert!(split_template("`open").is_none());
            assert!(split_template("`a` + `b`").is_none());
        }
    }

    mod comments {
        use super::*;

        #[test]
        fn line_and_block_comments() {
            let tokens = tokenize("a // b\n/* c */ d");
            let comments: Vec<_> = tokens
                .iter()
                .filter(|t| t.kind == TokenKind::Comment)
                .map(|t| t.text)
                .collect();
            assert_eq!(comments, vec!["// b", "/* c */"]);
        }

        #[test]
        fn unterminated_block_comment_is_invalid() {
            assert_eq!(kinds("/* x"), vec![(TokenKind::Invalid, "/* x")]);
        }
    }

    mod regex {
        use super::*;

        #[test]
        fn regex_at_operand_position() {
            assert_eq!(
                kinds("s.replace(/a[/]b/gi, '')"),
                vec![
                    (TokenKind::Name, "s"),
                    (TokenKind::Punctuator, "."),
                    (TokenKind::Name, "replace"),
                    (TokenKind::Punctuator, "("),
                    (TokenKind::Regex, "/a[/]b/gi"),
                    (TokenKind::Punctuator, ","),
                    (TokenKind::String, "''"),
                    (TokenKind::Punctuator, ")"),
                ]
            );
        }

        #[test]
        fn division_after_operand() {
            assert_eq!(
                kinds("a / b / c"),
                vec![
                    (TokenKind::Name, "a"),
                    (TokenKind::Punctuator, "/"),
                    (TokenKind::Name, "b"),
                    (TokenKind::Punctuator, "/"),
                    (TokenKind::Name, "c"),
                ]
            );
        }

        #[test]
        fn regex_after_return() {
            assert_eq!(kinds("return /x/")[1], (TokenKind::Regex, "/x/"));
        }

        #[test]
        fn unterminated_regex_falls_back_to_punctuator() {
            assert_eq!(kinds("/ 2")[0], (TokenKind::Punctuator, "/"));
        }
    }

    mod numbers {
        use super::*;

        #[test]
        fn numeric_forms() {
            let numbers: Vec<_> = kinds("1 2.5 .5 1e3 1.5E-2 0xff 0b101 0o17")
                .into_iter()
                .map(|(_, text)| text)
                .collect();
            assert_eq!(
                numbers,
                vec!["1", "2.5", ".5", "1e3", "1.5E-2", "0xff", "0b101", "0o17"]
            );
        }

        #[test]
        fn member_access_on_number() {
            assert_eq!(
                kinds("1.5.toFixed"),
                vec![
                    (TokenKind::Number, "1.5"),
                    (TokenKind::Punctuator, "."),
                    (TokenKind::Name, "toFixed"),
                ]
            );
        }
    }

    mod punctuators {
        use super::*;

        #[test]
        fn longest_match_wins() {
            let puncts: Vec<_> = kinds("a === b >>>= c ?. d => e")
                .into_iter()
                .filter(|(k, _)| *k == TokenKind::Punctuator)
                .map(|(_, t)| t)
                .collect();
            assert_eq!(puncts, vec!["===", ">>>=", "?.", "=>"]);
        }

        #[test]
        fn optional_chain_before_digit_is_conditional() {
            assert_eq!(
                kinds("a?.5:1"),
                vec![
                    (TokenKind::Name, "a"),
                    (TokenKind::Punctuator, "?"),
                    (TokenKind::Number, ".5"),
                    (TokenKind::Punctuator, ":"),
                    (TokenKind::Number, "1"),
                ]
            );
        }

        #[test]
        fn stray_backslash_is_invalid() {
            assert_eq!(kinds("\\"), vec![(TokenKind::Invalid, "\\")]);
        }
    }

    mod trivia {
        use super::*;

        #[test]
        fn line_breaks_are_detected() {
            let tokens = tokenize("a \n b");
            assert!(tokens[1].has_line_break());
            assert!(!tokens[0].has_line_break());
        }

        #[test]
        fn offsets_track_bytes() {
            let tokens = tokenize("é + b");
            let b = tokens.last().unwrap();
            assert_eq!(b.offset, "é + ".len());
        }
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(500))]

            #[test]
            fn tokenizing_is_lossless(input in "\\PC{0,80}") {
                let joined: String = tokenize(&input).iter().map(|t| t.text).collect();
                prop_assert_eq!(joined, input);
            }

            #[test]
            fn tokens_are_never_empty(input in "[ -~\\n]{0,80}") {
                for token in tokenize(&input) {
                    prop_assert!(!token.text.is_empty());
                }
            }

            #[test]
            fn identifiers_are_single_tokens(name in "[a-zA-Z_$][a-zA-Z0-9_$]{0,12}") {
                let tokens = tokenize(&name);
                prop_assert_eq!(tokens.len(), 1);
                prop_assert_eq!(tokens[0].kind, TokenKind::Name);
            }
        }
    }
}
