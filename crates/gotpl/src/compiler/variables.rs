//! Free variable extraction from logic spans.

use std::collections::HashSet;

use gotpl_lexer::{split_template, TokenKind, Tokenizer};

/// Prefix reserved for names used by generated code.
pub(crate) const INTERNAL_PREFIX: &str = "$$";

/// Ordered, de-duplicated names referenced by a template's logic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableSet {
    names: Vec<String>,
    seen: HashSet<String>,
}

impl VariableSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds every free name referenced by `code`.
    ///
    /// A name counts when it is an identifier token that is not a reserved
    /// keyword, does not follow a `.` or `?.` (ignoring whitespace and
    /// comments), and does not start with `$$`. Identifiers inside
    /// `${ … }` substitutions of template literals are included; text in
    /// strings, comments and regexes is not.
    pub fn extend_from_code(&mut self, code: &str) {
        let mut after_dot = false;
        for token in Tokenizer::new(code) {
            match token.kind {
                TokenKind::Whitespace | TokenKind::Comment => continue,
                TokenKind::Name => {
                    if !after_dot
                        && token.is_identifier()
                        && !token.text.starts_with(INTERNAL_PREFIX)
                    {
                        self.insert(token.text);
                    }
                }
                TokenKind::String if token.text.starts_with('`') => {
                    if let Some(parts) = split_template(token.text) {
                        for source in parts.substitutions {
                            self.extend_from_code(source);
                        }
                    }
                }
                _ => {}
            }
            after_dot = token.is_punct(".") || token.is_punct("?.");
        }
    }

    fn insert(&mut self, name: &str) {
        if !self.seen.contains(name) {
            self.seen.insert(name.to_string());
            self.names.push(name.to_string());
        }
    }

    /// Iterates names in order of first appearance.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Returns `true` if `name` was collected.
    pub fn contains(&self, name: &str) -> bool {
        self.seen.contains(name)
    }

    /// Number of names.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns `true` if no names were collected.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Collects the free names of a single logic span.
///
/// ```rust
/// use gotpl::compiler::extract_variables;
///
/// let vars = extract_variables("for (var i = 0; i < user.items.length; i++) {");
/// assert_eq!(vars.iter().collect::<Vec<_>>(), vec!["i", "user"]);
/// ```
pub fn extract_variables(code: &str) -> VariableSet {
    let mut set = VariableSet::new();
    set.extend_from_code(code);
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(code: &str) -> Vec<String> {
        extract_variables(code).iter().map(String::from).collect()
    }

    #[test]
    fn test_skips_keywords_and_properties() {
        assert_eq!(names("if (user.name === null) { return typeof x }"), vec!["user", "x"]);
    }

    #[test]
    fn test_optional_chain_and_spacing() {
        assert_eq!(names("a?.b + c . /* x */ d"), vec!["a", "c"]);
    }

    #[test]
    fn test_strings_comments_and_regexes_are_ignored() {
        assert_eq!(names("'name' + \"other\" // more\n + /word/.test(s)"), vec!["s"]);
    }

    #[test]
    fn test_internal_names_are_skipped() {
        assert_eq!(names("$$res + $value"), vec!["$value"]);
    }

    #[test]
    fn test_template_substitutions_are_scanned() {
        assert_eq!(names("`${first} and ${obj.second}`"), vec!["first", "obj"]);
    }

    #[test]
    fn test_order_and_dedup_across_spans() {
        let mut set = VariableSet::new();
        set.extend_from_code("b + a");
        set.extend_from_code("a + c + b");
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["b", "a", "c"]);
        assert!(set.contains("c"));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_invalid_input_does_not_panic() {
        assert_eq!(names("a # 'unterminated"), vec!["a"]);
    }
}
