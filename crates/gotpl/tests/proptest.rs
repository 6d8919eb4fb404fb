//! Property-based tests for rendering using proptest.

use gotpl::{escape_html, Engine, OptionsPatch};
use proptest::prelude::*;
use serde_json::json;

// ============================================================================
// Strategies
// ============================================================================

/// Text that cannot contain a delimiter.
fn literal_text() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 <>&\"'/=.,;:!?\\-]{0,60}"
        .prop_filter("no delimiters", |s| !s.contains("<%") && !s.contains("%>"))
}

fn unescape(text: &str) -> String {
    text.replace("&#34;", "\"")
        .replace("&#39;", "'")
        .replace("&#60;", "<")
        .replace("&#62;", ">")
        .replace("&#38;", "&")
}

// ============================================================================
// Property tests
// ============================================================================

proptest! {
    /// Templates without tags or line breaks render unchanged.
    #[test]
    fn literal_only_templates_are_identity(text in literal_text()) {
        let engine = Engine::new();
        prop_assert_eq!(engine.render(&text, &json!({})).unwrap(), text.clone());
        let raw = engine
            .render_with(&text, &json!({}), &OptionsPatch::new().minify(false))
            .unwrap();
        prop_assert_eq!(raw, text);
    }

    /// Without minify, literal text with line breaks is kept verbatim.
    #[test]
    fn unminified_literals_keep_whitespace(lines in prop::collection::vec(literal_text(), 1..5)) {
        let text = lines.join("\n\t  ");
        let out = Engine::new()
            .render_with(&text, &json!({}), &OptionsPatch::new().minify(false))
            .unwrap();
        prop_assert_eq!(out, text);
    }

    /// Escaped output never contains markup characters and decodes back.
    #[test]
    fn escaped_output_is_safe(value in ".{0,40}") {
        let out = Engine::new().render("<%= v %>", &json!({"v": value})).unwrap();
        prop_assert!(!out.contains('<') && !out.contains('>'));
        prop_assert!(!out.contains('"') && !out.contains('\''));
        prop_assert_eq!(unescape(&out), value);
    }

    /// Raw output is the value itself.
    #[test]
    fn raw_output_is_verbatim(value in ".{0,40}") {
        let out = Engine::new().render("<%- v %>", &json!({"v": value})).unwrap();
        prop_assert_eq!(out, value);
    }

    /// Escaping borrows exactly when nothing needs replacing.
    #[test]
    fn escape_borrows_clean_input(text in ".{0,40}") {
        let escaped = escape_html(&text);
        let dirty = text.chars().any(|c| matches!(c, '"' | '\'' | '&' | '<' | '>'));
        prop_assert_eq!(matches!(escaped, std::borrow::Cow::Owned(_)), dirty);
    }

    /// Numbers print the way the template language formats them.
    #[test]
    fn integers_render_in_decimal(n in -1_000_000i64..1_000_000) {
        let out = Engine::new().render("<%= n + 0 %>", &json!({"n": n})).unwrap();
        prop_assert_eq!(out, n.to_string());
    }

    /// Compiling the same text twice renders the same output.
    #[test]
    fn compilation_is_deterministic(items in prop::collection::vec("[a-z]{0,8}", 0..6)) {
        let text = "<% items.forEach(function (item, i) { %><%= i %>=<%= item %>;<% }) %>";
        let data = json!({"items": items});
        let first = Engine::new().render(text, &data).unwrap();
        let second = Engine::new().render(text, &data).unwrap();
        prop_assert_eq!(first, second);
    }
}
