//! HTML escaping for `<%= %>` output.

use std::borrow::Cow;

/// Escapes the characters `"`, `'`, `&`, `<` and `>` as numeric HTML entities.
///
/// The input is scanned once from left to right. When it contains none of the
/// escaped characters it is returned borrowed, without allocating.
///
/// # Example
///
/// ```rust
/// use gotpl::escape_html;
///
/// assert_eq!(escape_html("a < b"), "a &#60; b");
/// assert!(matches!(escape_html("plain"), std::borrow::Cow::Borrowed(_)));
/// ```
pub fn escape_html(text: &str) -> Cow<'_, str> {
    let bytes = text.as_bytes();
    let first = match bytes.iter().position(|b| entity(*b).is_some()) {
        Some(pos) => pos,
        None => return Cow::Borrowed(text),
    };

    let mut out = String::with_capacity(text.len() + 16);
    out.push_str(&text[..first]);
    let mut last = first;
    for (i, b) in bytes.iter().enumerate().skip(first) {
        if let Some(replacement) = entity(*b) {
            out.push_str(&text[last..i]);
            out.push_str(replacement);
            last = i + 1;
        }
    }
    out.push_str(&text[last..]);
    Cow::Owned(out)
}

fn entity(b: u8) -> Option<&'static str> {
    match b {
        b'"' => Some("&#34;"),
        b'&' => Some("&#38;"),
        b'\'' => Some("&#39;"),
        b'<' => Some("&#60;"),
        b'>' => Some("&#62;"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escapes_every_special_character() {
        assert_eq!(
            escape_html(r#"&nbsp;<img src="" alt=''>"#),
            "&#38;nbsp;&#60;img src=&#34;&#34; alt=&#39;&#39;&#62;"
        );
    }

    #[test]
    fn test_plain_text_is_borrowed() {
        let text = "nothing to see";
        assert!(matches!(escape_html(text), Cow::Borrowed(s) if s == text));
    }

    #[test]
    fn test_multibyte_text_survives() {
        assert_eq!(escape_html("é<ü>"), "é&#60;ü&#62;");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(escape_html(""), "");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn escaped_output_has_no_markup(input in "\\PC{0,60}") {
                let escaped = escape_html(&input);
                prop_assert!(!escaped.contains(['<', '>', '"', '\'']));
            }

            #[test]
            fn safe_text_is_unchanged(input in "[a-zA-Z0-9 .,;:!?-]{0,60}") {
                prop_assert_eq!(escape_html(&input), input.as_str());
            }
        }
    }
}
