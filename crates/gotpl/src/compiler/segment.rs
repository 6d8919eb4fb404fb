//! Splitting template text into literal and logic spans.

use crate::error::{Error, Result};

/// The logic part of a segment, without its discriminator character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Logic<'a> {
    /// `<%= expr %>`: output the escaped value.
    Escaped(&'a str),
    /// `<%- expr %>`: output the raw value.
    Raw(&'a str),
    /// `<% code %>`: run statements.
    Statement(&'a str),
}

impl<'a> Logic<'a> {
    /// The source text of the span.
    pub fn code(&self) -> &'a str {
        match self {
            Logic::Escaped(code) | Logic::Raw(code) | Logic::Statement(code) => code,
        }
    }
}

/// Literal text followed by an optional logic span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    /// Text copied to the output.
    pub literal: &'a str,
    /// Logic that follows the literal, if a tag opened after it.
    pub logic: Option<Logic<'a>>,
}

/// Splits `template` into segments.
///
/// The text is split on every `close_tag`; each piece is then split once on
/// `open_tag` into the literal before it and the logic after it. A piece
/// without an open tag is all literal. Delimiters are plain strings, so a tag
/// character sequence inside a string in the logic still ends the span.
///
/// # Errors
///
/// Returns [`Error::Options`] if a delimiter is empty or both are equal.
///
/// # Example
///
/// ```rust
/// use gotpl::compiler::{segment, Logic};
///
/// let segments = segment("<p><%= name %></p>", "<%", "%>").unwrap();
/// assert_eq!(segments[0].literal, "<p>");
/// assert_eq!(segments[0].logic, Some(Logic::Escaped(" name ")));
/// assert_eq!(segments[1].literal, "</p>");
/// assert_eq!(segments[1].logic, None);
/// ```
pub fn segment<'a>(template: &'a str, open_tag: &str, close_tag: &str) -> Result<Vec<Segment<'a>>> {
    check_delimiters(open_tag, close_tag)?;

    let segments = template
        .split(close_tag)
        .map(|piece| match piece.split_once(open_tag) {
            Some((literal, logic)) => Segment {
                literal,
                logic: Some(classify(logic)),
            },
            None => Segment {
                literal: piece,
                logic: None,
            },
        })
        .collect();
    Ok(segments)
}

pub(crate) fn check_delimiters(open_tag: &str, close_tag: &str) -> Result<()> {
    if open_tag.is_empty() || close_tag.is_empty() {
        return Err(Error::Options("delimiters must not be empty".to_string()));
    }
    if open_tag == close_tag {
        return Err(Error::Options(format!(
            "open and close delimiters must differ, both are {:?}",
            open_tag
        )));
    }
    Ok(())
}

fn classify(logic: &str) -> Logic<'_> {
    if let Some(expr) = logic.strip_prefix('=') {
        Logic::Escaped(expr)
    } else if let Some(expr) = logic.strip_prefix('-') {
        Logic::Raw(expr)
    } else {
        Logic::Statement(logic)
    }
}
