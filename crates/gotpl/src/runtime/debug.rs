//! Source excerpts for errors raised in debug mode.

use crate::error::Error;

/// Lines of context shown on each side of the failing line.
const CONTEXT: usize = 3;

/// Appends an excerpt of `source` around `line` to the error message.
///
/// ```text
///     1| <ul>
///  >> 2| <% items.forEach(function (item) { %>
///     3|   <li><%= item.name %></li>
/// ```
///
/// An error that already carries a line (from a nested include) keeps it.
pub(crate) fn annotate(err: Error, source: &str, line: usize) -> Error {
    let lines: Vec<&str> = source.split('\n').collect();
    let start = line.saturating_sub(CONTEXT).max(1);
    let end = (line + CONTEXT).min(lines.len());

    let excerpt: Vec<String> = (start..=end)
        .map(|number| {
            let marker = if number == line { " >> " } else { "    " };
            let code = lines[number - 1].trim_end_matches('\r');
            format!("{}{}| {}", marker, number, code)
        })
        .collect();

    err.with_context(&excerpt.join("\n"), line)
}
