//! Instruction generation from template segments.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use super::segment::{segment, Logic};
use super::variables::VariableSet;
use super::CompileSettings;
use crate::error::Result;

/// A line break run and the indentation after it.
static INDENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\r\n]+[ \t\x0B\x0C]*").expect("indent pattern is valid"));

/// One step of a generated program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Append literal text.
    Text(String),
    /// Append the value of an expression, escaped or raw.
    Output {
        /// Expression source.
        expr: String,
        /// Whether the value is HTML-escaped.
        escape: bool,
        /// Template line where the expression starts.
        line: usize,
    },
    /// Run statements.
    Code {
        /// Statement source.
        src: String,
        /// Template line where the statements start.
        line: usize,
    },
    /// Record the current template line (debug builds only).
    Line(usize),
}

/// The generated form of one template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    instructions: Vec<Instruction>,
    variables: VariableSet,
}

impl Program {
    /// The instructions in source order.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Free names referenced anywhere in the template's logic.
    pub fn variables(&self) -> &VariableSet {
        &self.variables
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "var $$res = \"\";")?;
        for instruction in &self.instructions {
            match instruction {
                Instruction::Text(text) => {
                    let literal = serde_json::to_string(text).map_err(|_| fmt::Error)?;
                    writeln!(f, "$$res += {};", literal)?;
                }
                Instruction::Output {
                    expr, escape: true, ..
                } => writeln!(f, "$$res += $$escape({});", expr)?,
                Instruction::Output { expr, .. } => writeln!(f, "$$res += ({});", expr)?,
                Instruction::Code { src, .. } => writeln!(f, "{}", src)?,
                Instruction::Line(line) => writeln!(f, "$$line = {};", line)?,
            }
        }
        write!(f, "return $$res;")
    }
}

/// Generates the instruction program for `template`.
///
/// Literal text becomes [`Instruction::Text`]; with `minify` each run of line
/// breaks plus the indentation after it collapses to a single `\n`. Output
/// tags become [`Instruction::Output`] with their trimmed expression, and
/// statement tags become [`Instruction::Code`]. With `debug`, a
/// [`Instruction::Line`] marker opens the program and follows every
/// non-empty literal and logic span, holding the line reached so far.
///
/// # Errors
///
/// Returns [`Error::Options`](crate::Error::Options) for invalid delimiters.
pub fn generate(template: &str, settings: &CompileSettings) -> Result<Program> {
    let mut program = Program::default();
    let mut line = 1;
    if settings.debug {
        program.instructions.push(Instruction::Line(line));
    }

    for segment in segment(template, &settings.open_tag, &settings.close_tag)? {
        if !segment.literal.is_empty() {
            let text = if settings.minify {
                INDENT.replace_all(segment.literal, "\n").into_owned()
            } else {
                segment.literal.to_string()
            };
            program.instructions.push(Instruction::Text(text));
            line += newlines(segment.literal);
            if settings.debug {
                program.instructions.push(Instruction::Line(line));
            }
        }

        let logic = match segment.logic {
            Some(Logic::Statement("")) | None => continue,
            Some(logic) => logic,
        };

        let code = logic.code();
        let trimmed = code.trim();
        let start = line + newlines(&code[..code.len() - code.trim_start().len()]);
        match logic {
            Logic::Escaped(_) | Logic::Raw(_) => {
                program.instructions.push(Instruction::Output {
                    expr: trimmed.to_string(),
                    escape: matches!(logic, Logic::Escaped(_)),
                    line: start,
                });
                program.variables.extend_from_code(trimmed);
            }
            Logic::Statement(_) if trimmed.is_empty() => {}
            Logic::Statement(_) => {
                program.instructions.push(Instruction::Code {
                    src: trimmed.to_string(),
                    line: start,
                });
                program.variables.extend_from_code(trimmed);
            }
        }

        line += newlines(code);
        if settings.debug {
            program.instructions.push(Instruction::Line(line));
        }
    }

    Ok(program)
}

fn newlines(text: &str) -> usize {
    text.bytes().filter(|b| *b == b'\n').count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> CompileSettings {
        CompileSettings::default()
    }

    #[test]
    fn test_minify_collapses_indentation() {
        let program = generate("<p>\n\t<b>x</b>\r\n\n    </p>", &settings()).unwrap();
        assert_eq!(
            program.instructions(),
            &[Instruction::Text("<p>\n<b>x</b>\n</p>".to_string())]
        );
    }

    #[test]
    fn test_without_minify_literal_is_verbatim() {
        let settings = CompileSettings {
            minify: false,
            ..settings()
        };
        let program = generate("<p>\n\t<b>x</b></p>", &settings).unwrap();
        assert_eq!(
            program.instructions(),
            &[Instruction::Text("<p>\n\t<b>x</b></p>".to_string())]
        );
    }

    #[test]
    fn test_instruction_lines() {
        let program = generate("a\n<%= x %>\n<%\n  y()\n%>", &settings()).unwrap();
        assert_eq!(
            program.instructions(),
            &[
                Instruction::Text("a\n".to_string()),
                Instruction::Output {
                    expr: "x".to_string(),
                    escape: true,
                    line: 2
                },
                Instruction::Text("\n".to_string()),
                Instruction::Code {
                    src: "y()".to_string(),
                    line: 4
                },
            ]
        );
    }

    #[test]
    fn test_debug_markers() {
        let settings = CompileSettings {
            debug: true,
            ..settings()
        };
        let program = generate("a\nb<% x %>\n<%- y %>", &settings).unwrap();
        let markers: Vec<usize> = program
            .instructions()
            .iter()
            .filter_map(|i| match i {
                Instruction::Line(n) => Some(*n),
                _ => None,
            })
            .collect();
        assert_eq!(markers, vec![1, 2, 2, 3, 3]);
    }

    #[test]
    fn test_empty_tags() {
        let program = generate("<%%>x<%   %>", &settings()).unwrap();
        assert_eq!(program.instructions(), &[Instruction::Text("x".to_string())]);
    }

    #[test]
    fn test_variables_are_collected() {
        let program = generate(
            "<% for (var i = 0; i < list.length; i++) { %><%= list[i] %><% } %>",
            &settings(),
        )
        .unwrap();
        assert_eq!(program.variables().iter().collect::<Vec<_>>(), vec!["i", "list"]);
    }

    #[test]
    fn test_listing_escapes_literals() {
        let program = generate("say \"hi\"\n<%- raw %>", &settings()).unwrap();
        assert_eq!(
            program.to_string(),
            "var $$res = \"\";\n$$res += \"say \\\"hi\\\"\\n\";\n$$res += (raw);\nreturn $$res;"
        );
    }
}
