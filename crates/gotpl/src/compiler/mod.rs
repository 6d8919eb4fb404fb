//! Template compilation pipeline.
//!
//! Compiling a template turns its text into a parsed program that the runtime
//! can execute many times. The pipeline runs in four steps:
//!
//! | Step | Function | Output |
//! |------|----------|--------|
//! | Segmenting | [`segment`] | literal text paired with optional logic spans |
//! | Variable extraction | [`extract_variables`] | free names referenced by logic |
//! | Code generation | [`generate`] | an instruction [`Program`] |
//! | Parsing | internal | the executable syntax tree |
//!
//! ## Tags
//!
//! ```text
//! <%= expr %>    escaped output
//! <%- expr %>    raw output
//! <% code %>     statements, which may open blocks closed by a later tag
//! ```
//!
//! Blocks may span tags: `<% for (var i = 0; i < n; i++) { %>` opens a loop
//! whose body is the literal text and tags that follow, up to `<% } %>`. The
//! generator does not balance blocks; the parser sees the whole instruction
//! stream at once and reports unbalanced blocks as syntax errors.
//!
//! ## Inspecting generated code
//!
//! [`Program`] implements `Display` as a readable listing, which is also
//! what the compiler logs at `trace` level:
//!
//! ```rust
//! use gotpl::compiler::{generate, CompileSettings};
//!
//! let program = generate("<p><%= name %></p>", &CompileSettings::default()).unwrap();
//! let listing = program.to_string();
//! assert!(listing.contains("$$res += $$escape(name);"));
//! ```

pub(crate) mod ast;
mod codegen;
pub(crate) mod parser;
mod segment;
mod variables;

pub use codegen::{generate, Instruction, Program};
pub use segment::{segment, Logic, Segment};
pub use variables::{extract_variables, VariableSet};

/// The options that change what a template compiles to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompileSettings {
    /// Delimiter opening a logic span.
    pub open_tag: String,
    /// Delimiter closing a logic span.
    pub close_tag: String,
    /// Collapse line breaks and the indentation after them in literal text.
    pub minify: bool,
    /// Emit line markers so render errors can point at the template source.
    pub debug: bool,
}

impl Default for CompileSettings {
    fn default() -> Self {
        Self {
            open_tag: "<%".to_string(),
            close_tag: "%>".to_string(),
            minify: true,
            debug: false,
        }
    }
}
