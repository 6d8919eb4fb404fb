//! # gotpl - Micro-Templating Compiler
//!
//! `gotpl` compiles text templates with embedded logic into reusable
//! artifacts and renders them against serializable data.
//!
//! ## Core Concepts
//!
//! - [`Engine`]: holds default [`Options`], a template cache and a loader
//! - [`Template`]: a compiled template, rendered any number of times
//! - [`OptionsPatch`]: per-call overrides, loadable from YAML or JSON
//! - [`Scope`]: fallback globals for names the data does not provide
//! - [`Error`]: syntax, render, resolution and option failures
//!
//! ## Quick Start
//!
//! ```rust
//! use serde::Serialize;
//!
//! #[derive(Serialize)]
//! struct Page {
//!     name: String,
//! }
//!
//! let html = gotpl::render("<p><%= name %></p>", &Page { name: "gotpl".into() }).unwrap();
//! assert_eq!(html, "<p>gotpl</p>");
//! ```
//!
//! ## Tags
//!
//! | Tag | Meaning |
//! |-----|---------|
//! | `<%= expr %>` | write `expr`, HTML-escaped |
//! | `<%- expr %>` | write `expr` as is |
//! | `<% code %>` | run statements; blocks may span several tags |
//!
//! The logic inside tags is a JavaScript-like language: variables, loops,
//! functions and closures, objects and arrays, string and array methods,
//! and the usual globals such as `Math` and `JSON`.
//!
//! ```rust
//! use serde_json::json;
//!
//! let template = "<ul>\
//!     <% users.filter(u => u.active).forEach(function (user) { %>\
//!     <li><%= user.name %></li>\
//!     <% }) %>\
//!     </ul>";
//!
//! let data = json!({"users": [
//!     {"name": "Ann", "active": true},
//!     {"name": "Bob", "active": false},
//! ]});
//!
//! let html = gotpl::render(template, &data).unwrap();
//! assert_eq!(html, "<ul><li>Ann</li></ul>");
//! ```
//!
//! ## Options
//!
//! | Option | Default | Effect |
//! |--------|---------|--------|
//! | `root` | `""` | base directory for template files |
//! | `debug` | `false` | report the failing line with a source excerpt; disables caching |
//! | `cache` | `true` | reuse compiled templates |
//! | `minify` | `true` | collapse line breaks and the indentation after them |
//! | `openTag` / `closeTag` | `<%` / `%>` | delimiters |
//!
//! ```rust
//! use gotpl::{Engine, OptionsPatch};
//! use serde_json::json;
//!
//! let engine = Engine::new();
//! engine.configure(&OptionsPatch::new().tags("{{", "}}")).unwrap();
//! assert_eq!(engine.render("{{= 1 + 2 }}", &json!({})).unwrap(), "3");
//! ```
//!
//! ## Errors
//!
//! With `debug`, render errors point at the template line that failed:
//!
//! ```rust
//! use gotpl::{Engine, OptionsPatch};
//! use serde_json::json;
//!
//! let err = Engine::new()
//!     .render_with("<p>\n<%= user.name %>\n</p>", &json!({}), &OptionsPatch::new().debug(true))
//!     .unwrap_err();
//! assert_eq!(err.line(), Some(2));
//! ```

pub mod compiler;
mod error;
mod escape;
mod options;
pub mod prelude;
mod runtime;
mod stack;
pub mod template;
pub mod value;

pub use error::{Error, ErrorKind, Result};
pub use escape::escape_html;
pub use options::{Options, OptionsPatch};
pub use template::{
    resolve_path, CompiledTemplate, Engine, FsLoader, MemoryLoader, Template, TemplateCache,
    TemplateLoader,
};
pub use value::{Global, NativeFunction, Scope, Value};

/// The crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Renders `text` with `data` on a fresh engine with default options.
///
/// Nothing is cached between calls; keep an [`Engine`] around to reuse
/// compiled templates.
pub fn render<T: serde::Serialize + ?Sized>(text: &str, data: &T) -> Result<String> {
    Engine::new().render(text, data)
}

/// Compiles `text` on a fresh engine.
pub fn compile(text: &str, options: &OptionsPatch) -> Result<Template> {
    Engine::new().compile(text, options)
}
