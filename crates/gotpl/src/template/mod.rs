//! Compiling, caching and rendering templates.
//!
//! | Type | Role |
//! |------|------|
//! | [`Engine`] | defaults, cache and loader; entry point for rendering |
//! | [`Template`] | a compiled template bound to its options |
//! | [`CompiledTemplate`] | the parsed, reusable form of a template |
//! | [`TemplateCache`] | per-key locked store of compiled templates |
//! | [`TemplateLoader`] | reads template files ([`FsLoader`], [`MemoryLoader`]) |
//!
//! ## Rendering files
//!
//! ```rust,ignore
//! let engine = Engine::new();
//! engine.configure(&OptionsPatch::new().root("views"))?;
//!
//! // views/index.tpl may call include('header', {title: 'Home'})
//! let html = engine.render_file_sync("index", &data, &OptionsPatch::new())?;
//! ```
//!
//! Inside a template, `include(path, data?, options?)` renders another file
//! relative to the current one and returns its output, to be written with
//! `<%- %>`. The included template sees the include data first, then the
//! including template's data, then the scope.

mod cache;
mod compiled;
mod engine;
mod loader;

pub use cache::{CacheKey, TemplateCache, TemplateIdentity};
pub use compiled::CompiledTemplate;
pub use engine::{Engine, Template, MAX_INCLUDE_DEPTH};
pub use loader::{resolve_path, FsLoader, MemoryLoader, TemplateLoader, DEFAULT_EXTENSION};
