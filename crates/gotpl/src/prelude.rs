//! Convenient imports for rendering.
//!
//! ```rust
//! use gotpl::prelude::*;
//!
//! let engine = Engine::new();
//! let html = engine.render_with("<%= 'hi' %>", &(), &OptionsPatch::new()).unwrap();
//! assert_eq!(html, "hi");
//! ```

pub use crate::{
    escape_html, render, Engine, Error, ErrorKind, Options, OptionsPatch, Result, Scope, Template,
};
