//! Engine and per-call options.
//!
//! [`Options`] is the fully resolved configuration a template compiles and
//! renders with. [`OptionsPatch`] is a partial set of overrides: the engine
//! keeps defaults, and each call (or `include`) layers a patch on top.
//!
//! Patches deserialize from camelCase documents, so the same shape works in
//! YAML configuration files, JSON and as the third argument of `include`:
//!
//! ```rust
//! use gotpl::OptionsPatch;
//!
//! let patch = OptionsPatch::from_yaml("openTag: '{{'\ncloseTag: '}}'\nminify: false").unwrap();
//! assert_eq!(patch.open_tag.as_deref(), Some("{{"));
//! assert_eq!(patch.minify, Some(false));
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use crate::compiler::CompileSettings;
use crate::error::{Error, Result};
use crate::value::Scope;

/// Resolved template options.
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory that relative include paths resolve against when the
    /// current template has no file name.
    pub root: PathBuf,
    /// Track template lines and annotate render errors with source context.
    /// Debug templates are never cached.
    pub debug: bool,
    /// Reuse compiled templates.
    pub cache: bool,
    /// Collapse line breaks and the indentation after them in literal text.
    pub minify: bool,
    /// Delimiter opening a logic span.
    pub open_tag: String,
    /// Delimiter closing a logic span.
    pub close_tag: String,
    /// Fallback bindings for names the data does not provide.
    pub scope: Arc<Scope>,
    /// Path of the template being rendered, set for file templates.
    pub(crate) filename: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            debug: false,
            cache: true,
            minify: true,
            open_tag: "<%".to_string(),
            close_tag: "%>".to_string(),
            scope: Scope::standard(),
            filename: None,
        }
    }
}

impl Options {
    /// Returns a copy with `patch` applied.
    pub fn merged(&self, patch: &OptionsPatch) -> Self {
        let mut options = self.clone();
        options.apply(patch);
        options
    }

    /// Overwrites every field the patch sets.
    pub fn apply(&mut self, patch: &OptionsPatch) {
        if let Some(root) = &patch.root {
            self.root = root.clone();
        }
        if let Some(debug) = patch.debug {
            self.debug = debug;
        }
        if let Some(cache) = patch.cache {
            self.cache = cache;
        }
        if let Some(minify) = patch.minify {
            self.minify = minify;
        }
        if let Some(open_tag) = &patch.open_tag {
            self.open_tag = open_tag.clone();
        }
        if let Some(close_tag) = &patch.close_tag {
            self.close_tag = close_tag.clone();
        }
        if let Some(scope) = &patch.scope {
            self.scope = scope.clone();
        }
    }

    /// Rejects delimiters the segmenter cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.open_tag.is_empty() || self.close_tag.is_empty() {
            return Err(Error::Options("delimiters must not be empty".to_string()));
        }
        if self.open_tag == self.close_tag {
            return Err(Error::Options(format!(
                "open and close delimiters must differ, both are \"{}\"",
                self.open_tag
            )));
        }
        Ok(())
    }

    /// The subset of options that changes compiled output.
    pub fn compile_settings(&self) -> CompileSettings {
        CompileSettings {
            open_tag: self.open_tag.clone(),
            close_tag: self.close_tag.clone(),
            minify: self.minify,
            debug: self.debug,
        }
    }
}

/// Partial options, applied on top of an engine's defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OptionsPatch {
    pub root: Option<PathBuf>,
    pub debug: Option<bool>,
    pub cache: Option<bool>,
    pub minify: Option<bool>,
    pub open_tag: Option<String>,
    pub close_tag: Option<String>,
    /// Scopes hold native functions and cannot come from a document.
    #[serde(skip)]
    pub scope: Option<Arc<Scope>>,
}

impl OptionsPatch {
    /// Creates an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a patch from YAML.
    pub fn from_yaml(source: &str) -> Result<Self> {
        serde_yaml::from_str(source).map_err(|e| Error::Options(e.to_string()))
    }

    /// Parses a patch from JSON.
    pub fn from_json(source: &str) -> Result<Self> {
        serde_json::from_str(source).map_err(|e| Error::Options(e.to_string()))
    }

    /// Converts a template value passed to `include`.
    pub(crate) fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::Options(e.to_string()))
    }

    /// Returns `true` if the patch sets nothing.
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
            && self.debug.is_none()
            && self.cache.is_none()
            && self.minify.is_none()
            && self.open_tag.is_none()
            && self.close_tag.is_none()
            && self.scope.is_none()
    }

    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = Some(debug);
        self
    }

    pub fn cache(mut self, cache: bool) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn minify(mut self, minify: bool) -> Self {
        self.minify = Some(minify);
        self
    }

    /// Sets both delimiters.
    pub fn tags(mut self, open: impl Into<String>, close: impl Into<String>) -> Self {
        self.open_tag = Some(open.into());
        self.close_tag = Some(close.into());
        self
    }

    pub fn scope(mut self, scope: Arc<Scope>) -> Self {
        self.scope = Some(scope);
        self
    }
}
