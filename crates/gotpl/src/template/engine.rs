//! The template engine.
//!
//! [`Engine`] ties the pipeline together: it resolves options, compiles
//! templates through its cache, reads template files through its loader and
//! services `include` calls made by running templates.
//!
//! ```rust
//! use gotpl::{Engine, OptionsPatch};
//! use serde_json::json;
//!
//! let engine = Engine::new();
//! let template = engine
//!     .compile(
//!         "<% for (const item of items) { %><li><%= item %></li><% } %>",
//!         &OptionsPatch::new(),
//!     )
//!     .unwrap();
//!
//! assert_eq!(
//!     template.render(&json!({"items": ["a", "<b>"]})).unwrap(),
//!     "<li>a</li><li>&#60;b&#62;</li>"
//! );
//! ```
//!
//! Engines are cheap to clone; clones share defaults and cache. Separate
//! engines share nothing.

use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tracing::debug;

use super::cache::{CacheKey, TemplateCache, TemplateIdentity};
use super::compiled::CompiledTemplate;
use super::loader::{resolve_path, FsLoader, TemplateLoader};
use crate::error::{Error, ErrorKind, Result};
use crate::options::{Options, OptionsPatch};
use crate::runtime::Host;

/// How deeply templates may include one another.
pub const MAX_INCLUDE_DEPTH: usize = 32;

struct Inner {
    defaults: RwLock<Options>,
    cache: TemplateCache,
    loader: Box<dyn TemplateLoader>,
}

/// A template engine with its own defaults and cache.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("defaults", &self.options())
            .field("cached", &self.inner.cache.len())
            .finish()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Creates an engine with default options that reads templates from the
    /// filesystem.
    pub fn new() -> Self {
        Self::build(Options::default(), Box::new(FsLoader))
    }

    /// Creates an engine with the given defaults.
    pub fn with_options(options: Options) -> Result<Self> {
        options.validate()?;
        Ok(Self::build(options, Box::new(FsLoader)))
    }

    /// Creates an engine that reads template files through `loader`.
    pub fn with_loader(loader: impl TemplateLoader + 'static) -> Self {
        Self::build(Options::default(), Box::new(loader))
    }

    fn build(options: Options, loader: Box<dyn TemplateLoader>) -> Self {
        Self {
            inner: Arc::new(Inner {
                defaults: RwLock::new(options),
                cache: TemplateCache::new(),
                loader,
            }),
        }
    }

    /// Updates the defaults with `patch` and returns the new defaults.
    ///
    /// Invalid delimiters are rejected and leave the defaults unchanged.
    pub fn configure(&self, patch: &OptionsPatch) -> Result<Options> {
        let mut defaults = self
            .inner
            .defaults
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let updated = defaults.merged(patch);
        updated.validate()?;
        *defaults = updated.clone();
        debug!(?patch, "engine defaults updated");
        Ok(updated)
    }

    /// A snapshot of the current defaults.
    pub fn options(&self) -> Options {
        self.inner
            .defaults
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The engine's compiled template cache.
    pub fn cache(&self) -> &TemplateCache {
        &self.inner.cache
    }

    fn resolve_options(&self, patch: &OptionsPatch) -> Result<Options> {
        let options = self.options().merged(patch);
        options.validate()?;
        Ok(options)
    }

    /// Compiles `text` into a reusable [`Template`].
    pub fn compile(&self, text: &str, patch: &OptionsPatch) -> Result<Template> {
        let options = self.resolve_options(patch)?;
        let identity = TemplateIdentity::Source(text.to_string());
        let (compiled, key) = self.load(identity, &options, || Ok(Cow::Borrowed(text)))?;
        Ok(Template {
            compiled,
            key,
            options,
            engine: self.clone(),
        })
    }

    /// Renders `text` with `data` using the engine defaults.
    pub fn render<T: Serialize + ?Sized>(&self, text: &str, data: &T) -> Result<String> {
        self.render_with(text, data, &OptionsPatch::new())
    }

    /// Renders `text` with `data` and per-call options.
    pub fn render_with<T: Serialize + ?Sized>(
        &self,
        text: &str,
        data: &T,
        patch: &OptionsPatch,
    ) -> Result<String> {
        self.compile(text, patch)?.render(data)
    }

    /// Renders the template file at `path`.
    ///
    /// Relative paths resolve against the `root` option; names without an
    /// extension get `.tpl`.
    pub fn render_file_sync<T: Serialize + ?Sized>(
        &self,
        path: impl AsRef<Path>,
        data: &T,
        patch: &OptionsPatch,
    ) -> Result<String> {
        let data = serde_json::to_value(data)?;
        let (path, options) = self.file_options(path.as_ref(), patch)?;
        self.render_path(path, options, &data, 0)
    }

    /// Resolves `path` against the options and records it as the current file.
    fn file_options(&self, path: &Path, patch: &OptionsPatch) -> Result<(PathBuf, Options)> {
        let mut options = self.resolve_options(patch)?;
        let path = resolve_path(&path.to_string_lossy(), None, &options.root);
        options.filename = Some(path.clone());
        Ok((path, options))
    }

    fn render_path(
        &self,
        path: PathBuf,
        options: Options,
        data: &serde_json::Value,
        depth: usize,
    ) -> Result<String> {
        let (compiled, key) = self.load(TemplateIdentity::File(path.clone()), &options, || {
            self.read(&path).map(Cow::Owned)
        })?;
        self.invoke(&compiled, key.as_ref(), &options, data, depth)
    }

    fn read(&self, path: &Path) -> Result<String> {
        debug!(path = %path.display(), "reading template");
        self.inner.loader.load(path).map_err(|source| Error::Resolution {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Returns the compiled template for `identity`, going through the cache
    /// unless caching is off or `debug` is set. `source` runs only on a miss.
    ///
    /// The key comes back only when the template went through the cache.
    fn load<'s, F>(
        &self,
        identity: TemplateIdentity,
        options: &Options,
        source: F,
    ) -> Result<(Arc<CompiledTemplate>, Option<CacheKey>)>
    where
        F: FnOnce() -> Result<Cow<'s, str>>,
    {
        let settings = options.compile_settings();
        let key = CacheKey::new(identity, &settings);
        let compile = || CompiledTemplate::compile(&source()?, &settings);

        if options.cache && !options.debug {
            let compiled = self.inner.cache.get_or_compile(&key, compile)?;
            Ok((compiled, Some(key)))
        } else {
            Ok((Arc::new(compile()?), None))
        }
    }

    /// Runs a compiled template. A failure purges the cache entry the
    /// template was loaded from, if any.
    fn invoke(
        &self,
        compiled: &CompiledTemplate,
        key: Option<&CacheKey>,
        options: &Options,
        data: &serde_json::Value,
        depth: usize,
    ) -> Result<String> {
        let host = IncludeHost {
            engine: self,
            options,
            data,
            depth,
        };
        compiled.invoke(data, &options.scope, &host).map_err(|err| {
            if let Some(key) = key {
                self.inner.cache.remove(key);
            }
            err
        })
    }
}

#[cfg(feature = "async")]
impl Engine {
    /// Renders the template file at `path`, reading it without blocking.
    ///
    /// The file is read only when no compiled form is cached; compiling and
    /// rendering then run synchronously.
    pub async fn render_file<T: Serialize + ?Sized>(
        &self,
        path: impl AsRef<Path>,
        data: &T,
        patch: &OptionsPatch,
    ) -> Result<String> {
        let data = serde_json::to_value(data)?;
        let (path, options) = self.file_options(path.as_ref(), patch)?;

        let settings = options.compile_settings();
        let key = CacheKey::new(TemplateIdentity::File(path.clone()), &settings);
        if options.cache && !options.debug && self.inner.cache.contains(&key) {
            return self.render_path(path, options, &data, 0);
        }

        let text = if self.inner.loader.reads_filesystem() {
            debug!(path = %path.display(), "reading template");
            tokio::fs::read_to_string(&path)
                .await
                .map_err(|source| Error::Resolution {
                    path: path.clone(),
                    source,
                })?
        } else {
            self.read(&path)?
        };

        let (compiled, key) = self.load(TemplateIdentity::File(path), &options, || {
            Ok(Cow::Borrowed(text.as_str()))
        })?;
        self.invoke(&compiled, key.as_ref(), &options, &data, 0)
    }

    /// Renders the template file at `path` on the current tokio runtime and
    /// hands the result to `callback`.
    ///
    /// Outside a runtime the file is rendered synchronously before this
    /// returns.
    pub fn render_file_callback<T, F>(
        &self,
        path: impl AsRef<Path>,
        data: &T,
        patch: &OptionsPatch,
        callback: F,
    ) where
        T: Serialize + ?Sized,
        F: FnOnce(Result<String>) + Send + 'static,
    {
        let data = match serde_json::to_value(data) {
            Ok(data) => data,
            Err(err) => return callback(Err(err.into())),
        };
        let path = path.as_ref().to_path_buf();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let engine = self.clone();
                let patch = patch.clone();
                handle.spawn(async move {
                    callback(engine.render_file(&path, &data, &patch).await);
                });
            }
            Err(_) => callback(self.render_file_sync(&path, &data, patch)),
        }
    }
}

/// A compiled template bound to the options it was compiled with.
#[derive(Clone)]
pub struct Template {
    compiled: Arc<CompiledTemplate>,
    key: Option<CacheKey>,
    options: Options,
    engine: Engine,
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("variables", self.compiled.variables())
            .field("debug", &self.options.debug)
            .finish()
    }
}

impl Template {
    /// Renders the template with `data`.
    pub fn render<T: Serialize + ?Sized>(&self, data: &T) -> Result<String> {
        let data = serde_json::to_value(data)?;
        self.engine
            .invoke(&self.compiled, self.key.as_ref(), &self.options, &data, 0)
    }

    /// The compiled form.
    pub fn compiled(&self) -> &CompiledTemplate {
        &self.compiled
    }

    /// The options the template was compiled with.
    pub fn options(&self) -> &Options {
        &self.options
    }
}

/// Services `include` for one running template.
struct IncludeHost<'a> {
    engine: &'a Engine,
    options: &'a Options,
    data: &'a serde_json::Value,
    depth: usize,
}

impl Host for IncludeHost<'_> {
    fn include(
        &self,
        path: &str,
        data: Option<serde_json::Value>,
        options: Option<serde_json::Value>,
    ) -> Result<String> {
        if self.depth + 1 > MAX_INCLUDE_DEPTH {
            return Err(Error::render(
                ErrorKind::RangeError,
                format!("Maximum include depth of {} exceeded", MAX_INCLUDE_DEPTH),
            ));
        }

        let mut child = self.options.clone();
        if let Some(patch) = options {
            child.apply(&OptionsPatch::from_value(patch)?);
            child.validate()?;
        }
        let resolved = resolve_path(path, self.options.filename.as_deref(), &child.root);
        debug!(
            name = path,
            path = %resolved.display(),
            depth = self.depth + 1,
            "including template"
        );
        child.filename = Some(resolved.clone());

        let data = merge_data(self.data, data);
        self.engine.render_path(resolved, child, &data, self.depth + 1)
    }
}

/// Layers include data over the parent's; the scope is consulted later by
/// the binder for names neither provides.
fn merge_data(
    parent: &serde_json::Value,
    overrides: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut merged = parent.as_object().cloned().unwrap_or_default();
    if let Some(serde_json::Value::Object(fields)) = overrides {
        merged.extend(fields);
    }
    serde_json::Value::Object(merged)
}
