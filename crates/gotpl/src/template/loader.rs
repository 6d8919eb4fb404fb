//! Template file lookup.
//!
//! File templates are located with [`resolve_path`] and read through a
//! [`TemplateLoader`]. [`FsLoader`] reads the filesystem; [`MemoryLoader`]
//! serves templates registered in memory, which is handy in tests and for
//! templates embedded in a binary.
//!
//! # Resolution
//!
//! | Name | Resolves to |
//! |------|-------------|
//! | `/abs/page.tpl` | itself |
//! | `part` inside `/views/index.tpl` | `/views/part.tpl` |
//! | `part` with no current file | `<root>/part.tpl` |
//!
//! Names without an extension get [`DEFAULT_EXTENSION`].

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Extension added to template names that have none.
pub const DEFAULT_EXTENSION: &str = "tpl";

/// Resolves a template name against the including file or the root.
///
/// `base` is the path of the template doing the including, if it came from a
/// file. The result is made absolute against the working directory when that
/// is known.
pub fn resolve_path(filename: &str, base: Option<&Path>, root: &Path) -> PathBuf {
    let name = Path::new(filename);
    let mut path = if name.is_absolute() {
        name.to_path_buf()
    } else {
        match base.and_then(Path::parent) {
            Some(dir) => dir.join(name),
            None => root.join(name),
        }
    };

    if path.extension().is_none() {
        path.set_extension(DEFAULT_EXTENSION);
    }
    if path.is_relative() {
        if let Ok(cwd) = std::env::current_dir() {
            path = cwd.join(path);
        }
    }
    path
}

/// Reads template text by resolved path.
pub trait TemplateLoader: Send + Sync {
    /// Returns the text of the template at `path`.
    fn load(&self, path: &Path) -> io::Result<String>;

    /// Whether `load` reads the filesystem, letting async rendering read the
    /// file without blocking instead.
    fn reads_filesystem(&self) -> bool {
        false
    }
}

/// Reads templates from the filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsLoader;

impl TemplateLoader for FsLoader {
    fn load(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn reads_filesystem(&self) -> bool {
        true
    }
}

/// Serves templates registered in memory.
///
/// Paths are looked up exactly as [`resolve_path`] produces them, so
/// templates are best registered under absolute paths.
///
/// ```rust
/// use gotpl::{Engine, MemoryLoader, OptionsPatch};
/// use serde_json::json;
///
/// let loader = MemoryLoader::new();
/// loader.insert("/views/page.tpl", "<h1><%- include('title') %></h1>");
/// loader.insert("/views/title.tpl", "<%= title %>");
///
/// let engine = Engine::with_loader(loader);
/// let html = engine
///     .render_file_sync("/views/page", &json!({"title": "Home"}), &OptionsPatch::new())
///     .unwrap();
/// assert_eq!(html, "<h1>Home</h1>");
/// ```
#[derive(Debug, Default)]
pub struct MemoryLoader {
    templates: RwLock<HashMap<PathBuf, String>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `source` under `path`, replacing any previous template.
    pub fn insert(&self, path: impl Into<PathBuf>, source: impl Into<String>) {
        let mut templates = self
            .templates
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        templates.insert(path.into(), source.into());
    }
}

impl TemplateLoader for MemoryLoader {
    fn load(&self, path: &Path) -> io::Result<String> {
        let templates = self
            .templates
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        templates.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no template registered at {}", path.display()),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_name_is_kept() {
        let path = resolve_path(
            "/srv/views/page.tpl",
            Some(Path::new("/other/x.tpl")),
            Path::new("/root"),
        );
        assert_eq!(path, PathBuf::from("/srv/views/page.tpl"));
    }

    #[test]
    fn test_relative_to_including_file() {
        let path = resolve_path(
            "partials/row",
            Some(Path::new("/views/index.tpl")),
            Path::new("/root"),
        );
        assert_eq!(path, PathBuf::from("/views/partials/row.tpl"));
    }

    #[test]
    fn test_relative_to_root() {
        let path = resolve_path("page.html", None, Path::new("/site"));
        assert_eq!(path, PathBuf::from("/site/page.html"));
    }

    #[test]
    fn test_relative_root_becomes_absolute() {
        let path = resolve_path("page", None, Path::new("views"));
        assert!(path.is_absolute());
        assert!(path.ends_with("views/page.tpl"));
    }

    #[test]
    fn test_memory_loader() {
        let loader = MemoryLoader::new();
        loader.insert("/a.tpl", "A");
        assert_eq!(loader.load(Path::new("/a.tpl")).unwrap(), "A");
        let err = loader.load(Path::new("/b.tpl")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
