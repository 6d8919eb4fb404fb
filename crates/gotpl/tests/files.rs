use std::fs;
use std::path::Path;

use gotpl::{Engine, ErrorKind, OptionsPatch};
use serde_json::json;
use tempfile::TempDir;

fn write(dir: &Path, name: &str, text: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, text).unwrap();
}

fn views(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (name, text) in files {
        write(dir.path(), name, text);
    }
    dir
}

#[test]
fn test_render_file_with_root_and_default_extension() {
    let dir = views(&[("index.tpl", "<h1><%= title %></h1>")]);
    let engine = Engine::new();
    let html = engine
        .render_file_sync(
            "index",
            &json!({"title": "Home"}),
            &OptionsPatch::new().root(dir.path()),
        )
        .unwrap();
    assert_eq!(html, "<h1>Home</h1>");
}

#[test]
fn test_include_relative_to_current_file() {
    let dir = views(&[
        (
            "pages/index.tpl",
            "<%- include('../partials/header', {title: 'Docs'}) %><main><%= body %></main>",
        ),
        ("partials/header.tpl", "<header><%= title %>|<%= body %></header>"),
    ]);
    let html = Engine::new()
        .render_file_sync(
            dir.path().join("pages/index.tpl"),
            &json!({"body": "text", "title": "ignored"}),
            &OptionsPatch::new(),
        )
        .unwrap();
    assert_eq!(html, "<header>Docs|text</header><main>text</main>");
}

#[test]
fn test_include_override_precedence() {
    let dir = views(&[
        ("page.tpl", "<%- include('part', {a: 'override'}) %>"),
        ("part.tpl", "<%= a %>,<%= b %>,<%= c %>"),
    ]);
    let scope = gotpl::Scope::with_standard()
        .with("a", json!("scope"))
        .with("b", json!("scope"))
        .with("c", json!("scope"));
    let html = Engine::new()
        .render_file_sync(
            "page",
            &json!({"a": "parent", "b": "parent"}),
            &OptionsPatch::new()
                .root(dir.path())
                .scope(std::sync::Arc::new(scope)),
        )
        .unwrap();
    assert_eq!(html, "override,parent,scope");
}

#[test]
fn test_include_in_a_loop_is_cached() {
    let dir = views(&[
        (
            "list.tpl",
            "<% rows.forEach(function (row) { %><%- include('row', {row: row}) %><% }) %>",
        ),
        ("row.tpl", "<i><%= row %></i>"),
    ]);
    let engine = Engine::new();
    let html = engine
        .render_file_sync(
            "list",
            &json!({"rows": [1, 2, 3]}),
            &OptionsPatch::new().root(dir.path()),
        )
        .unwrap();
    assert_eq!(html, "<i>1</i><i>2</i><i>3</i>");
    assert_eq!(engine.cache().len(), 2);
}

#[test]
fn test_cached_file_is_not_reread() {
    let dir = views(&[("note.tpl", "first")]);
    let engine = Engine::new();
    let options = OptionsPatch::new().root(dir.path());
    assert_eq!(engine.render_file_sync("note", &json!({}), &options).unwrap(), "first");

    write(dir.path(), "note.tpl", "second");
    assert_eq!(engine.render_file_sync("note", &json!({}), &options).unwrap(), "first");

    engine.cache().clear();
    assert_eq!(engine.render_file_sync("note", &json!({}), &options).unwrap(), "second");
}

#[test]
fn test_debug_rereads_file_every_time() {
    let dir = views(&[("note.tpl", "first")]);
    let engine = Engine::new();
    let options = OptionsPatch::new().root(dir.path()).debug(true);
    assert_eq!(engine.render_file_sync("note", &json!({}), &options).unwrap(), "first");
    write(dir.path(), "note.tpl", "second");
    assert_eq!(engine.render_file_sync("note", &json!({}), &options).unwrap(), "second");
    assert!(engine.cache().is_empty());
}

#[test]
fn test_missing_template_is_resolution_error() {
    let dir = views(&[("page.tpl", "<%- include('missing') %>")]);
    let engine = Engine::new();
    let options = OptionsPatch::new().root(dir.path());

    let err = engine.render_file_sync("nope", &json!({}), &options).unwrap_err();
    assert!(err.is_resolution());

    let err = engine.render_file_sync("page", &json!({}), &options).unwrap_err();
    assert!(err.is_resolution());
    assert!(err.to_string().contains("missing.tpl"));
}

#[test]
fn test_include_errors_can_be_caught() {
    let dir = views(&[(
        "page.tpl",
        "<% try { %><%- include('missing') %><% } catch (e) { %>fallback<% } %>",
    )]);
    let html = Engine::new()
        .render_file_sync("page", &json!({}), &OptionsPatch::new().root(dir.path()))
        .unwrap();
    assert_eq!(html, "fallback");
}

#[test]
fn test_nested_debug_error_keeps_innermost_line() {
    let dir = views(&[
        ("outer.tpl", "<p>\n\n<%- include('inner') %>\n</p>"),
        ("inner.tpl", "ok\n<%= broken.value %>"),
    ]);
    let err = Engine::new()
        .render_file_sync("outer", &json!({}), &OptionsPatch::new().root(dir.path()).debug(true))
        .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::TypeError));
    assert_eq!(err.line(), Some(2));
    assert!(err.to_string().contains(" >> 2| <%= broken.value %>"));
}

#[test]
fn test_include_with_options() {
    let dir = views(&[
        ("page.tpl", "<%- include('raw', null, {minify: false}) %>|<%- include('raw') %>"),
        ("raw.tpl", "a\n  b"),
    ]);
    let html = Engine::new()
        .render_file_sync("page", &json!({}), &OptionsPatch::new().root(dir.path()))
        .unwrap();
    assert_eq!(html, "a\n  b|a\nb");
}

#[test]
fn test_bad_include_options_are_rejected() {
    let dir = views(&[
        ("page.tpl", "<%- include('part', null, {unknownOption: true}) %>"),
        ("part.tpl", "x"),
    ]);
    let err = Engine::new()
        .render_file_sync("page", &json!({}), &OptionsPatch::new().root(dir.path()))
        .unwrap_err();
    assert!(matches!(err, gotpl::Error::Options(_)));
}

#[test]
fn test_options_from_yaml_file() {
    let dir = views(&[
        ("gotpl.yaml", "openTag: '[%'\ncloseTag: '%]'\nminify: false\n"),
        ("page.tpl", "[%= greeting %]\n  done"),
    ]);
    let yaml = fs::read_to_string(dir.path().join("gotpl.yaml")).unwrap();
    let engine = Engine::new();
    engine.configure(&OptionsPatch::from_yaml(&yaml).unwrap()).unwrap();
    let html = engine
        .render_file_sync("page", &json!({"greeting": "hi"}), &OptionsPatch::new().root(dir.path()))
        .unwrap();
    assert_eq!(html, "hi\n  done");
}
