#![cfg(feature = "async")]

use std::fs;

use gotpl::{Engine, MemoryLoader, OptionsPatch};
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::oneshot;

fn views() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("hello.tpl"), "Hello <%= name %>!<%- include('sig') %>").unwrap();
    fs::write(dir.path().join("sig.tpl"), " -- <%= from %>").unwrap();
    dir
}

#[tokio::test]
async fn test_render_file_async() {
    let dir = views();
    let engine = Engine::new();
    let html = engine
        .render_file(
            "hello",
            &json!({"name": "<you>", "from": "me"}),
            &OptionsPatch::new().root(dir.path()),
        )
        .await
        .unwrap();
    assert_eq!(html, "Hello &#60;you&#62;! -- me");
    assert_eq!(engine.cache().len(), 2);

    // Served from the cache the second time.
    fs::remove_file(dir.path().join("hello.tpl")).unwrap();
    let again = engine
        .render_file(
            "hello",
            &json!({"name": "x", "from": "y"}),
            &OptionsPatch::new().root(dir.path()),
        )
        .await
        .unwrap();
    assert_eq!(again, "Hello x! -- y");
}

#[tokio::test]
async fn test_render_file_async_missing() {
    let dir = TempDir::new().unwrap();
    let err = Engine::new()
        .render_file("absent", &json!({}), &OptionsPatch::new().root(dir.path()))
        .await
        .unwrap_err();
    assert!(err.is_resolution());
}

#[tokio::test]
async fn test_render_file_async_with_memory_loader() {
    let loader = MemoryLoader::new();
    loader.insert("/mem/page.tpl", "<%= 6 * 7 %>");
    let engine = Engine::with_loader(loader);
    let html = engine
        .render_file("/mem/page", &json!({}), &OptionsPatch::new())
        .await
        .unwrap();
    assert_eq!(html, "42");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_render_file_callback() {
    let dir = views();
    let (tx, rx) = oneshot::channel();
    Engine::new().render_file_callback(
        "hello",
        &json!({"name": "cb", "from": "test"}),
        &OptionsPatch::new().root(dir.path()),
        move |result| {
            let _ = tx.send(result);
        },
    );
    let html = rx.await.unwrap().unwrap();
    assert_eq!(html, "Hello cb! -- test");
}

#[test]
fn test_render_file_callback_without_runtime() {
    let dir = views();
    let (tx, rx) = std::sync::mpsc::channel();
    Engine::new().render_file_callback(
        "missing",
        &json!({}),
        &OptionsPatch::new().root(dir.path()),
        move |result| {
            tx.send(result.is_err()).unwrap();
        },
    );
    assert!(rx.recv().unwrap());
}
