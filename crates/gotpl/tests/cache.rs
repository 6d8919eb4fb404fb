use std::thread;

use gotpl::{Engine, OptionsPatch};
use serde_json::json;

#[test]
fn test_failed_render_recovers_with_corrected_data() {
    let engine = Engine::new();
    let text = "<%= order.items.length %> items";

    let err = engine.render(text, &json!({"order": {}})).unwrap_err();
    assert_eq!(err.kind(), Some(gotpl::ErrorKind::TypeError));
    assert!(engine.cache().is_empty());

    let html = engine
        .render(text, &json!({"order": {"items": [1, 2]}}))
        .unwrap();
    assert_eq!(html, "2 items");
    assert_eq!(engine.cache().len(), 1);
}

#[test]
fn test_compiled_template_survives_its_own_failure() {
    let engine = Engine::new();
    let template = engine.compile("<%= a.b %>", &OptionsPatch::new()).unwrap();
    assert!(template.render(&json!({})).is_err());
    assert_eq!(template.render(&json!({"a": {"b": 1}})).unwrap(), "1");
}

#[test]
fn test_options_that_change_output_get_separate_entries() {
    let engine = Engine::new();
    let text = "a\n  <%= 1 %>";
    assert_eq!(engine.render(text, &json!({})).unwrap(), "a\n1");
    assert_eq!(
        engine
            .render_with(text, &json!({}), &OptionsPatch::new().minify(false))
            .unwrap(),
        "a\n  1"
    );
    assert_eq!(engine.cache().len(), 2);
}

#[test]
fn test_cache_disabled() {
    let engine = Engine::new();
    engine.configure(&OptionsPatch::new().cache(false)).unwrap();
    engine.render("<%= 1 %>", &json!({})).unwrap();
    assert!(engine.cache().is_empty());
}

#[test]
fn test_engines_do_not_share_state() {
    let first = Engine::new();
    let second = Engine::new();
    first.configure(&OptionsPatch::new().tags("{{", "}}")).unwrap();
    first.render("{{= 1 }}", &json!({})).unwrap();

    assert_eq!(second.options().open_tag, "<%");
    assert!(second.cache().is_empty());
    assert_eq!(second.render("{{= 1 }}", &json!({})).unwrap(), "{{= 1 }}");

    let clone = first.clone();
    assert_eq!(clone.cache().len(), 1);
    assert_eq!(clone.options().open_tag, "{{");
}

#[test]
fn test_concurrent_renders_share_one_entry() {
    let engine = Engine::new();
    let text = "<% for (const n of nums) { %><%= n * factor %> <% } %>";

    let handles: Vec<_> = (0..8)
        .map(|factor| {
            let engine = engine.clone();
            thread::spawn(move || {
                engine
                    .render(text, &json!({"nums": [1, 2, 3], "factor": factor}))
                    .unwrap()
            })
        })
        .collect();

    let outputs: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for (factor, output) in outputs.iter().enumerate() {
        assert_eq!(output, &format!("{} {} {} ", factor, factor * 2, factor * 3));
    }
    assert_eq!(engine.cache().len(), 1);
}
