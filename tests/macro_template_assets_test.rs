use serde_json::json;
use std::sync::Arc;
use tagforge::{Engine, MemoryStore, TemplateLoader, template_assets};

#[test]
fn test_macro_assets() {
    // 路径相对于 CARGO_MANIFEST_DIR
    let loader = template_assets!("tests/resources/templates/**/*.tpl");
    assert_eq!(
        loader.list().unwrap(),
        vec!["layout/base", "mail/welcome", "page"]
    );

    let engine = Engine::new(Arc::new(loader), Arc::new(MemoryStore::new()));
    let html = engine
        .render("page", &json!({ "title": "Home", "items": ["a", "b"] }))
        .unwrap();
    assert_eq!(
        html,
        "<html>\n<head><title>Home</title></head>\n<body>\n<ul>\n<li>a</li><li>b</li>\n</ul>\n<script src=\"app.js\"></script>\n<script src=\"page.js\"></script>\n</body>\n</html>"
    );

    let mail = engine
        .render(
            "mail/welcome",
            &json!({ "user": { "name": "Ann" }, "messages": [1] }),
        )
        .unwrap();
    assert_eq!(mail, "Welcome, Ann!\nYou have new messages.");
}
