use anyhow::Context;
use serde::Serialize;
use tagforge::{Engine, EngineOptions};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Serialize, Debug)]
struct Args {
    title: String,
    items: Vec<String>,
}

/// 用法：tagforge <模板目录> <模板名> [JSON 参数] [缓存目录]
fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut argv = std::env::args().skip(1);
    let root = argv.next().unwrap_or_else(|| "templates".to_string());
    let name = argv.next().unwrap_or_else(|| "index".to_string());
    let params: serde_json::Value = match argv.next() {
        Some(raw) => serde_json::from_str(&raw).context("parameters must be a JSON object")?,
        None => serde_json::to_value(Args {
            title: "tagforge".into(),
            items: vec!["one".into(), "two".into()],
        })?,
    };

    let mut options = EngineOptions::new(&root);
    if let Some(cache_dir) = argv.next() {
        options = options.cache_dir(cache_dir);
    }
    let engine = Engine::with_options(&options)
        .with_context(|| format!("failed to open template root '{}'", root))?;

    let mut stdout = std::io::stdout().lock();
    engine
        .show(&name, &params, &mut stdout)
        .with_context(|| format!("failed to render '{}'", name))?;
    Ok(())
}
