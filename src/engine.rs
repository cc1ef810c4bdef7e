use crate::error::{Result, TemplateError};
use crate::loader::{FileLoader, TemplateLoader};
use crate::options::EngineOptions;
use crate::plugins::BasePlugin;
use crate::runtime::Runtime;
use crate::runtime::value::to_value;
use crate::store::{ArtifactStore, FileStore, MemoryStore};
use crate::tpl::codegen;
use crate::tpl::compiler::{Compiler, ParsedTemplate};
use crate::tpl::registry::{Plugin, TagRegistry};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// 一次编译的结果
#[derive(Debug, Clone)]
pub struct Compiled {
    pub template: ParsedTemplate,
    pub artifact: String,
}

/// 模板引擎：按需编译、缓存并执行模板
pub struct Engine {
    loader: Arc<dyn TemplateLoader>,
    store: Arc<dyn ArtifactStore>,
    plugins: Vec<Arc<dyn Plugin>>,
    registry: Arc<TagRegistry>,
    runtime: Arc<Runtime>,
    strip: bool,
    single_flight: bool,
    compile_locks: DashMap<String, Arc<Mutex<()>>>,
    compilations: AtomicUsize,
}

impl Engine {
    /// 使用内置标签插件创建引擎
    pub fn new(loader: Arc<dyn TemplateLoader>, store: Arc<dyn ArtifactStore>) -> Self {
        let plugins: Vec<Arc<dyn Plugin>> = vec![Arc::new(BasePlugin)];
        Self {
            loader,
            store,
            registry: Arc::new(TagRegistry::from_plugins(&plugins)),
            plugins,
            runtime: Arc::new(Runtime::default()),
            strip: true,
            single_flight: true,
            compile_locks: DashMap::new(),
            compilations: AtomicUsize::new(0),
        }
    }

    /// 按配置创建文件加载器，设置了缓存目录时产物落盘
    pub fn with_options(options: &EngineOptions) -> Result<Self> {
        let loader = FileLoader::new(&options.root, &options.extension)?;
        let store: Arc<dyn ArtifactStore> = match &options.cache_dir {
            Some(dir) => Arc::new(FileStore::new(dir.clone())),
            None => Arc::new(MemoryStore::new()),
        };
        let mut engine = Self::new(Arc::new(loader), store);
        engine.strip = options.strip_utf8_and_spaces;
        engine.single_flight = options.single_flight;
        Ok(engine)
    }

    pub fn strip_utf8_and_spaces(mut self, strip: bool) -> Self {
        self.strip = strip;
        self
    }

    pub fn single_flight(mut self, single_flight: bool) -> Self {
        self.single_flight = single_flight;
        self
    }

    /// 追加插件并重建标签表；后追加的插件覆盖同一 (标签, 阶段)
    pub fn plugin(&mut self, plugin: impl Plugin + 'static) -> &mut Self {
        self.plugins.push(Arc::new(plugin));
        self.registry = Arc::new(TagRegistry::from_plugins(&self.plugins));
        self
    }

    pub fn registry(&self) -> &TagRegistry {
        &self.registry
    }

    /// 产物执行时的函数表
    pub fn runtime_mut(&mut self) -> &mut Runtime {
        Arc::make_mut(&mut self.runtime)
    }

    pub fn loader(&self) -> &dyn TemplateLoader {
        self.loader.as_ref()
    }

    pub fn store(&self) -> &dyn ArtifactStore {
        self.store.as_ref()
    }

    /// 共享加载器、存储、插件与运行时的新引擎，不共享编译锁与计数
    pub fn dup(&self) -> Self {
        Self {
            loader: Arc::clone(&self.loader),
            store: Arc::clone(&self.store),
            plugins: self.plugins.clone(),
            registry: Arc::clone(&self.registry),
            runtime: Arc::clone(&self.runtime),
            strip: self.strip,
            single_flight: self.single_flight,
            compile_locks: DashMap::new(),
            compilations: AtomicUsize::new(0),
        }
    }

    /// 本引擎实际执行过的编译次数
    pub fn compilations(&self) -> usize {
        self.compilations.load(Ordering::Relaxed)
    }

    /// 编译模板但不执行，也不写入存储
    pub fn compile(&self, name: &str) -> Result<Compiled> {
        let started = Instant::now();
        let mut compiler = Compiler::new(self.loader.as_ref(), Arc::clone(&self.registry));
        let template = compiler.parse_template(name)?;
        let artifact = codegen::generate(&mut compiler, template.root, self.strip)?;
        self.compilations.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            template = name,
            dependencies = template.dependencies.len(),
            elapsed = ?started.elapsed(),
            "compiled template"
        );
        Ok(Compiled { template, artifact })
    }

    /// 编译内联源码，返回产物
    pub fn parse_str(&self, name: &str, source: &str) -> Result<String> {
        let mut compiler = Compiler::new(self.loader.as_ref(), Arc::clone(&self.registry));
        let template = compiler.parse_str(name, source)?;
        codegen::generate(&mut compiler, template.root, self.strip)
    }

    /// 产物缺失或过期时编译并写入存储
    fn ensure_compiled(&self, name: &str) -> Result<()> {
        if self.store.is_cached(name, self.loader.as_ref()) {
            tracing::trace!(template = name, "artifact cache hit");
            return Ok(());
        }

        let lock = self.single_flight.then(|| {
            self.compile_locks
                .entry(name.to_string())
                .or_default()
                .value()
                .clone()
        });
        let _guard = lock.as_ref().map(|l| l.lock());
        // 等待期间可能已由其他调用者编译完成
        if lock.is_some() && self.store.is_cached(name, self.loader.as_ref()) {
            tracing::trace!(template = name, "artifact compiled by a concurrent caller");
            return Ok(());
        }

        let compiled = self.compile(name)?;
        match self
            .store
            .store(name, &compiled.artifact, &compiled.template.dependencies)
        {
            Ok(()) => Ok(()),
            Err(TemplateError::Io(e)) => {
                tracing::warn!(template = name, error = %e, "failed to persist artifact, serving from memory");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// 渲染模板；参数会被拷贝为运行时的值
    pub fn render<T: Serialize + ?Sized>(&self, name: &str, params: &T) -> Result<String> {
        let params = to_value(params)?;
        self.ensure_compiled(name)?;
        self.store.execute(name, &params, &self.runtime)
    }

    /// 渲染并写出
    pub fn show<T: Serialize + ?Sized, W: Write>(
        &self,
        name: &str,
        params: &T,
        out: &mut W,
    ) -> Result<()> {
        let output = self.render(name, params)?;
        out.write_all(output.as_bytes())?;
        Ok(())
    }

    /// 编译加载器中的全部模板，返回数量
    pub fn precompile_all(&self) -> Result<usize> {
        let names = self.loader.list()?;
        for name in &names {
            self.ensure_compiled(name)?;
        }
        tracing::debug!(count = names.len(), "precompiled templates");
        Ok(names.len())
    }

    /// 移除模板产物
    pub fn remove(&self, name: &str) {
        self.store.remove(name);
        self.compile_locks.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::InMemoryLoader;
    use crate::store::NullStore;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Page<'a> {
        title: &'a str,
        items: Vec<i32>,
    }

    fn engine(templates: &[(&str, &str)]) -> (Arc<InMemoryLoader>, Engine) {
        let loader = Arc::new(InMemoryLoader::from_assets(templates));
        let engine = Engine::new(loader.clone(), Arc::new(MemoryStore::new()));
        (loader, engine)
    }

    #[test]
    fn test_render_with_struct_params() {
        let (_, engine) = engine(&[(
            "page",
            "<h1>{$title}</h1>{foreach list=$items var=$i}[{$i}]{/foreach}",
        )]);
        let page = Page {
            title: "Hi",
            items: vec![1, 2],
        };
        assert_eq!(engine.render("page", &page).unwrap(), "<h1>Hi</h1>[1][2]");
    }

    #[test]
    fn test_cache_hit_and_invalidation() {
        let (loader, engine) = engine(&[("page", "v1")]);
        assert_eq!(engine.render("page", &()).unwrap(), "v1");
        assert_eq!(engine.render("page", &()).unwrap(), "v1");
        assert_eq!(engine.compilations(), 1);

        loader.add("page", "v2");
        assert_eq!(engine.render("page", &()).unwrap(), "v2");
        assert_eq!(engine.compilations(), 2);
    }

    #[test]
    fn test_null_store_recompiles() {
        let loader = Arc::new(InMemoryLoader::from_assets(&[("page", "x")]));
        let engine = Engine::new(loader, Arc::new(NullStore::new()));
        engine.render("page", &()).unwrap();
        engine.render("page", &()).unwrap();
        assert_eq!(engine.compilations(), 2);
    }

    #[test]
    fn test_show_and_strip() {
        let (_, engine) = engine(&[("page", "\u{feff}  hello {$who}\n")]);
        let mut out = Vec::new();
        engine
            .show("page", &serde_json::json!({ "who": "world" }), &mut out)
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "hello world");

        let loader = Arc::new(InMemoryLoader::from_assets(&[("page", " x ")]));
        let raw = Engine::new(loader, Arc::new(MemoryStore::new())).strip_utf8_and_spaces(false);
        assert_eq!(raw.render("page", &()).unwrap(), " x ");
    }

    #[test]
    fn test_translator_and_dup() {
        let (_, mut engine) = engine(&[("page", "{t}Hello{/t}")]);
        engine.runtime_mut().translator(|s| format!("Bonjour ({})", s));
        assert_eq!(engine.render("page", &()).unwrap(), "Bonjour (Hello)");

        let copy = engine.dup();
        assert_eq!(copy.compilations(), 0);
        assert_eq!(copy.render("page", &()).unwrap(), "Bonjour (Hello)");
        // 共享存储：无需重新编译
        assert_eq!(copy.compilations(), 0);
    }

    #[test]
    fn test_precompile_and_remove() {
        let (_, engine) = engine(&[("a", "A"), ("b", "{include name=a}B")]);
        assert_eq!(engine.precompile_all().unwrap(), 2);
        assert_eq!(engine.store().artifact("b").as_deref(), Some("AB"));
        engine.remove("b");
        assert!(engine.store().artifact("b").is_none());
    }

    #[test]
    fn test_parse_str() {
        let (_, engine) = engine(&[("part", "P")]);
        assert_eq!(
            engine.parse_str("inline", "<{include name=part}>").unwrap(),
            "<P>"
        );
    }

    /// 读取内容之后来源立即被修改
    struct EditedWhileReading(InMemoryLoader);

    impl TemplateLoader for EditedWhileReading {
        fn get_path(&self, name: &str) -> Result<String> {
            self.0.get_path(name)
        }

        fn get_contents(&self, name: &str) -> Result<String> {
            let source = self.0.get_contents(name)?;
            self.0.add(name, "edited");
            Ok(source)
        }

        fn modified(&self, identity: &str) -> Option<crate::loader::Stamp> {
            self.0.modified(identity)
        }

        fn list(&self) -> Result<Vec<String>> {
            self.0.list()
        }
    }

    #[test]
    fn test_edit_during_compile_is_stale() {
        let loader = EditedWhileReading(InMemoryLoader::from_assets(&[("page", "original")]));
        let engine = Engine::new(Arc::new(loader), Arc::new(MemoryStore::new()));
        assert_eq!(engine.render("page", &()).unwrap(), "original");
        assert!(!engine.store().is_cached("page", engine.loader()));
        assert_eq!(engine.render("page", &()).unwrap(), "edited");
        assert_eq!(engine.compilations(), 2);
    }

    #[test]
    fn test_missing_template() {
        let (_, engine) = engine(&[]);
        assert!(matches!(
            engine.render("nope", &()),
            Err(TemplateError::TemplateNotFound { .. })
        ));
    }
}
