use crate::error::{Result, TemplateError};
use crate::loader::TemplateLoader;
use crate::runtime::program::Program;
use crate::store::{ArtifactStore, CacheEntry, Dependency, all_fresh};
use dashmap::DashMap;
use std::sync::Arc;

/// 从不命中的存储：每次渲染都重新编译，只保留最近一次产物用于执行
#[derive(Debug, Default)]
pub struct NullStore {
    last: DashMap<String, CacheEntry>,
}

impl NullStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArtifactStore for NullStore {
    fn is_cached(&self, _name: &str, _sources: &dyn TemplateLoader) -> bool {
        false
    }

    fn store(&self, name: &str, artifact: &str, dependencies: &[Dependency]) -> Result<()> {
        let entry = CacheEntry::new(name, artifact, dependencies)?;
        self.last.insert(name.to_string(), entry);
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Arc<Program>> {
        self.last
            .get(name)
            .map(|e| e.program.clone())
            .ok_or_else(|| TemplateError::ArtifactMissing(name.to_string()))
    }

    fn artifact(&self, name: &str) -> Option<Arc<str>> {
        self.last.get(name).map(|e| e.artifact.clone())
    }

    fn remove(&self, name: &str) {
        self.last.remove(name);
    }
}

/// 进程内存储，按依赖修改戳判断是否过期
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ArtifactStore for MemoryStore {
    fn is_cached(&self, name: &str, sources: &dyn TemplateLoader) -> bool {
        self.entries
            .get(name)
            .is_some_and(|e| all_fresh(&e.dependencies, sources))
    }

    fn store(&self, name: &str, artifact: &str, dependencies: &[Dependency]) -> Result<()> {
        let entry = CacheEntry::new(name, artifact, dependencies)?;
        self.entries.insert(name.to_string(), entry);
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Arc<Program>> {
        self.entries
            .get(name)
            .map(|e| e.program.clone())
            .ok_or_else(|| TemplateError::ArtifactMissing(name.to_string()))
    }

    fn artifact(&self, name: &str) -> Option<Arc<str>> {
        self.entries.get(name).map(|e| e.artifact.clone())
    }

    fn remove(&self, name: &str) {
        self.entries.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::InMemoryLoader;
    use crate::runtime::Runtime;
    use crate::runtime::value::Value;

    fn deps(loader: &InMemoryLoader, names: &[&str]) -> Vec<Dependency> {
        names
            .iter()
            .map(|n| Dependency {
                identity: n.to_string(),
                modified: loader.modified(n),
            })
            .collect()
    }

    #[test]
    fn test_memory_store_staleness() {
        let loader = InMemoryLoader::from_assets(&[("page", "x"), ("base", "y")]);
        let store = MemoryStore::new();
        assert!(!store.is_cached("page", &loader));

        store
            .store("page", "hello", &deps(&loader, &["page", "base"]))
            .unwrap();
        assert!(store.is_cached("page", &loader));

        loader.touch("base");
        assert!(!store.is_cached("page", &loader));

        loader.remove("page");
        store.store("page", "hello", &deps(&loader, &["page"])).unwrap();
        assert!(!store.is_cached("page", &loader));
    }

    #[test]
    fn test_execute_and_missing() {
        let store = MemoryStore::new();
        store.store("page", "a<?echo $x;?>", &[]).unwrap();
        let params = Value::Map([("x".to_string(), Value::from(1))].into_iter().collect());
        assert_eq!(
            store.execute("page", &params, &Runtime::default()).unwrap(),
            "a1"
        );
        store.remove("page");
        assert!(matches!(
            store.load("page"),
            Err(TemplateError::ArtifactMissing(_))
        ));
    }

    #[test]
    fn test_null_store_never_cached() {
        let loader = InMemoryLoader::from_assets(&[("page", "x")]);
        let store = NullStore::new();
        store.store("page", "x", &deps(&loader, &["page"])).unwrap();
        assert!(!store.is_cached("page", &loader));
        assert_eq!(store.artifact("page").as_deref(), Some("x"));
    }

    #[test]
    fn test_bad_artifact_rejected() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.store("page", "<?echo ", &[]),
            Err(TemplateError::ArtifactSyntax { .. })
        ));
        assert!(store.is_empty());
    }
}
