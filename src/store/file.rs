use crate::error::{Result, TemplateError};
use crate::loader::TemplateLoader;
use crate::runtime::program::Program;
use crate::store::{ArtifactStore, COMPILER_VERSION, CacheEntry, Dependency, all_fresh};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// `.cache.info` 的内容
#[derive(Debug, Serialize, Deserialize)]
struct CacheInfo {
    version: String,
    dependencies: Vec<Dependency>,
}

/// 产物落盘为 `<dir>/<name>.cache`，依赖信息写入同名 `.cache.info`（JSON）。
///
/// 写盘失败不影响本次调用：产物始终先放入内存副本。
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    memcache: DashMap<String, CacheEntry>,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            memcache: DashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.cache", encode_name(name)))
    }

    pub fn info_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.cache.info", encode_name(name)))
    }

    fn read_info(&self, name: &str) -> Option<CacheInfo> {
        let raw = fs::read_to_string(self.info_path(name)).ok()?;
        match serde_json::from_str(&raw) {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::debug!(template = name, error = %e, "ignoring unreadable cache info");
                None
            }
        }
    }

    fn persist(&self, name: &str, artifact: &str, dependencies: &[Dependency]) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let info = CacheInfo {
            version: COMPILER_VERSION.to_string(),
            dependencies: dependencies.to_vec(),
        };
        let json = serde_json::to_string_pretty(&info)
            .map_err(|e| TemplateError::Io(std::io::Error::other(e)))?;
        fs::write(self.artifact_path(name), artifact)?;
        fs::write(self.info_path(name), json)?;
        Ok(())
    }

    /// 内存副本；磁盘信息记录的依赖与之不同时（其他实例已重新编译）丢弃
    fn memory_entry(&self, name: &str) -> Option<CacheEntry> {
        let entry = self.memcache.get(name)?.clone();
        match self.read_info(name) {
            Some(info) if info.dependencies != entry.dependencies => {
                tracing::debug!(template = name, "artifact replaced on disk, dropping memory copy");
                self.memcache.remove(name);
                None
            }
            _ => Some(entry),
        }
    }
}

impl ArtifactStore for FileStore {
    fn is_cached(&self, name: &str, sources: &dyn TemplateLoader) -> bool {
        let Some(info) = self.read_info(name) else {
            return false;
        };
        info.version == COMPILER_VERSION
            && self.artifact_path(name).is_file()
            && all_fresh(&info.dependencies, sources)
    }

    fn store(&self, name: &str, artifact: &str, dependencies: &[Dependency]) -> Result<()> {
        let entry = CacheEntry::new(name, artifact, dependencies)?;
        self.memcache.insert(name.to_string(), entry);
        self.persist(name, artifact, dependencies)
    }

    /// 优先使用与磁盘一致的内存副本，否则从磁盘读取并解析
    fn load(&self, name: &str) -> Result<Arc<Program>> {
        if let Some(entry) = self.memory_entry(name) {
            return Ok(entry.program);
        }
        let artifact = fs::read_to_string(self.artifact_path(name))
            .map_err(|_| TemplateError::ArtifactMissing(name.to_string()))?;
        let dependencies = self
            .read_info(name)
            .map(|info| info.dependencies)
            .unwrap_or_default();
        let entry = CacheEntry::new(name, &artifact, &dependencies)?;
        let program = entry.program.clone();
        self.memcache.insert(name.to_string(), entry);
        Ok(program)
    }

    fn artifact(&self, name: &str) -> Option<Arc<str>> {
        if let Some(entry) = self.memory_entry(name) {
            return Some(entry.artifact);
        }
        fs::read_to_string(self.artifact_path(name))
            .ok()
            .map(Arc::from)
    }

    fn remove(&self, name: &str) {
        self.memcache.remove(name);
        for path in [self.artifact_path(name), self.info_path(name)] {
            match fs::remove_file(&path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove cached artifact");
                }
                _ => {}
            }
        }
    }
}

/// 模板名映射为单个安全的文件名
fn encode_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for b in name.bytes() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' => out.push(b as char),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}
