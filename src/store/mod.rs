//! 编译产物存储与过期判断

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::{MemoryStore, NullStore};

use crate::error::Result;
use crate::loader::{Stamp, TemplateLoader};
use crate::runtime::Runtime;
use crate::runtime::program::Program;
use crate::runtime::value::Value;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 写入产物时记录的编译器版本，版本不同的产物视为过期
pub const COMPILER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// 产物依赖的一个来源及编译时的修改戳
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub identity: String,
    pub modified: Option<Stamp>,
}

impl Dependency {
    pub fn is_fresh(&self, sources: &dyn TemplateLoader) -> bool {
        self.modified.is_some() && sources.modified(&self.identity) == self.modified
    }
}

pub(crate) fn all_fresh(dependencies: &[Dependency], sources: &dyn TemplateLoader) -> bool {
    dependencies.iter().all(|d| d.is_fresh(sources))
}

/// 一条内存中的产物记录
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub artifact: Arc<str>,
    pub program: Arc<Program>,
    pub dependencies: Vec<Dependency>,
}

impl CacheEntry {
    pub fn new(name: &str, artifact: &str, dependencies: &[Dependency]) -> Result<Self> {
        Ok(Self {
            artifact: Arc::from(artifact),
            program: Arc::new(Program::parse(name, artifact)?),
            dependencies: dependencies.to_vec(),
        })
    }
}

pub trait ArtifactStore: Send + Sync {
    /// 产物存在且记录的所有依赖修改戳均未变化
    fn is_cached(&self, name: &str, sources: &dyn TemplateLoader) -> bool;

    /// 保存产物。产物无法解析时返回 `ArtifactSyntax`；持久化失败时返回 `Io`，
    /// 此时内存副本仍然可用
    fn store(&self, name: &str, artifact: &str, dependencies: &[Dependency]) -> Result<()>;

    fn load(&self, name: &str) -> Result<Arc<Program>>;

    fn artifact(&self, name: &str) -> Option<Arc<str>>;

    fn remove(&self, name: &str);

    fn execute(&self, name: &str, params: &Value, runtime: &Runtime) -> Result<String> {
        self.load(name)?.execute(params, runtime)
    }
}
