use crate::error::{Result, TemplateError};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use walkdir::WalkDir;

/// 模板的修改戳，用于判断编译产物是否过期
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Stamp(pub u128);

impl From<SystemTime> for Stamp {
    fn from(t: SystemTime) -> Self {
        Stamp(t.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_nanos()))
    }
}

/// 模板来源：名称 -> 标识 -> 内容与修改戳
pub trait TemplateLoader: Send + Sync {
    /// 模板名解析为唯一标识（文件加载器为规范化后的绝对路径）
    fn get_path(&self, name: &str) -> Result<String>;

    fn get_contents(&self, name: &str) -> Result<String>;

    /// 标识对应来源的当前修改戳；来源已不存在时返回 `None`
    fn modified(&self, identity: &str) -> Option<Stamp>;

    /// 所有可加载的模板名
    fn list(&self) -> Result<Vec<String>>;
}

/// 从根目录读取 `<name>.<extension>`，拒绝逃逸出根目录的名称
#[derive(Debug, Clone)]
pub struct FileLoader {
    root: PathBuf,
    extension: String,
}

impl FileLoader {
    pub fn new(root: impl AsRef<Path>, extension: &str) -> Result<Self> {
        let root = root.as_ref().canonicalize()?;
        Ok(Self {
            root,
            extension: extension.trim_start_matches('.').to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_name(&self, name: &str) -> String {
        if self.extension.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", name, self.extension)
        }
    }
}

impl TemplateLoader for FileLoader {
    fn get_path(&self, name: &str) -> Result<String> {
        let candidate = self.root.join(self.file_name(name));
        let resolved = candidate
            .canonicalize()
            .map_err(|_| TemplateError::TemplateNotFound {
                name: name.to_string(),
                path: candidate.display().to_string(),
            })?;
        if !resolved.starts_with(&self.root) {
            return Err(TemplateError::PathEscape {
                name: name.to_string(),
                root: self.root.display().to_string(),
            });
        }
        if !resolved.is_file() {
            return Err(TemplateError::TemplateNotFound {
                name: name.to_string(),
                path: resolved.display().to_string(),
            });
        }
        Ok(resolved.to_string_lossy().into_owned())
    }

    fn get_contents(&self, name: &str) -> Result<String> {
        let path = self.get_path(name)?;
        Ok(fs::read_to_string(path)?)
    }

    fn modified(&self, identity: &str) -> Option<Stamp> {
        fs::metadata(identity)
            .and_then(|m| m.modified())
            .ok()
            .map(Stamp::from)
    }

    /// 递归遍历根目录，返回以 `/` 分隔、去掉扩展名的模板名
    fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in WalkDir::new(&self.root).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if !self.extension.is_empty()
                && path.extension().is_none_or(|ext| ext != self.extension.as_str())
            {
                continue;
            }
            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            let relative = if self.extension.is_empty() {
                relative.to_path_buf()
            } else {
                relative.with_extension("")
            };
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            names.push(name);
        }
        names.sort();
        Ok(names)
    }
}

/// 内存中的模板集合；每次写入都会推进修改戳
#[derive(Debug, Default)]
pub struct InMemoryLoader {
    templates: DashMap<String, (String, Stamp)>,
    revision: AtomicU64,
}

impl InMemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_assets(assets: &[(&str, &str)]) -> Self {
        let loader = Self::new();
        for (name, source) in assets {
            loader.add(name, source);
        }
        loader
    }

    pub fn add(&self, name: &str, source: &str) {
        let stamp = self.next_stamp();
        self.templates
            .insert(name.to_string(), (source.to_string(), stamp));
    }

    /// 仅推进修改戳，内容不变
    pub fn touch(&self, name: &str) {
        let stamp = self.next_stamp();
        if let Some(mut entry) = self.templates.get_mut(name) {
            entry.1 = stamp;
        }
    }

    pub fn remove(&self, name: &str) {
        self.templates.remove(name);
    }

    fn next_stamp(&self) -> Stamp {
        Stamp(u128::from(self.revision.fetch_add(1, Ordering::SeqCst) + 1))
    }
}

impl TemplateLoader for InMemoryLoader {
    fn get_path(&self, name: &str) -> Result<String> {
        if self.templates.contains_key(name) {
            Ok(name.to_string())
        } else {
            Err(TemplateError::TemplateNotFound {
                name: name.to_string(),
                path: format!("memory:{}", name),
            })
        }
    }

    fn get_contents(&self, name: &str) -> Result<String> {
        self.templates
            .get(name)
            .map(|entry| entry.0.clone())
            .ok_or_else(|| TemplateError::TemplateNotFound {
                name: name.to_string(),
                path: format!("memory:{}", name),
            })
    }

    fn modified(&self, identity: &str) -> Option<Stamp> {
        self.templates.get(identity).map(|entry| entry.1)
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.templates.iter().map(|e| e.key().clone()).collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_loader_stamps() {
        let loader = InMemoryLoader::from_assets(&[("a", "A"), ("b", "B")]);
        let before = loader.modified("a").unwrap();
        loader.touch("a");
        assert!(loader.modified("a").unwrap() > before);
        assert_eq!(loader.get_contents("b").unwrap(), "B");
        assert_eq!(loader.list().unwrap(), vec!["a", "b"]);
        assert!(matches!(
            loader.get_path("c"),
            Err(TemplateError::TemplateNotFound { .. })
        ));
    }

    #[test]
    fn test_file_loader() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("tpl/mail")).unwrap();
        fs::write(dir.path().join("tpl/page.tpl"), "page").unwrap();
        fs::write(dir.path().join("tpl/mail/welcome.tpl"), "hi").unwrap();
        fs::write(dir.path().join("tpl/notes.txt"), "skip").unwrap();
        fs::write(dir.path().join("secret.tpl"), "secret").unwrap();

        let loader = FileLoader::new(dir.path().join("tpl"), "tpl").unwrap();
        assert_eq!(loader.get_contents("page").unwrap(), "page");
        assert_eq!(loader.get_contents("mail/welcome").unwrap(), "hi");
        assert_eq!(loader.list().unwrap(), vec!["mail/welcome", "page"]);

        let identity = loader.get_path("page").unwrap();
        assert!(loader.modified(&identity).is_some());

        assert!(matches!(
            loader.get_path("../secret"),
            Err(TemplateError::PathEscape { .. })
        ));
        assert!(matches!(
            loader.get_path("missing"),
            Err(TemplateError::TemplateNotFound { .. })
        ));
    }
}
