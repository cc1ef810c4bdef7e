use std::path::PathBuf;

/// 引擎配置
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub root: PathBuf,            // 模板根目录
    pub cache_dir: Option<PathBuf>, // 产物落盘目录；未设置时只缓存在内存
    pub extension: String,        // 模板文件扩展名
    pub strip_utf8_and_spaces: bool, // 去掉产物首尾空白与 BOM
    pub single_flight: bool,      // 同名模板的并发冷编译只执行一次
}

impl EngineOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        EngineOptions {
            root: root.into(),
            cache_dir: None,
            extension: "tpl".to_string(),
            strip_utf8_and_spaces: true,
            single_flight: true,
        }
    }

    pub fn cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(cache_dir.into());
        self
    }

    pub fn extension(mut self, extension: &str) -> Self {
        self.extension = extension.to_string();
        self
    }

    pub fn strip_utf8_and_spaces(mut self, strip: bool) -> Self {
        self.strip_utf8_and_spaces = strip;
        self
    }

    pub fn single_flight(mut self, single_flight: bool) -> Self {
        self.single_flight = single_flight;
        self
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::new("templates")
    }
}
