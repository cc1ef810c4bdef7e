use crate::error::Result;
use crate::tpl::compiler::Compiler;
use crate::tpl::node::NodeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// 标签处理阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Open,
    Close,
    Render,
    /// 同时充当 OPEN，且节点默认不需要闭合
    OpenClose,
}

pub type TagHandler = Arc<dyn Fn(&mut Compiler<'_>, NodeId) -> Result<()> + Send + Sync>;

#[derive(Clone, Default)]
pub struct TagHandlers {
    pub open: Option<TagHandler>,
    pub close: Option<TagHandler>,
    pub render: Option<TagHandler>,
    pub open_close: Option<TagHandler>,
}

impl TagHandlers {
    fn slot(&mut self, phase: Phase) -> &mut Option<TagHandler> {
        match phase {
            Phase::Open => &mut self.open,
            Phase::Close => &mut self.close,
            Phase::Render => &mut self.render,
            Phase::OpenClose => &mut self.open_close,
        }
    }

    pub fn get(&self, phase: Phase) -> Option<&TagHandler> {
        match phase {
            Phase::Open => self.open.as_ref(),
            Phase::Close => self.close.as_ref(),
            Phase::Render => self.render.as_ref(),
            Phase::OpenClose => self.open_close.as_ref(),
        }
    }
}

impl fmt::Debug for TagHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TagHandlers")
            .field("open", &self.open.is_some())
            .field("close", &self.close.is_some())
            .field("render", &self.render.is_some())
            .field("open_close", &self.open_close.is_some())
            .finish()
    }
}

/// 标签插件：通过显式注册向标签表提供处理函数
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn register(&self, tags: &mut TagRegistry);
}

/// 标签名 -> 各阶段处理函数
#[derive(Clone, Default, Debug)]
pub struct TagRegistry {
    tags: HashMap<String, TagHandlers>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按注册顺序构建，后注册的插件覆盖同一 (标签, 阶段)
    pub fn from_plugins(plugins: &[Arc<dyn Plugin>]) -> Self {
        let mut registry = Self::new();
        for plugin in plugins {
            tracing::trace!(plugin = plugin.name(), "registering tag plugin");
            plugin.register(&mut registry);
        }
        registry
    }

    pub fn bind<F>(&mut self, tag: &str, phase: Phase, handler: F) -> &mut Self
    where
        F: Fn(&mut Compiler<'_>, NodeId) -> Result<()> + Send + Sync + 'static,
    {
        *self.tags.entry(tag.to_string()).or_default().slot(phase) = Some(Arc::new(handler));
        self
    }

    pub fn handlers(&self, tag: &str) -> Option<&TagHandlers> {
        self.tags.get(tag)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.tags.contains_key(tag)
    }

    pub fn tag_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tags.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
