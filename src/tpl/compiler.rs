use crate::error::{Result, TemplateError};
use crate::loader::{Stamp, TemplateLoader};
use crate::store::Dependency;
use crate::tpl::node::{NodeId, Tree};
use crate::tpl::params::{self, ParamSpec};
use crate::tpl::parser::TreeBuilder;
use crate::tpl::registry::{Phase, TagRegistry};
use crate::tpl::tokenizer;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;

/// 正在解析的模板文件
#[derive(Debug)]
struct Frame {
    name: String,
    identity: String,
    root: NodeId,
}

/// 已注册的区块及其注册时的嵌套深度（越深越靠近基模板）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEntry {
    pub node: NodeId,
    pub depth: usize,
}

/// 解析完成的模板：根节点与读取过的全部来源（含读取前的修改戳）
#[derive(Debug, Clone)]
pub struct ParsedTemplate {
    pub name: String,
    pub root: NodeId,
    pub dependencies: Vec<Dependency>,
}

/// 一次顶层编译的上下文，供标签处理函数读写
pub struct Compiler<'a> {
    pub tree: Tree,
    loader: &'a dyn TemplateLoader,
    registry: Arc<TagRegistry>,
    frames: Vec<Frame>,
    parsed: HashMap<String, NodeId>,
    dependencies: IndexMap<String, Option<Stamp>>,
    blocks: HashMap<String, BlockEntry>,
    pending: Vec<NodeId>,
}

impl<'a> Compiler<'a> {
    pub fn new(loader: &'a dyn TemplateLoader, registry: Arc<TagRegistry>) -> Self {
        Self {
            tree: Tree::new(),
            loader,
            registry,
            frames: Vec::new(),
            parsed: HashMap::new(),
            dependencies: IndexMap::new(),
            blocks: HashMap::new(),
            pending: Vec::new(),
        }
    }

    /// 按名称解析顶层模板
    pub fn parse_template(&mut self, name: &str) -> Result<ParsedTemplate> {
        let root = self.parse_file(name, None)?;
        self.finish(name, root)
    }

    /// 解析内联源码；其中引用的其他模板仍经由加载器读取
    pub fn parse_str(&mut self, name: &str, source: &str) -> Result<ParsedTemplate> {
        let modified = self.loader.modified(name);
        let root = self.parse_source(name, name, modified, source)?;
        self.finish(name, root)
    }

    /// 解析被引用的模板文件，返回其（可能已被 extends 替换的）根节点。
    ///
    /// 同一次编译中重复引用只解析一次；出现在当前解析链上则视为循环。
    pub fn parse_file(&mut self, name: &str, via: Option<NodeId>) -> Result<NodeId> {
        let identity = self.loader.get_path(name)?;
        if self.frames.iter().any(|f| f.identity == identity) {
            let mut chain: Vec<String> = self.frames.iter().map(|f| f.name.clone()).collect();
            chain.push(name.to_string());
            let (tag, file, line) = match via {
                Some(id) => {
                    let node = self.tree.get(id);
                    (node.tag().to_string(), node.file.to_string(), node.line)
                }
                None => (String::new(), name.to_string(), 0),
            };
            return Err(TemplateError::Cycle {
                tag,
                file,
                line,
                chain,
            });
        }
        if let Some(root) = self.parsed.get(&identity) {
            return Ok(*root);
        }

        // 先取修改戳再读内容，读取期间的修改会使产物被判为过期
        let modified = self.loader.modified(&identity);
        let source = self.loader.get_contents(name)?;
        let root = self.parse_source(name, &identity, modified, &source)?;
        self.parsed.insert(identity, root);
        Ok(root)
    }

    fn parse_source(
        &mut self,
        name: &str,
        identity: &str,
        modified: Option<Stamp>,
        source: &str,
    ) -> Result<NodeId> {
        tracing::trace!(template = name, "parsing template");
        self.dependencies.insert(identity.to_string(), modified);
        let file: Arc<str> = Arc::from(name);
        let tokens = tokenizer::tokenize(source, name)?;
        let root = self.tree.create(file.clone(), 1);
        self.tree.get_mut(root).is_root = true;

        self.frames.push(Frame {
            name: name.to_string(),
            identity: identity.to_string(),
            root,
        });
        let built = TreeBuilder::new(self, tokens, file).build(root);
        let frame = self.frames.pop();
        built?;
        Ok(frame.map_or(root, |f| f.root))
    }

    fn finish(&mut self, name: &str, root: NodeId) -> Result<ParsedTemplate> {
        self.link_pending()?;
        Ok(ParsedTemplate {
            name: name.to_string(),
            root,
            dependencies: self
                .dependencies
                .iter()
                .map(|(identity, modified)| Dependency {
                    identity: identity.clone(),
                    modified: *modified,
                })
                .collect(),
        })
    }

    /// 当前模板文件的嵌套深度（extends/include 每进入一层加一）
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// 替换当前模板文件的根节点
    pub fn set_root(&mut self, root: NodeId) {
        if let Some(frame) = self.frames.last_mut() {
            frame.root = root;
        }
    }

    pub fn block(&self, id: &str) -> Option<BlockEntry> {
        self.blocks.get(id).copied()
    }

    pub fn register_block(&mut self, id: &str, node: NodeId) {
        let depth = self.depth();
        self.blocks
            .insert(id.to_string(), BlockEntry { node, depth });
    }

    /// 区块尚未出现的引用，留待整个编译结束后统一链接
    pub fn defer_block_ref(&mut self, node: NodeId) {
        self.pending.push(node);
    }

    fn link_pending(&mut self) -> Result<()> {
        for node in std::mem::take(&mut self.pending) {
            let id = self.tree.get(node).param("id").to_string();
            match self.block(&id) {
                Some(entry) => self.tree.set_alias(node, entry.node),
                None => {
                    return Err(self.structural(node, format!("unknown block '{}'", id)));
                }
            }
        }
        Ok(())
    }

    pub fn check_params(
        &mut self,
        node: NodeId,
        allow_unknown: bool,
        specs: &[ParamSpec],
    ) -> Result<()> {
        params::check_params(self.tree.get_mut(node), allow_unknown, specs)
    }

    /// 节点上的结构性错误
    pub fn structural(&self, node: NodeId, message: impl Into<String>) -> TemplateError {
        let node = self.tree.get(node);
        TemplateError::Structural {
            tag: node.tag().to_string(),
            file: node.file.to_string(),
            line: node.line,
            message: message.into(),
        }
    }

    pub fn parameter_error(&self, node: NodeId, message: impl Into<String>) -> TemplateError {
        let node = self.tree.get(node);
        TemplateError::ParameterType {
            tag: node.tag().to_string(),
            file: node.file.to_string(),
            line: node.line,
            message: message.into(),
        }
    }

    /// 以节点的标签名分派处理函数。
    ///
    /// OPEN 阶段若标签定义了 OPENCLOSE，则改用它并将节点标记为无需闭合。
    pub fn process(&mut self, node: NodeId, phase: Phase) -> Result<()> {
        let Some(name) = self.tree.get(node).name.clone() else {
            return Ok(());
        };
        let registry = Arc::clone(&self.registry);
        let Some(handlers) = registry.handlers(&name) else {
            let n = self.tree.get(node);
            return Err(TemplateError::UnknownTag {
                name,
                file: n.file.to_string(),
                line: n.line,
            });
        };

        let handler = match phase {
            Phase::Open => match &handlers.open_close {
                Some(h) => {
                    self.tree.get_mut(node).must_close = false;
                    Some(h)
                }
                None => handlers.open.as_ref(),
            },
            other => handlers.get(other),
        };
        match handler {
            Some(h) => h(self, node),
            None => Ok(()),
        }
    }
}
