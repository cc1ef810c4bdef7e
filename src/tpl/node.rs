use indexmap::IndexMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// 节点句柄，只在一次编译过程内有效
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    /// 模板中的原样文本
    Text(String),
    /// 嵌入的可执行片段（不含 `<? ?>` 定界符）
    Code(String),
    Node(NodeId),
}

/// `addblock` 插入位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    After,
    Before,
    Index(i64),
}

impl FromStr for Position {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "after" => Ok(Position::After),
            "before" => Ok(Position::Before),
            n => n
                .parse::<i64>()
                .map(Position::Index)
                .map_err(|_| format!("invalid position '{}'", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub name: Option<String>,
    pub params: IndexMap<String, String>,
    alias: Option<NodeId>,
    pub prefix: String,
    pub body: Vec<Element>,
    pub suffix: String,
    pub must_close: bool,
    pub has_else: bool,
    pub parent: Option<NodeId>,
    pub file: Arc<str>,
    pub line: usize,
    pub is_root: bool,
}

impl Node {
    pub fn param(&self, key: &str) -> &str {
        self.params.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn tag(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}

/// 一次编译内的节点仓库；父子与别名关系均以句柄保存
#[derive(Debug, Default)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn create(&mut self, file: Arc<str>, line: usize) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            id,
            name: None,
            params: IndexMap::new(),
            alias: None,
            prefix: String::new(),
            body: Vec::new(),
            suffix: String::new(),
            must_close: true,
            has_else: false,
            parent: None,
            file,
            line,
            is_root: false,
        });
        id
    }

    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    /// 沿别名链找到最终节点
    pub fn resolve(&self, mut id: NodeId) -> NodeId {
        let mut steps = 0;
        while let Some(next) = self.nodes[id.0].alias {
            id = next;
            steps += 1;
            assert!(steps <= self.nodes.len(), "alias cycle through node {}", id);
        }
        id
    }

    /// 让 `from` 的所有后续操作转发到 `to`。
    ///
    /// 别名设置在 `from` 链的末端；两者已解析到同一节点时忽略，因此别名链不会成环。
    pub fn set_alias(&mut self, from: NodeId, to: NodeId) {
        let from = self.resolve(from);
        if from == self.resolve(to) {
            return;
        }
        self.nodes[from.0].alias = Some(to);
    }

    pub fn add(&mut self, id: NodeId, element: Element, position: Position) {
        let id = self.resolve(id);
        let body = &mut self.nodes[id.0].body;
        match position {
            Position::After => body.push(element),
            Position::Before => body.insert(0, element),
            Position::Index(i) => {
                let len = body.len() as i64;
                let at = if i < 0 { i + len } else { i };
                body.insert(at.clamp(0, len) as usize, element);
            }
        }
    }

    pub fn push(&mut self, id: NodeId, element: Element) {
        self.add(id, element, Position::After);
    }

    /// 清空前缀、主体与后缀
    pub fn clear(&mut self, id: NodeId) {
        let id = self.resolve(id);
        let node = &mut self.nodes[id.0];
        node.prefix.clear();
        node.body.clear();
        node.suffix.clear();
    }

    /// 主体仅由原样文本组成时返回拼接后的文本
    pub fn literal(&self, id: NodeId) -> Option<String> {
        let node = &self.nodes[self.resolve(id).0];
        let mut out = String::new();
        for element in &node.body {
            match element {
                Element::Text(t) => out.push_str(t),
                Element::Code(_) | Element::Node(_) => return None,
            }
        }
        Some(out)
    }

    /// 不触发 RENDER 的字符串形式，代码片段以 `<? ?>` 标出
    pub fn stringify(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.stringify_into(id, &mut out);
        out
    }

    fn stringify_into(&self, id: NodeId, out: &mut String) {
        let node = &self.nodes[self.resolve(id).0];
        push_code(out, &node.prefix);
        for element in &node.body {
            match element {
                Element::Text(t) => out.push_str(t),
                Element::Code(c) => push_code(out, c),
                Element::Node(child) => self.stringify_into(*child, out),
            }
        }
        push_code(out, &node.suffix);
    }

    /// 复制节点自身（前缀、主体、后缀与参数），得到一个独立的新节点；
    /// 子节点仍以句柄共享，嵌套区块的注册关系保持有效
    pub fn snapshot(&mut self, id: NodeId) -> NodeId {
        let source = self.resolve(id);
        let new_id = NodeId(self.nodes.len());
        let mut copy = self.nodes[source.0].clone();
        copy.id = new_id;
        copy.alias = None;
        self.nodes.push(copy);
        new_id
    }
}

fn push_code(out: &mut String, code: &str) {
    if !code.is_empty() {
        out.push_str("<?");
        out.push_str(code);
        out.push_str("?>");
    }
}
