use crate::error::Result;
use crate::tpl::compiler::Compiler;
use crate::tpl::node::{Element, NodeId};
use crate::tpl::registry::Phase;
use std::collections::HashSet;

const OPEN: &str = "<?";
const CLOSE: &str = "?>";
const BOM: char = '\u{feff}';

/// 产物拼接：文本原样写入，代码片段以 `<? ?>` 包裹，相邻片段合并为一个
#[derive(Debug, Default)]
pub struct ArtifactWriter {
    out: String,
    in_code: bool,
}

impl ArtifactWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 文本中的 `<?` 会被改写为输出它的代码片段
    pub fn text(&mut self, text: &str) {
        for (i, part) in text.split(OPEN).enumerate() {
            if i > 0 {
                self.code("echo '<?';");
            }
            // 与上一段文本末尾的 `<` 相接同样会构成 `<?`
            let part = match part.strip_prefix('?') {
                Some(rest) if !self.in_code && self.out.ends_with('<') => {
                    self.code("echo '?';");
                    rest
                }
                _ => part,
            };
            if !part.is_empty() {
                self.out.push_str(part);
                self.in_code = false;
            }
        }
    }

    pub fn code(&mut self, code: &str) {
        if code.is_empty() {
            return;
        }
        if self.in_code {
            self.out.truncate(self.out.len() - CLOSE.len());
        } else {
            self.out.push_str(OPEN);
        }
        self.out.push_str(code);
        self.out.push_str(CLOSE);
        self.in_code = true;
    }

    pub fn finish(self, strip: bool) -> String {
        if strip {
            strip_utf8_and_spaces(&self.out)
        } else {
            self.out
        }
    }
}

/// 去掉首尾空白与 UTF-8 BOM
pub fn strip_utf8_and_spaces(s: &str) -> String {
    s.trim()
        .trim_start_matches(BOM)
        .trim_end_matches(BOM)
        .trim()
        .to_string()
}

/// 从根节点生成产物，每个非根节点的 RENDER 至多执行一次
pub fn generate(compiler: &mut Compiler<'_>, root: NodeId, strip: bool) -> Result<String> {
    let mut generator = Generator {
        compiler,
        rendered: HashSet::new(),
        active: Vec::new(),
        writer: ArtifactWriter::new(),
    };
    generator.emit(root)?;
    Ok(generator.writer.finish(strip))
}

struct Generator<'c, 'a> {
    compiler: &'c mut Compiler<'a>,
    rendered: HashSet<NodeId>,
    active: Vec<NodeId>,
    writer: ArtifactWriter,
}

impl Generator<'_, '_> {
    fn emit(&mut self, id: NodeId) -> Result<()> {
        let mut id = self.compiler.tree.resolve(id);
        if !self.compiler.tree.get(id).is_root && self.rendered.insert(id) {
            self.compiler.process(id, Phase::Render)?;
            id = self.compiler.tree.resolve(id);
        }
        if self.active.contains(&id) {
            return Err(self
                .compiler
                .structural(id, "block content includes itself"));
        }

        let node = self.compiler.tree.get(id);
        let prefix = node.prefix.clone();
        let body = node.body.clone();
        let suffix = node.suffix.clone();

        self.active.push(id);
        self.writer.code(&prefix);
        for element in &body {
            match element {
                Element::Text(text) => self.writer.text(text),
                Element::Code(code) => self.writer.code(code),
                Element::Node(child) => self.emit(*child)?,
            }
        }
        self.writer.code(&suffix);
        self.active.pop();
        Ok(())
    }
}
