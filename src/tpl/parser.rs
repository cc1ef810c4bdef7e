use crate::error::{Result, TemplateError};
use crate::tpl::compiler::Compiler;
use crate::tpl::node::{Element, NodeId};
use crate::tpl::registry::Phase;
use crate::tpl::tokenizer::{Token, TokenKind};
use indexmap::IndexMap;
use std::sync::Arc;

/// 将 token 流递归组装为节点树，并在开/闭标签处触发 OPEN/CLOSE
pub struct TreeBuilder<'c, 'a> {
    compiler: &'c mut Compiler<'a>,
    tokens: std::vec::IntoIter<Token>,
    file: Arc<str>,
    line: usize,
}

impl<'c, 'a> TreeBuilder<'c, 'a> {
    pub fn new(compiler: &'c mut Compiler<'a>, tokens: Vec<Token>, file: Arc<str>) -> Self {
        Self {
            compiler,
            tokens: tokens.into_iter(),
            file,
            line: 1,
        }
    }

    pub fn build(mut self, root: NodeId) -> Result<()> {
        self.process(root)
    }

    fn process(&mut self, parent: NodeId) -> Result<()> {
        while let Some(token) = self.tokens.next() {
            self.line = token.line;
            match token.kind {
                TokenKind::Text => {
                    self.compiler.tree.push(parent, Element::Text(token.raw));
                }
                TokenKind::Variable => {
                    let node = self.child(parent);
                    let n = self.compiler.tree.get_mut(node);
                    n.must_close = false;
                    n.prefix = format!("echo {};", token.content());
                    self.compiler.tree.push(parent, Element::Node(node));
                }
                TokenKind::OpenTag => {
                    let node = self.child(parent);
                    let (name, params) = parse_head(token.content()).map_err(|message| {
                        TemplateError::ParameterType {
                            tag: head_name(token.content()).to_string(),
                            file: self.file.to_string(),
                            line: self.line,
                            message,
                        }
                    })?;
                    let n = self.compiler.tree.get_mut(node);
                    n.name = Some(name);
                    n.params = params;

                    self.compiler.process(node, Phase::Open)?;
                    if self.compiler.tree.get(node).must_close {
                        self.process(node)?;
                    }
                    self.compiler.tree.push(parent, Element::Node(node));
                }
                TokenKind::CloseTag => {
                    let found = token.content();
                    let open = self.compiler.tree.get(parent);
                    if open.is_root || open.tag() != found {
                        return Err(TemplateError::TagMismatch {
                            expected: open.tag().to_string(),
                            found: found.to_string(),
                            file: self.file.to_string(),
                            line: self.line,
                        });
                    }
                    return self.compiler.process(parent, Phase::Close);
                }
            }
        }

        let open = self.compiler.tree.get(parent);
        if !open.is_root {
            return Err(TemplateError::UnclosedTag {
                tag: open.tag().to_string(),
                file: open.file.to_string(),
                line: open.line,
            });
        }
        Ok(())
    }

    fn child(&mut self, parent: NodeId) -> NodeId {
        let node = self.compiler.tree.create(self.file.clone(), self.line);
        self.compiler.tree.get_mut(node).parent = Some(parent);
        node
    }
}

fn head_name(head: &str) -> &str {
    head.split_whitespace().next().unwrap_or("")
}

/// 解析标签头 `name key=value key="quoted \" value" ...`。
///
/// 引号内支持反斜杠转义；重复的参数名以最后一次为准。
pub fn parse_head(head: &str) -> std::result::Result<(String, IndexMap<String, String>), String> {
    let head = head.trim();
    let (name, mut rest) = match head.find(char::is_whitespace) {
        Some(i) => (&head[..i], &head[i..]),
        None => (head, ""),
    };
    let mut params = IndexMap::new();

    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        let key_len = rest
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        let key = &rest[..key_len];
        if key.is_empty() || !rest[key_len..].starts_with('=') {
            return Err(format!("malformed parameter near '{}'", rest));
        }
        rest = &rest[key_len + 1..];

        let value = match rest.chars().next() {
            Some(quote @ ('"' | '\'')) => {
                let (value, consumed) = read_quoted(&rest[1..], quote)
                    .ok_or_else(|| format!("unterminated quote in parameter '{}'", key))?;
                rest = &rest[1 + consumed..];
                value
            }
            _ => {
                let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                let value = rest[..end].to_string();
                rest = &rest[end..];
                value
            }
        };
        params.shift_remove(key);
        params.insert(key.to_string(), value);
    }
    Ok((name.to_string(), params))
}

/// 读取到匹配的引号为止，返回去除转义后的值以及消耗的字节数（含结束引号）
fn read_quoted(s: &str, quote: char) -> Option<(String, usize)> {
    let mut value = String::new();
    let mut chars = s.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                if let Some((_, escaped)) = chars.next() {
                    value.push(escaped);
                }
            }
            c if c == quote => return Some((value, i + c.len_utf8())),
            c => value.push(c),
        }
    }
    None
}
