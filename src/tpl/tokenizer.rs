use crate::error::{Result, TemplateError};

const LITERAL_OPEN: &str = "{literal}";
const LITERAL_CLOSE: &str = "{/literal}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Text,
    Variable,
    OpenTag,
    CloseTag,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub raw: String,
    pub line: usize,
}

impl Token {
    /// 去掉定界符后的内容：变量为 `$expr`，闭合标签为标签名，开标签为标签头
    pub fn content(&self) -> &str {
        match self.kind {
            TokenKind::Text => &self.raw,
            TokenKind::Variable | TokenKind::OpenTag => &self.raw[1..self.raw.len() - 1],
            TokenKind::CloseTag => self.raw[2..self.raw.len() - 1].trim(),
        }
    }
}

/// 切分模板源码为文本与标签 token，`{literal}` 区间整体作为文本
pub fn tokenize(source: &str, file: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut line = 1;
    let mut rest = source;
    let mut scan = 0;

    loop {
        let Some(offset) = rest[scan..].find('{') else {
            push_text(&mut tokens, rest, &mut line);
            break;
        };
        let start = scan + offset;
        let Some(end) = tag_end(&rest[start..]) else {
            scan = start + 1;
            continue;
        };
        let end = start + end;

        push_text(&mut tokens, &rest[..start], &mut line);
        let raw = &rest[start..=end];
        rest = &rest[end + 1..];
        scan = 0;

        if raw == LITERAL_OPEN {
            let Some(close) = rest.find(LITERAL_CLOSE) else {
                return Err(TemplateError::UnclosedTag {
                    tag: "literal".into(),
                    file: file.to_string(),
                    line,
                });
            };
            push_text(&mut tokens, &rest[..close], &mut line);
            rest = &rest[close + LITERAL_CLOSE.len()..];
            continue;
        }

        let kind = match raw.as_bytes()[1] {
            b'$' => TokenKind::Variable,
            b'/' => TokenKind::CloseTag,
            _ => TokenKind::OpenTag,
        };
        tokens.push(Token {
            kind,
            raw: raw.to_string(),
            line,
        });
        line += count_lines(raw);
    }
    Ok(tokens)
}

/// `{` 之后必须紧跟非空白且非 `}` 的字符，才算标签；返回 `}` 的位置
fn tag_end(s: &str) -> Option<usize> {
    let next = s[1..].chars().next()?;
    if next.is_whitespace() || next == '}' {
        return None;
    }
    s.find('}')
}

fn push_text(tokens: &mut Vec<Token>, text: &str, line: &mut usize) {
    if text.is_empty() {
        return;
    }
    tokens.push(Token {
        kind: TokenKind::Text,
        raw: text.to_string(),
        line: *line,
    });
    *line += count_lines(text);
}

fn count_lines(s: &str) -> usize {
    s.bytes().filter(|b| *b == b'\n').count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
        tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_plain_text() {
        let tokens = tokenize("hello world", "t").unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].content(), "hello world");
    }

    #[test]
    fn test_kinds_and_content() {
        let tokens = tokenize("a{if cond=$x}{$name}{/if}", "t").unwrap();
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::Text,
                TokenKind::OpenTag,
                TokenKind::Variable,
                TokenKind::CloseTag
            ]
        );
        assert_eq!(tokens[1].content(), "if cond=$x");
        assert_eq!(tokens[2].content(), "$name");
        assert_eq!(tokens[3].content(), "if");
    }

    #[test]
    fn test_braces_that_are_not_tags() {
        let tokens = tokenize("a { b } {} c{", "t").unwrap();
        let text: String = tokens.iter().map(|t| t.raw.as_str()).collect();
        assert_eq!(text, "a { b } {} c{");
        assert!(tokens.iter().all(|t| t.kind == TokenKind::Text));
    }

    #[test]
    fn test_literal_span() {
        let tokens = tokenize("x{literal}{if}{$y}{/literal}z", "t").unwrap();
        assert!(tokens.iter().all(|t| t.kind == TokenKind::Text));
        let text: String = tokens.iter().map(|t| t.raw.as_str()).collect();
        assert_eq!(text, "x{if}{$y}z");
    }

    #[test]
    fn test_unclosed_literal() {
        let err = tokenize("a\n{literal}b", "page").unwrap_err();
        match err {
            TemplateError::UnclosedTag { tag, file, line } => {
                assert_eq!(tag, "literal");
                assert_eq!(file, "page");
                assert_eq!(line, 2);
            }
            other => panic!("Expected UnclosedTag, got {:?}", other),
        }
    }

    #[test]
    fn test_line_numbers() {
        let tokens = tokenize("a\nb\n{$x}\n{literal}\n\n{/literal}{/if}", "t").unwrap();
        let var = tokens.iter().find(|t| t.kind == TokenKind::Variable).unwrap();
        assert_eq!(var.line, 3);
        let close = tokens.iter().find(|t| t.kind == TokenKind::CloseTag).unwrap();
        assert_eq!(close.line, 6);
    }
}
