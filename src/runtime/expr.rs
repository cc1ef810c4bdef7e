//! 产物代码片段的词法与表达式解析
//!
//! 产物文本由普通文本与 `<? ... ?>` 代码片段交替组成，词法器把两者统一成一个
//! token 流，语句解析见 [`crate::runtime::program`]。

use crate::runtime::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    /// 代码片段之外的原样文本
    Text(String),
    /// `?>`
    FragEnd,
    Var(String),
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Punct(&'static str),
}

const PUNCTS: &[&str] = &[
    "<=", ">=", "==", "!=", "&&", "||", "=>", "+=", "-=", "<", ">", "=", "+", "-", "*", "/",
    "%", "~", "!", ".", ",", "(", ")", "[", "]", "{", "}", ";",
];

/// 将整个产物切分为 token
pub fn tokenize(src: &str) -> Result<Vec<Tok>, String> {
    let mut out = Vec::new();
    let mut rest = src;

    while !rest.is_empty() {
        // 文本段
        let text_end = rest.find("<?").unwrap_or(rest.len());
        if text_end > 0 {
            out.push(Tok::Text(rest[..text_end].to_string()));
        }
        rest = &rest[text_end..];
        if rest.is_empty() {
            break;
        }
        rest = &rest[2..];
        rest = lex_code(rest, &mut out)?;
    }
    Ok(out)
}

/// 解析一个代码片段，返回 `?>` 之后的剩余文本
fn lex_code<'a>(mut s: &'a str, out: &mut Vec<Tok>) -> Result<&'a str, String> {
    loop {
        s = s.trim_start();
        if s.is_empty() {
            return Err("unterminated code fragment".into());
        }
        if let Some(rest) = s.strip_prefix("?>") {
            out.push(Tok::FragEnd);
            return Ok(rest);
        }

        let c = s.chars().next().unwrap_or_default();
        if c == '$' {
            let len = ident_len(&s[1..]);
            if len == 0 {
                return Err("expected variable name after '$'".into());
            }
            out.push(Tok::Var(s[1..1 + len].to_string()));
            s = &s[1 + len..];
        } else if c.is_ascii_alphabetic() || c == '_' {
            let len = ident_len(s);
            out.push(Tok::Ident(s[..len].to_string()));
            s = &s[len..];
        } else if c.is_ascii_digit() {
            let (tok, len) = lex_number(s)?;
            out.push(tok);
            s = &s[len..];
        } else if c == '\'' || c == '"' {
            let (lit, len) = lex_string(s, c)?;
            out.push(Tok::Str(lit));
            s = &s[len..];
        } else if let Some(p) = PUNCTS.iter().find(|p| s.starts_with(**p)) {
            out.push(Tok::Punct(*p));
            s = &s[p.len()..];
        } else {
            return Err(format!("unexpected character '{}'", c));
        }
    }
}

fn ident_len(s: &str) -> usize {
    s.char_indices()
        .find(|(i, c)| {
            !(c.is_ascii_alphanumeric() || *c == '_') || (*i == 0 && c.is_ascii_digit())
        })
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

fn lex_number(s: &str) -> Result<(Tok, usize), String> {
    let bytes = s.as_bytes();
    let mut end = 0;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let is_float = end + 1 < bytes.len() && bytes[end] == b'.' && bytes[end + 1].is_ascii_digit();
    if is_float {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        let v = s[..end]
            .parse::<f64>()
            .map_err(|e| format!("invalid number '{}': {}", &s[..end], e))?;
        Ok((Tok::Float(v), end))
    } else {
        let v = s[..end]
            .parse::<i64>()
            .map_err(|e| format!("invalid number '{}': {}", &s[..end], e))?;
        Ok((Tok::Int(v), end))
    }
}

fn lex_string(s: &str, quote: char) -> Result<(String, usize), String> {
    let mut lit = String::new();
    let mut chars = s.char_indices().skip(1);
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, 'n')) => lit.push('\n'),
                Some((_, 't')) => lit.push('\t'),
                Some((_, e)) => lit.push(e),
                None => break,
            },
            c if c == quote => return Ok((lit, i + c.len_utf8())),
            c => lit.push(c),
        }
    }
    Err("unterminated string literal".into())
}

/// 生成单引号字符串字面量（编译期常量折叠使用）
pub fn quote_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Lit(Value),
    Var(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

/// token 游标，语句解析与表达式解析共用
pub struct Cursor {
    toks: Vec<Tok>,
    pos: usize,
}

impl Cursor {
    pub fn new(toks: Vec<Tok>) -> Self {
        Self { toks, pos: 0 }
    }

    pub fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    pub fn next(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    pub fn is_punct(&self, p: &str) -> bool {
        matches!(self.peek(), Some(Tok::Punct(q)) if *q == p)
    }

    pub fn is_ident(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Tok::Ident(w)) if w == word)
    }

    pub fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub fn eat_ident(&mut self, word: &str) -> bool {
        if self.is_ident(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub fn expect_punct(&mut self, p: &str) -> Result<(), String> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(format!("expected '{}', found {}", p, self.describe()))
        }
    }

    pub fn expect_var(&mut self) -> Result<String, String> {
        match self.next() {
            Some(Tok::Var(v)) => Ok(v),
            other => Err(format!("expected variable, found {:?}", other)),
        }
    }

    pub fn describe(&self) -> String {
        match self.peek() {
            Some(t) => format!("{:?}", t),
            None => "end of artifact".into(),
        }
    }

    pub fn parse_expr(&mut self) -> Result<Expr, String> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;
        while self.eat_punct("||") || self.eat_ident("or") {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_cmp()?;
        while self.eat_punct("&&") || self.eat_ident("and") {
            let right = self.parse_cmp()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_cmp(&mut self) -> Result<Expr, String> {
        let left = self.parse_concat()?;
        let op = match self.peek() {
            Some(Tok::Punct("==")) => BinOp::Eq,
            Some(Tok::Punct("!=")) => BinOp::Ne,
            Some(Tok::Punct("<")) => BinOp::Lt,
            Some(Tok::Punct("<=")) => BinOp::Le,
            Some(Tok::Punct(">")) => BinOp::Gt,
            Some(Tok::Punct(">=")) => BinOp::Ge,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.parse_concat()?;
        Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
    }

    fn parse_concat(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_additive()?;
        while self.eat_punct("~") {
            let right = self.parse_additive()?;
            left = Expr::Binary(BinOp::Concat, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = if self.eat_punct("+") {
                BinOp::Add
            } else if self.eat_punct("-") {
                BinOp::Sub
            } else {
                return Ok(left);
            };
            let right = self.parse_multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.eat_punct("*") {
                BinOp::Mul
            } else if self.eat_punct("/") {
                BinOp::Div
            } else if self.eat_punct("%") {
                BinOp::Mod
            } else {
                return Ok(left);
            };
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        if self.eat_punct("!") || self.eat_ident("not") {
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        if self.eat_punct("-") {
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, String> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat_punct(".") {
                let key = match self.next() {
                    Some(Tok::Ident(name)) => name,
                    Some(Tok::Int(i)) => i.to_string(),
                    other => return Err(format!("expected member name, found {:?}", other)),
                };
                expr = Expr::Member(Box::new(expr), key);
            } else if self.eat_punct("[") {
                let index = self.parse_expr()?;
                self.expect_punct("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Tok::Var(name)) => Ok(Expr::Var(name)),
            Some(Tok::Int(i)) => Ok(Expr::Lit(Value::Int(i))),
            Some(Tok::Float(f)) => Ok(Expr::Lit(Value::Float(f))),
            Some(Tok::Str(s)) => Ok(Expr::Lit(Value::Str(s))),
            Some(Tok::Punct("(")) => {
                let inner = self.parse_expr()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            Some(Tok::Ident(word)) => match word.as_str() {
                "true" => Ok(Expr::Lit(Value::Bool(true))),
                "false" => Ok(Expr::Lit(Value::Bool(false))),
                "null" => Ok(Expr::Lit(Value::Null)),
                _ => {
                    self.expect_punct("(")?;
                    let mut args = Vec::new();
                    if !self.eat_punct(")") {
                        loop {
                            args.push(self.parse_expr()?);
                            if self.eat_punct(")") {
                                break;
                            }
                            self.expect_punct(",")?;
                        }
                    }
                    Ok(Expr::Call(word, args))
                }
            },
            other => Err(format!("unexpected token {:?} in expression", other)),
        }
    }
}

/// 解析独立表达式（供测试与宿主程序校验使用）
pub fn parse_expression(src: &str) -> Result<Expr, String> {
    let mut toks = Vec::new();
    let rest = lex_code(&format!("{} ?>", src), &mut toks)?.to_string();
    if !rest.is_empty() {
        return Err("trailing input after expression".into());
    }
    toks.pop();
    let mut cursor = Cursor::new(toks);
    let expr = cursor.parse_expr()?;
    match cursor.peek() {
        None => Ok(expr),
        Some(t) => Err(format!("unexpected token {:?} after expression", t)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_text_and_code() {
        let toks = tokenize("a<?echo $x;?>b").unwrap();
        assert_eq!(
            toks,
            vec![
                Tok::Text("a".into()),
                Tok::Ident("echo".into()),
                Tok::Var("x".into()),
                Tok::Punct(";"),
                Tok::FragEnd,
                Tok::Text("b".into()),
            ]
        );
    }

    #[test]
    fn test_string_may_contain_fragment_end() {
        let toks = tokenize("<?echo 'a?>b';?>").unwrap();
        assert_eq!(toks[1], Tok::Str("a?>b".into()));
    }

    #[test]
    fn test_unterminated_fragment() {
        assert!(tokenize("<?echo $x;").is_err());
    }

    #[test]
    fn test_precedence() {
        let e = parse_expression("1 + 2 * 3 == 7 && !$a").unwrap();
        match e {
            Expr::And(l, r) => {
                assert!(matches!(*l, Expr::Binary(BinOp::Eq, _, _)));
                assert!(matches!(*r, Expr::Not(_)));
            }
            other => panic!("Expected And, got {:?}", other),
        }
    }

    #[test]
    fn test_member_index_call() {
        let e = parse_expression("upper($user.name ~ $list[0])").unwrap();
        match e {
            Expr::Call(name, args) => {
                assert_eq!(name, "upper");
                assert_eq!(args.len(), 1);
            }
            other => panic!("Expected Call, got {:?}", other),
        }
    }

    #[test]
    fn test_float_vs_member() {
        assert_eq!(
            parse_expression("1.5").unwrap(),
            Expr::Lit(Value::Float(1.5))
        );
        assert_eq!(
            parse_expression("$a.0").unwrap(),
            Expr::Member(Box::new(Expr::Var("a".into())), "0".into())
        );
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("it's"), "'it\\'s'");
        let toks = tokenize(&format!("<?echo {};?>", quote_literal("a\\b'c"))).unwrap();
        assert_eq!(toks[1], Tok::Str("a\\b'c".into()));
    }
}
