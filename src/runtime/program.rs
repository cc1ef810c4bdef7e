use crate::error::{Result, TemplateError};
use crate::runtime::Runtime;
use crate::runtime::context::Context;
use crate::runtime::expr::{BinOp, Cursor, Expr, Tok, tokenize};
use crate::runtime::value::Value;
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Text(String),
    Echo(Expr),
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        otherwise: Option<Vec<Stmt>>,
    },
    For {
        var: String,
        from: Expr,
        to: Expr,
        step: Expr,
        descending: bool,
        body: Vec<Stmt>,
    },
    Foreach {
        list: Expr,
        key: Option<String>,
        value: String,
        body: Vec<Stmt>,
    },
    BufferStart,
}

/// 解析后的产物，可被重复执行
#[derive(Debug, Clone)]
pub struct Program {
    name: String,
    body: Vec<Stmt>,
}

impl Program {
    pub fn parse(name: &str, artifact: &str) -> Result<Program> {
        let syntax = |message: String| TemplateError::ArtifactSyntax {
            template: name.to_string(),
            message,
        };
        let toks = tokenize(artifact).map_err(syntax)?;
        let mut cursor = Cursor::new(toks);
        let body = parse_block(&mut cursor).map_err(syntax)?;
        if cursor.peek().is_some() {
            return Err(syntax(format!("unexpected {}", cursor.describe())));
        }
        Ok(Program {
            name: name.to_string(),
            body,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 执行产物；参数以只读方式绑定
    pub fn execute(&self, params: &Value, runtime: &Runtime) -> Result<String> {
        let mut ctx = Context::new(params);
        let mut exec = Executor {
            runtime,
            output: vec![String::new()],
        };
        exec.run(&self.body, &mut ctx)
            .map_err(|message| TemplateError::Execution {
                template: self.name.clone(),
                message,
            })?;
        if exec.output.len() != 1 {
            return Err(TemplateError::Execution {
                template: self.name.clone(),
                message: "unbalanced output buffering".into(),
            });
        }
        Ok(exec.output.pop().unwrap_or_default())
    }
}

fn parse_block(c: &mut Cursor) -> std::result::Result<Vec<Stmt>, String> {
    let mut out = Vec::new();
    loop {
        match c.peek() {
            None => return Ok(out),
            Some(Tok::Punct("}")) => return Ok(out),
            Some(Tok::FragEnd) | Some(Tok::Punct(";")) => {
                c.next();
            }
            Some(Tok::Text(_)) => {
                if let Some(Tok::Text(t)) = c.next() {
                    out.push(Stmt::Text(t));
                }
            }
            Some(Tok::Ident(word)) => {
                let word = word.clone();
                let stmt = match word.as_str() {
                    "echo" => {
                        c.next();
                        let e = c.parse_expr()?;
                        end_statement(c)?;
                        Stmt::Echo(e)
                    }
                    "if" => parse_if(c)?,
                    "for" => parse_for(c)?,
                    "foreach" => parse_foreach(c)?,
                    "ob_start" => {
                        c.next();
                        c.expect_punct("(")?;
                        c.expect_punct(")")?;
                        end_statement(c)?;
                        Stmt::BufferStart
                    }
                    other => return Err(format!("unknown statement '{}'", other)),
                };
                out.push(stmt);
            }
            Some(_) => return Err(format!("unexpected {}", c.describe())),
        }
    }
}

fn end_statement(c: &mut Cursor) -> std::result::Result<(), String> {
    if c.eat_punct(";") || matches!(c.peek(), Some(Tok::FragEnd)) {
        Ok(())
    } else {
        Err(format!("expected ';', found {}", c.describe()))
    }
}

/// `{` body `}`，跳过两侧的片段边界
fn parse_braced(c: &mut Cursor) -> std::result::Result<Vec<Stmt>, String> {
    c.expect_punct("{")?;
    let body = parse_block(c)?;
    c.expect_punct("}")?;
    Ok(body)
}

fn parse_condition(c: &mut Cursor) -> std::result::Result<Expr, String> {
    c.expect_punct("(")?;
    let e = c.parse_expr()?;
    c.expect_punct(")")?;
    Ok(e)
}

fn parse_if(c: &mut Cursor) -> std::result::Result<Stmt, String> {
    c.eat_ident("if");
    let mut branches = vec![(parse_condition(c)?, parse_braced(c)?)];
    let mut otherwise = None;
    while c.eat_ident("else") {
        if c.eat_ident("if") {
            branches.push((parse_condition(c)?, parse_braced(c)?));
        } else {
            otherwise = Some(parse_braced(c)?);
            break;
        }
    }
    Ok(Stmt::If {
        branches,
        otherwise,
    })
}

/// `for ($i = FROM; $i <= TO; $i += STEP) {`
fn parse_for(c: &mut Cursor) -> std::result::Result<Stmt, String> {
    c.eat_ident("for");
    c.expect_punct("(")?;
    let var = c.expect_var()?;
    c.expect_punct("=")?;
    let from = c.parse_expr()?;
    c.expect_punct(";")?;
    check_loop_var(&var, &c.expect_var()?)?;
    let descending = if c.eat_punct("<=") {
        false
    } else if c.eat_punct(">=") {
        true
    } else {
        return Err(format!("expected loop bound, found {}", c.describe()));
    };
    let to = c.parse_expr()?;
    c.expect_punct(";")?;
    check_loop_var(&var, &c.expect_var()?)?;
    c.expect_punct("+=")?;
    let step = c.parse_expr()?;
    c.expect_punct(")")?;
    let body = parse_braced(c)?;
    Ok(Stmt::For {
        var,
        from,
        to,
        step,
        descending,
        body,
    })
}

fn check_loop_var(expected: &str, found: &str) -> std::result::Result<(), String> {
    if expected == found {
        Ok(())
    } else {
        Err(format!("loop variable mismatch: ${} vs ${}", expected, found))
    }
}

/// `foreach (LIST as $v) {` / `foreach (LIST as $k => $v) {`
fn parse_foreach(c: &mut Cursor) -> std::result::Result<Stmt, String> {
    c.eat_ident("foreach");
    c.expect_punct("(")?;
    let list = c.parse_expr()?;
    if !c.eat_ident("as") {
        return Err(format!("expected 'as', found {}", c.describe()));
    }
    let first = c.expect_var()?;
    let (key, value) = if c.eat_punct("=>") {
        (Some(first), c.expect_var()?)
    } else {
        (None, first)
    };
    c.expect_punct(")")?;
    let body = parse_braced(c)?;
    Ok(Stmt::Foreach {
        list,
        key,
        value,
        body,
    })
}

struct Executor<'r> {
    runtime: &'r Runtime,
    output: Vec<String>,
}

type ExecResult<T> = std::result::Result<T, String>;

impl Executor<'_> {
    fn write(&mut self, s: &str) {
        if let Some(buf) = self.output.last_mut() {
            buf.push_str(s);
        }
    }

    fn run(&mut self, stmts: &[Stmt], ctx: &mut Context) -> ExecResult<()> {
        for stmt in stmts {
            match stmt {
                Stmt::Text(t) => self.write(t),
                Stmt::Echo(e) => {
                    let v = self.eval(e, ctx)?;
                    let s = v.render()?;
                    self.write(&s);
                }
                Stmt::BufferStart => self.output.push(String::new()),
                Stmt::If {
                    branches,
                    otherwise,
                } => {
                    let mut matched = false;
                    for (cond, body) in branches {
                        if self.eval(cond, ctx)?.is_truthy() {
                            self.run(body, ctx)?;
                            matched = true;
                            break;
                        }
                    }
                    if !matched {
                        if let Some(body) = otherwise {
                            self.run(body, ctx)?;
                        }
                    }
                }
                Stmt::For {
                    var,
                    from,
                    to,
                    step,
                    descending,
                    body,
                } => {
                    let from = self.eval_int(from, ctx, "from")?;
                    let to = self.eval_int(to, ctx, "to")?;
                    let step = self.eval_int(step, ctx, "step")?;
                    if step == 0 || (step < 0) != *descending {
                        return Err(format!("invalid loop step {}", step));
                    }
                    let depth = ctx.depth();
                    let mut i = from;
                    while (!*descending && i <= to) || (*descending && i >= to) {
                        ctx.set(var, Value::Int(i));
                        self.run(body, ctx)?;
                        i = match i.checked_add(step) {
                            Some(n) => n,
                            None => break,
                        };
                    }
                    ctx.truncate(depth);
                }
                Stmt::Foreach {
                    list,
                    key,
                    value,
                    body,
                } => {
                    let items: Vec<(Value, Value)> = match self.eval(list, ctx)? {
                        Value::List(l) => l
                            .into_iter()
                            .enumerate()
                            .map(|(i, v)| (Value::Int(i as i64), v))
                            .collect(),
                        Value::Map(m) => m.into_iter().map(|(k, v)| (Value::Str(k), v)).collect(),
                        Value::Null => Vec::new(),
                        other => {
                            return Err(format!("cannot iterate over {}", other.type_name()));
                        }
                    };
                    let depth = ctx.depth();
                    for (k, v) in items {
                        if let Some(key) = key {
                            ctx.set(key, k);
                        }
                        ctx.set(value, v);
                        self.run(body, ctx)?;
                    }
                    ctx.truncate(depth);
                }
            }
        }
        Ok(())
    }

    fn eval_int(&mut self, e: &Expr, ctx: &mut Context, what: &str) -> ExecResult<i64> {
        let v = self.eval(e, ctx)?;
        v.as_i64()
            .ok_or_else(|| format!("loop {} must be an integer, got {}", what, v.type_name()))
    }

    fn eval(&mut self, e: &Expr, ctx: &mut Context) -> ExecResult<Value> {
        Ok(match e {
            Expr::Lit(v) => v.clone(),
            Expr::Var(name) => ctx.lookup(name),
            Expr::Member(base, key) => self.eval(base, ctx)?.member(key),
            Expr::Index(base, index) => {
                let base = self.eval(base, ctx)?;
                let index = self.eval(index, ctx)?;
                base.index(&index)
            }
            Expr::Not(inner) => Value::Bool(!self.eval(inner, ctx)?.is_truthy()),
            Expr::Neg(inner) => match self.eval(inner, ctx)? {
                Value::Int(i) => Value::Int(
                    i.checked_neg()
                        .ok_or_else(|| "integer overflow".to_string())?,
                ),
                other => Value::Float(-other.as_f64().ok_or_else(|| {
                    format!("cannot negate a value of type {}", other.type_name())
                })?),
            },
            Expr::And(l, r) => {
                Value::Bool(self.eval(l, ctx)?.is_truthy() && self.eval(r, ctx)?.is_truthy())
            }
            Expr::Or(l, r) => {
                Value::Bool(self.eval(l, ctx)?.is_truthy() || self.eval(r, ctx)?.is_truthy())
            }
            Expr::Binary(op, l, r) => {
                let l = self.eval(l, ctx)?;
                let r = self.eval(r, ctx)?;
                binary(*op, &l, &r)?
            }
            Expr::Call(name, args) => {
                if name == "ob_get_clean" {
                    if self.output.len() < 2 {
                        return Err("ob_get_clean() without ob_start()".into());
                    }
                    return Ok(Value::Str(self.output.pop().unwrap_or_default()));
                }
                let mut values = Vec::with_capacity(args.len());
                for a in args {
                    values.push(self.eval(a, ctx)?);
                }
                self.runtime.call(name, &values)?
            }
        })
    }
}

fn binary(op: BinOp, l: &Value, r: &Value) -> ExecResult<Value> {
    match op {
        BinOp::Concat => Ok(Value::Str(format!("{}{}", l.render()?, r.render()?))),
        BinOp::Eq => Ok(Value::Bool(loose_eq(l, r))),
        BinOp::Ne => Ok(Value::Bool(!loose_eq(l, r))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ord = compare(l, r)?;
            Ok(Value::Bool(match op {
                BinOp::Lt => ord == Ordering::Less,
                BinOp::Le => ord != Ordering::Greater,
                BinOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }))
        }
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => arithmetic(op, l, r),
    }
}

fn loose_eq(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            l.as_f64() == r.as_f64()
        }
        _ => l == r,
    }
}

fn compare(l: &Value, r: &Value) -> ExecResult<Ordering> {
    match (l, r) {
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
        _ => match (l.as_f64(), r.as_f64()) {
            (Some(a), Some(b)) => a
                .partial_cmp(&b)
                .ok_or_else(|| "cannot compare NaN".to_string()),
            _ => Err(format!(
                "cannot compare {} with {}",
                l.type_name(),
                r.type_name()
            )),
        },
    }
}

fn arithmetic(op: BinOp, l: &Value, r: &Value) -> ExecResult<Value> {
    if let (Value::Int(a), Value::Int(b)) = (l, r) {
        let (a, b) = (*a, *b);
        let v = match op {
            BinOp::Add => a.checked_add(b),
            BinOp::Sub => a.checked_sub(b),
            BinOp::Mul => a.checked_mul(b),
            BinOp::Div if b == 0 => return Err("division by zero".into()),
            BinOp::Div => match a.checked_rem(b) {
                Some(0) => a.checked_div(b),
                Some(_) => return Ok(Value::Float(a as f64 / b as f64)),
                None => None,
            },
            BinOp::Mod if b == 0 => return Err("modulo by zero".into()),
            _ => a.checked_rem(b),
        };
        return v
            .map(Value::Int)
            .ok_or_else(|| "integer overflow".to_string());
    }
    let (a, b) = match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(format!(
                "unsupported operands {} and {}",
                l.type_name(),
                r.type_name()
            ));
        }
    };
    Ok(Value::Float(match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div if b == 0.0 => return Err("division by zero".into()),
        BinOp::Div => a / b,
        _ => a % b,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::value::to_value;
    use serde::Serialize;

    fn run(artifact: &str, params: &Value) -> String {
        Program::parse("test", artifact)
            .unwrap()
            .execute(params, &Runtime::default())
            .unwrap()
    }

    #[derive(Serialize)]
    struct Args {
        name: &'static str,
        items: Vec<i32>,
        active: bool,
    }

    fn args() -> Value {
        to_value(&Args {
            name: "tom",
            items: vec![3, 4],
            active: false,
        })
        .unwrap()
    }

    #[test]
    fn test_text_only() {
        assert_eq!(run("plain text", &Value::Null), "plain text");
    }

    #[test]
    fn test_echo_and_if_chain() {
        let src = "<?if ($active) {?>on<?} else if ($name == 'tom') {?>tom<?} else {?>off<?}?>";
        assert_eq!(run(src, &args()), "tom");
    }

    #[test]
    fn test_for_inclusive() {
        let src = "<?for ($i = 0; $i <= 2; $i += 1) {?>[<?echo $i;?>]<?}?>";
        assert_eq!(run(src, &Value::Null), "[0][1][2]");
    }

    #[test]
    fn test_for_descending() {
        let src = "<?for ($i = 3; $i >= 1; $i += -1) {echo $i;}?>";
        assert_eq!(run(src, &Value::Null), "321");
    }

    #[test]
    fn test_foreach_key_value() {
        let src = "<?foreach ($items as $k => $v) {echo $k ~ '=' ~ $v ~ ';';}?>";
        assert_eq!(run(src, &args()), "0=3;1=4;");
    }

    #[test]
    fn test_buffering() {
        let src = "<?ob_start();?>abc<?echo upper(ob_get_clean());?>";
        assert_eq!(run(src, &Value::Null), "ABC");
    }

    #[test]
    fn test_loop_var_does_not_leak() {
        let src = "<?foreach ($items as $name) {}echo $name;?>";
        assert_eq!(run(src, &args()), "tom");
    }

    #[test]
    fn test_unbalanced_block() {
        assert!(matches!(
            Program::parse("x", "<?if (true) {?>a"),
            Err(TemplateError::ArtifactSyntax { .. })
        ));
    }

    #[test]
    fn test_execution_error() {
        let p = Program::parse("x", "<?echo 1 / 0;?>").unwrap();
        assert!(matches!(
            p.execute(&Value::Null, &Runtime::default()),
            Err(TemplateError::Execution { .. })
        ));
    }

    #[test]
    fn test_integer_overflow_is_an_error() {
        let params = Value::Map([("x".to_string(), Value::Int(i64::MIN))].into_iter().collect());
        for src in ["<?echo $x / -1;?>", "<?echo $x % -1;?>", "<?echo -$x;?>", "<?echo $x - 1;?>"] {
            let err = Program::parse("x", src)
                .unwrap()
                .execute(&params, &Runtime::default())
                .unwrap_err();
            match err {
                TemplateError::Execution { message, .. } => assert_eq!(message, "integer overflow"),
                other => panic!("Expected Execution, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(run("<?echo 7 / 2;?>", &Value::Null), "3.5");
        assert_eq!(run("<?echo 6 / 2 + 1;?>", &Value::Null), "4");
        assert_eq!(run("<?echo 1 < 2.5;?>", &Value::Null), "true");
    }
}
