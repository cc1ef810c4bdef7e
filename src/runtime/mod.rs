//! 产物运行时：解析编译产物并以调用参数执行

pub mod context;
pub mod expr;
pub mod program;
pub mod serializer;
pub mod value;

use crate::runtime::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub type Function = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// 产物中可调用的函数表
#[derive(Clone)]
pub struct Runtime {
    functions: HashMap<String, Function>,
}

impl Default for Runtime {
    fn default() -> Self {
        let mut rt = Runtime {
            functions: HashMap::new(),
        };
        // 翻译钩子，默认原样返回
        rt.register("_", |args| Ok(Value::Str(single_str(args, "_")?)));
        rt.register("escape", |args| {
            Ok(Value::Str(escape_html(&single_str(args, "escape")?)))
        });
        rt.register("upper", |args| {
            Ok(Value::Str(single_str(args, "upper")?.to_uppercase()))
        });
        rt.register("lower", |args| {
            Ok(Value::Str(single_str(args, "lower")?.to_lowercase()))
        });
        rt.register("count", |args| match args {
            [Value::List(l)] => Ok(Value::Int(l.len() as i64)),
            [Value::Map(m)] => Ok(Value::Int(m.len() as i64)),
            [Value::Str(s)] => Ok(Value::Int(s.chars().count() as i64)),
            [Value::Null] => Ok(Value::Int(0)),
            _ => Err("count() expects one list, map or string".into()),
        });
        rt
    }
}

impl Runtime {
    pub fn register<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.functions.insert(name.to_string(), Arc::new(f));
    }

    /// 替换翻译函数 `_`
    pub fn translator<F>(&mut self, f: F)
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.register("_", move |args| Ok(Value::Str(f(&single_str(args, "_")?))));
    }

    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, String> {
        match self.functions.get(name) {
            Some(f) => f(args),
            None => Err(format!("call to undefined function {}()", name)),
        }
    }
}

fn single_str(args: &[Value], name: &str) -> Result<String, String> {
    match args {
        [v] => v.render(),
        _ => Err(format!("{}() expects exactly one argument", name)),
    }
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins() {
        let rt = Runtime::default();
        assert_eq!(
            rt.call("escape", &[Value::from("<a href='x'>")]).unwrap(),
            Value::from("&lt;a href=&#39;x&#39;&gt;")
        );
        assert_eq!(
            rt.call("count", &[Value::from(vec![1, 2, 3])]).unwrap(),
            Value::Int(3)
        );
        assert!(rt.call("missing", &[]).is_err());
    }

    #[test]
    fn test_translator() {
        let mut rt = Runtime::default();
        assert_eq!(rt.call("_", &[Value::from("hi")]).unwrap(), Value::from("hi"));
        rt.translator(|s| format!("<{}>", s));
        assert_eq!(rt.call("_", &[Value::from("hi")]).unwrap(), Value::from("<hi>"));
    }
}
