use crate::error::Result;
use crate::runtime::serializer::ValueSerializer;
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;

/// 模板运行期的值
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
}

/// 将 T: Serialize 转为 Value（拷贝传入，渲染过程不会回写调用方数据）
pub fn to_value<T: Serialize + ?Sized>(t: &T) -> Result<Value> {
    t.serialize(ValueSerializer)
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty() && s != "0",
            Value::List(l) => !l.is_empty(),
            Value::Map(m) => !m.is_empty(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::Bool(b) => Some(*b as i64),
            Value::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// 输出到模板中的文本形式；列表与字典不可直接输出
    pub fn render(&self) -> std::result::Result<String, String> {
        match self {
            Value::List(_) | Value::Map(_) => {
                Err(format!("cannot print a value of type {}", self.type_name()))
            }
            other => Ok(other.to_string()),
        }
    }

    /// 按 `.name` 取成员；列表允许数字下标
    pub fn member(&self, key: &str) -> Value {
        match self {
            Value::Map(m) => m.get(key).cloned().unwrap_or(Value::Null),
            Value::List(l) => key
                .parse::<usize>()
                .ok()
                .and_then(|i| l.get(i).cloned())
                .unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    pub fn index(&self, key: &Value) -> Value {
        match (self, key) {
            (Value::List(l), k) => k
                .as_i64()
                .and_then(|i| {
                    let i = if i < 0 { i + l.len() as i64 } else { i };
                    usize::try_from(i).ok()
                })
                .and_then(|i| l.get(i).cloned())
                .unwrap_or(Value::Null),
            (Value::Map(_), k) => self.member(&k.to_string()),
            _ => Value::Null,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(s) => f.write_str(s),
            Value::List(l) => write!(f, "[list; {}]", l.len()),
            Value::Map(m) => write!(f, "[map; {}]", m.len()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}
impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}
