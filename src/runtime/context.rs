use crate::runtime::value::Value;

/// 执行期变量作用域：调用参数为根，循环变量压栈
pub struct Context<'a> {
    root: &'a Value,
    locals: Vec<(String, Value)>,
}

impl<'a> Context<'a> {
    pub fn new(root: &'a Value) -> Self {
        Self {
            root,
            locals: Vec::new(),
        }
    }

    pub fn push(&mut self, key: &str, value: Value) {
        self.locals.push((key.to_string(), value));
    }

    /// 覆盖最近一次压入的同名变量（循环变量逐次迭代）
    pub fn set(&mut self, key: &str, value: Value) {
        match self.locals.iter_mut().rev().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => self.push(key, value),
        }
    }

    pub fn pop(&mut self) {
        self.locals.pop();
    }

    pub fn depth(&self) -> usize {
        self.locals.len()
    }

    pub fn truncate(&mut self, depth: usize) {
        self.locals.truncate(depth);
    }

    pub fn lookup(&self, key: &str) -> Value {
        // 1. 优先查找局部变量（栈结构，从后往前查以支持遮蔽）
        if let Some((_, v)) = self.locals.iter().rev().find(|(k, _)| k == key) {
            return v.clone();
        }

        // 2. 查找根对象
        match self.root {
            Value::Map(m) => m.get(key).cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn test_lookup_simple() {
        let mut map = IndexMap::new();
        map.insert("a".to_string(), Value::Int(1));
        let root = Value::Map(map);
        let ctx = Context::new(&root);

        assert_eq!(ctx.lookup("a"), Value::Int(1));
        assert_eq!(ctx.lookup("b"), Value::Null);
    }

    #[test]
    fn test_lookup_locals_shadowing() {
        let mut map = IndexMap::new();
        map.insert("a".to_string(), Value::Int(1));
        let root = Value::Map(map);
        let mut ctx = Context::new(&root);

        ctx.push("a", Value::Int(2));
        assert_eq!(ctx.lookup("a"), Value::Int(2));
        ctx.set("a", Value::Int(3));
        assert_eq!(ctx.lookup("a"), Value::Int(3));

        ctx.pop();
        assert_eq!(ctx.lookup("a"), Value::Int(1));
    }

    #[test]
    fn test_non_map_root() {
        let root = Value::Null;
        let ctx = Context::new(&root);
        assert_eq!(ctx.lookup("x"), Value::Null);
    }
}
