use crate::error::{Result, TemplateError};
use crate::tpl::node::Node;

/// 标签参数的取值类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// `$name` 形式的变量名
    Var,
    Int,
    Number,
    /// 原样嵌入产物的表达式，不做校验
    Expr,
    String,
    /// 区块标识
    Id,
}

#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub default: Option<&'static str>,
    pub error: Option<&'static str>,
}

impl ParamSpec {
    pub const fn required(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            default: None,
            error: None,
        }
    }

    pub const fn optional(name: &'static str, kind: ParamKind, default: &'static str) -> Self {
        Self {
            name,
            kind,
            default: Some(default),
            error: None,
        }
    }

    /// 缺失时使用的自定义错误信息
    pub const fn or_fail(mut self, message: &'static str) -> Self {
        self.error = Some(message);
        self
    }
}

/// 校验节点参数：补全默认值、检查类型，并拒绝未声明的参数（除非 `allow_unknown`）
pub fn check_params(node: &mut Node, allow_unknown: bool, specs: &[ParamSpec]) -> Result<()> {
    for spec in specs {
        match node.params.get(spec.name) {
            None => match spec.default {
                Some(default) => {
                    node.params.insert(spec.name.to_string(), default.to_string());
                }
                None => {
                    let message = spec
                        .error
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("Expected parameter '{}'", spec.name));
                    return Err(TemplateError::MissingParameter {
                        tag: node.tag().to_string(),
                        file: node.file.to_string(),
                        line: node.line,
                        message,
                    });
                }
            },
            Some(value) => {
                if let Some(expected) = type_error(spec.kind, value) {
                    return Err(TemplateError::ParameterType {
                        tag: node.tag().to_string(),
                        file: node.file.to_string(),
                        line: node.line,
                        message: format!(
                            "Parameter '{}' must be {}, got '{}'",
                            spec.name, expected, value
                        ),
                    });
                }
            }
        }
    }

    if !allow_unknown {
        let unknown: Vec<&str> = node
            .params
            .keys()
            .map(String::as_str)
            .filter(|k| !specs.iter().any(|s| s.name == *k))
            .collect();
        if !unknown.is_empty() {
            return Err(TemplateError::ParameterType {
                tag: node.tag().to_string(),
                file: node.file.to_string(),
                line: node.line,
                message: format!("One or more unknown parameters: '{}'", unknown.join(",")),
            });
        }
    }
    Ok(())
}

fn type_error(kind: ParamKind, value: &str) -> Option<&'static str> {
    let ok = match kind {
        ParamKind::Var => is_var(value),
        ParamKind::Int => value.parse::<i64>().is_ok(),
        ParamKind::Number => value.parse::<f64>().is_ok_and(f64::is_finite),
        ParamKind::Id => !value.is_empty(),
        ParamKind::Expr | ParamKind::String => true,
    };
    if ok {
        return None;
    }
    Some(match kind {
        ParamKind::Var => "a variable name",
        ParamKind::Int => "an integer",
        ParamKind::Number => "a number",
        _ => "a non-empty identifier",
    })
}

/// `$` 后接字母或下划线开头的标识符
pub fn is_var(s: &str) -> bool {
    let Some(name) = s.strip_prefix('$') else {
        return false;
    };
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tpl::node::Tree;
    use std::sync::Arc;

    fn node_with(params: &[(&str, &str)]) -> (Tree, crate::tpl::node::NodeId) {
        let mut tree = Tree::new();
        let id = tree.create(Arc::from("page"), 4);
        let node = tree.get_mut(id);
        node.name = Some("for".into());
        for (k, v) in params {
            node.params.insert(k.to_string(), v.to_string());
        }
        (tree, id)
    }

    const FOR: [ParamSpec; 4] = [
        ParamSpec::required("var", ParamKind::Var),
        ParamSpec::required("to", ParamKind::Int),
        ParamSpec::optional("from", ParamKind::Int, "0"),
        ParamSpec::optional("step", ParamKind::Int, "1"),
    ];

    #[test]
    fn test_defaults_filled() {
        let (mut tree, id) = node_with(&[("var", "$i"), ("to", "3")]);
        check_params(tree.get_mut(id), false, &FOR).unwrap();
        assert_eq!(tree.get(id).param("from"), "0");
        assert_eq!(tree.get(id).param("step"), "1");
    }

    #[test]
    fn test_missing_parameter() {
        let (mut tree, id) = node_with(&[("var", "$i")]);
        let err = check_params(tree.get_mut(id), false, &FOR).unwrap_err();
        assert!(matches!(err, TemplateError::MissingParameter { .. }));
        assert_eq!(
            err.to_string(),
            "tag(for) file(page:4): Expected parameter 'to'"
        );

        let (mut tree, id) = node_with(&[]);
        let spec = [ParamSpec::required("name", ParamKind::String).or_fail("Required name")];
        let err = check_params(tree.get_mut(id), false, &spec).unwrap_err();
        assert!(err.to_string().ends_with("Required name"));
    }

    #[test]
    fn test_type_mismatch() {
        let (mut tree, id) = node_with(&[("var", "i"), ("to", "3")]);
        let err = check_params(tree.get_mut(id), false, &FOR).unwrap_err();
        assert!(matches!(err, TemplateError::ParameterType { .. }));

        let (mut tree, id) = node_with(&[("var", "$i"), ("to", "three")]);
        assert!(check_params(tree.get_mut(id), false, &FOR).is_err());
    }

    #[test]
    fn test_unknown_parameters() {
        let (mut tree, id) = node_with(&[("var", "$i"), ("to", "3"), ("x", "1"), ("y", "2")]);
        let err = check_params(tree.get_mut(id), false, &FOR).unwrap_err();
        assert!(err.to_string().ends_with("One or more unknown parameters: 'x,y'"));

        let (mut tree, id) = node_with(&[("var", "$i"), ("to", "3"), ("x", "1")]);
        check_params(tree.get_mut(id), true, &FOR).unwrap();
    }

    #[test]
    fn test_is_var() {
        assert!(is_var("$a"));
        assert!(is_var("$_a9"));
        assert!(!is_var("$9a"));
        assert!(!is_var("$"));
        assert!(!is_var("a"));
        assert!(!is_var("$a-b"));
    }
}
