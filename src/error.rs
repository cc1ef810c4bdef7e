use thiserror::Error;

/// Represents errors that can occur while compiling or rendering a template.
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("tag({name}) file({file}:{line}): unknown tag")]
    UnknownTag {
        name: String,
        file: String,
        line: usize,
    },
    #[error(
        "tag({expected}) file({file}:{line}): mismatch opening/closing tag, expected {{/{expected}}} found {{/{found}}}"
    )]
    TagMismatch {
        expected: String,
        found: String,
        file: String,
        line: usize,
    },
    #[error("tag({tag}) file({file}:{line}): not closed")]
    UnclosedTag {
        tag: String,
        file: String,
        line: usize,
    },
    #[error("tag({tag}) file({file}:{line}): {message}")]
    MissingParameter {
        tag: String,
        file: String,
        line: usize,
        message: String,
    },
    #[error("tag({tag}) file({file}:{line}): {message}")]
    ParameterType {
        tag: String,
        file: String,
        line: usize,
        message: String,
    },
    #[error("tag({tag}) file({file}:{line}): {message}")]
    Structural {
        tag: String,
        file: String,
        line: usize,
        message: String,
    },
    #[error("tag({tag}) file({file}:{line}): template cycle {}", .chain.join(" -> "))]
    Cycle {
        tag: String,
        file: String,
        line: usize,
        chain: Vec<String>,
    },
    #[error("Can't load template artifact '{0}'")]
    ArtifactMissing(String),
    #[error("Template '{name}' out of the safe path '{root}'")]
    PathEscape { name: String, root: String },
    #[error("Template '{name}' not found at '{path}'")]
    TemplateNotFound { name: String, path: String },
    #[error("Artifact syntax error in '{template}': {message}")]
    ArtifactSyntax { template: String, message: String },
    #[error("Execution error in '{template}': {message}")]
    Execution { template: String, message: String },
    #[error("Parameter serialization error: {0}")]
    Serialize(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TemplateError>;

impl TemplateError {
    /// 出错的模板文件（仅编译期错误）
    pub fn file(&self) -> Option<&str> {
        match self {
            TemplateError::UnknownTag { file, .. }
            | TemplateError::TagMismatch { file, .. }
            | TemplateError::UnclosedTag { file, .. }
            | TemplateError::MissingParameter { file, .. }
            | TemplateError::ParameterType { file, .. }
            | TemplateError::Structural { file, .. }
            | TemplateError::Cycle { file, .. } => Some(file),
            _ => None,
        }
    }

    /// 出错的源码行号（仅编译期错误）
    pub fn line(&self) -> Option<usize> {
        match self {
            TemplateError::UnknownTag { line, .. }
            | TemplateError::TagMismatch { line, .. }
            | TemplateError::UnclosedTag { line, .. }
            | TemplateError::MissingParameter { line, .. }
            | TemplateError::ParameterType { line, .. }
            | TemplateError::Structural { line, .. }
            | TemplateError::Cycle { line, .. } => Some(*line),
            _ => None,
        }
    }
}

impl serde::ser::Error for TemplateError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        TemplateError::Serialize(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_error_format() {
        let err = TemplateError::Structural {
            tag: "else".into(),
            file: "page".into(),
            line: 3,
            message: "else must be in a if block".into(),
        };
        assert_eq!(
            err.to_string(),
            "tag(else) file(page:3): else must be in a if block"
        );
        assert_eq!(err.file(), Some("page"));
        assert_eq!(err.line(), Some(3));
    }

    #[test]
    fn test_cycle_format() {
        let err = TemplateError::Cycle {
            tag: "extends".into(),
            file: "b".into(),
            line: 1,
            chain: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(
            err.to_string(),
            "tag(extends) file(b:1): template cycle a -> b -> a"
        );
        assert!(TemplateError::ArtifactMissing("x".into()).line().is_none());
    }
}
