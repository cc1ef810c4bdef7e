//! 模板编译：词法切分、节点树构建、标签分派与产物生成

pub mod codegen;
pub mod compiler;
pub mod node;
pub mod params;
pub mod parser;
pub mod registry;
pub mod tokenizer;

pub use compiler::{BlockEntry, Compiler, ParsedTemplate};
pub use node::{Element, Node, NodeId, Position, Tree};
pub use params::{ParamKind, ParamSpec};
pub use registry::{Phase, Plugin, TagHandler, TagRegistry};
