//! 标签插件

pub mod base;

pub use base::BasePlugin;
