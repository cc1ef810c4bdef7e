pub mod engine;
pub mod error;
pub mod loader;
pub mod options;
pub mod plugins;
pub mod runtime;
pub mod store;
pub mod tpl;

pub use engine::{Compiled, Engine};
pub use error::{Result, TemplateError};
pub use loader::{FileLoader, InMemoryLoader, Stamp, TemplateLoader};
pub use options::EngineOptions;
pub use runtime::value::{Value, to_value};
pub use store::{ArtifactStore, FileStore, MemoryStore, NullStore};
pub use tagforge_macros::template_assets;
