mod compiler;
mod driver;
mod entity;

pub use compiler::QueryCompiler;
pub use driver::{DatabaseDriver, ExecuteOutcome};
pub use entity::Entity;
