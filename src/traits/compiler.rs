use crate::error::Result;
use crate::grammar::{CompiledQuery, QueryState};
use crate::types::Values;

/// Translates accumulated query state into parameterized SQL for one dialect.
///
/// Implementations must be pure: the same state always compiles to the same
/// statement, and every `?` written has exactly one parameter at the same
/// position in [`CompiledQuery::params`].
pub trait QueryCompiler: Send + Sync {
    fn compile_select(&self, state: &QueryState) -> Result<CompiledQuery>;

    fn compile_insert(&self, state: &QueryState, values: &Values) -> Result<CompiledQuery>;

    fn compile_update(&self, state: &QueryState, values: &Values) -> Result<CompiledQuery>;

    fn compile_delete(&self, state: &QueryState) -> Result<CompiledQuery>;
}
