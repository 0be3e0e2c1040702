mod lookup;
mod output;
mod scope;

pub use lookup::ExecutionLookup;
pub use output::{OutputInstance, Resolver, ResolverError, ScopedOutputResolver};
pub use scope::{prepare_level_runtime_id_indices, scope_key, OutputScope};
