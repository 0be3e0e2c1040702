mod keyed;
mod registries;

pub use keyed::{Registry, RegistryError};
pub use registries::{EngineRegistries, LevelDescriptor};
