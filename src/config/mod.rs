// Re-export all items from the submodules
mod artifact_types;
mod run_config;

pub use artifact_types::{OutputKind, OutputKinds};

pub use run_config::{load_config, LayoutRewrite, RunConfig};
