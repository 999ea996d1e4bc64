//! CLI command implementations

pub mod alerts;
pub mod nodes;
pub mod policies;
pub mod registry;
pub mod scaling;
