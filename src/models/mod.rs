//! Core data models for the digest pipeline.

mod article;
mod grouped;
mod ids;

pub use article::*;
pub use grouped::*;
pub use ids::*;
