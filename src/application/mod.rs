//! Application services: the render pipeline and cross-cutting error types.

pub mod error;
pub mod render;
