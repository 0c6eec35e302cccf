//! File system helpers: tree walking and metadata-preserving copies.

pub mod metadata;
pub mod walker;
