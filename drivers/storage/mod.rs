//! Storage drivers.

pub mod block;
pub mod card;
pub mod sdmmc;
pub mod stl;

#[cfg(test)]
pub(crate) mod mock;
