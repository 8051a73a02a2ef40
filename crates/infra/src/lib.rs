//! Infrastructure layer: job engine, rendering, delivery, storage, config.

pub mod archive;
pub mod config;
pub mod delivery;
pub mod jobs;
pub mod render;
pub mod source;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(test)]
mod integration_tests;
