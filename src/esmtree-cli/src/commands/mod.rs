//! Command handlers

pub mod configure;
pub mod convert;
pub mod stats;
pub mod verify;

#[cfg(test)]
pub(crate) mod fixtures;
