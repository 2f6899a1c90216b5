//! Development container entrypoint and image verification.
//!
//! - [`bootstrap`]: first-boot sequencing inside the container (host keys,
//!   authorized keys, terminal mode).
//! - [`verify`]: checks a built image by probing fresh instances of it.
//! - [`preflight`]: host requirements for building and verifying images.
//! - [`tools`]: pinned tool downloads baked into the images.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod preflight;
pub mod process;
pub mod tools;
pub mod verify;

pub use error::{Error, Result};
