//! Shared infrastructure for the CNPJ pipeline crates.

pub mod error;
pub mod logging;

pub use error::{CommonError, Result};
