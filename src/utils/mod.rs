//! Utility module

mod error;

pub use error::{Diagnostic, Error, Result};
