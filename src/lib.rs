pub mod artifact;
pub mod backend;
pub mod data;
pub mod error;
pub mod evaluation;
pub mod inference;
pub mod model;
pub mod module;
pub mod preflight;
pub mod training;

pub use error::{Error, Result};
