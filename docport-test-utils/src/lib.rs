//! Shared fixtures for docport integration tests.

pub mod env;
pub mod fixtures;
pub mod temp;

pub use env::TestEnv;
pub use fixtures::{attachment, home_page, sample_catalog, DocBuilder};
pub use temp::Scratch;
