//! Common test utilities for repo-backup end-to-end tests

#[allow(dead_code)]
pub mod fake_github;

pub use fake_github::*;
