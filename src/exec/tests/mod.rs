//! Unit tests for the remote shell module.

mod fixtures;
mod streaming;
