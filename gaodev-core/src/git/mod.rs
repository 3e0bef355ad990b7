//! GitGateway (C2, §4.2) — wraps working-tree operations.

mod gateway;

pub use gateway::{FileStatus, GitGateway};
