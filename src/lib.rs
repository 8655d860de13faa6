//! gitsage library crate
//!
//! Interaction core of the repository explorer: the file tree, the content
//! cache, the chat orchestrator and the markdown renderer, tied together by
//! a [`session::RepoSession`]. The `gitsage` binary is a thin view over it.

pub mod backend;
pub mod chat;
pub mod config;
pub mod content;
pub mod error;
pub mod explain;
pub mod markdown;
pub mod session;
pub mod tree;
pub mod util;

#[cfg(test)]
mod testing;
