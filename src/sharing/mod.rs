//! Capability tokens, shared file links and SSH client setup.

pub mod links;
pub mod ssh;
pub mod token;
