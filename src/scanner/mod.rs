//! Folder cleanup: depth-first walker and the policy-driven cleanup engine.

pub mod cleanup;
pub mod walker;
