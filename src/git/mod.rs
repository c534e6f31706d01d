//! Git helpers driving the `git` CLI.

pub mod repo;
