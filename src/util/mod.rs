//! Filesystem helpers shared by the workspace actions.

pub mod atomic;
