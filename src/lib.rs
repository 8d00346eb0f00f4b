//! Incremental call graph for JVM class workspaces.

pub mod classfile;
pub mod config;
pub mod error;
pub mod graph;
pub mod ir;
pub mod logging;
pub mod opcodes;
pub mod scan;
pub mod workspace;
