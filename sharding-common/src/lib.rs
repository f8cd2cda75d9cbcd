//! Shared building blocks for the sharding workspace: the error taxonomy and
//! the YAML rule configuration model.

#![warn(rust_2018_idioms)]

pub mod common;
pub mod config;
