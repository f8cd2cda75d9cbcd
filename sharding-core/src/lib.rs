//! Routing and rewriting core of a sharding SQL middleware.
//! A logic statement is analysed, routed to the actual data nodes its sharding values reach,
//! and rewritten into one executable statement and parameter list per target.

#![warn(rust_2018_idioms)]

#[macro_use]
extern crate lazy_static;

pub mod algorithm;
pub mod cache;
pub mod discovery;
pub mod handler;
pub mod parser;
pub mod rewrite;
pub mod route;
pub mod value;
