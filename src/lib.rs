//! AppSync + Neptune: synthesizes a GraphQL API, a VPC-attached Lambda
//! resolver and a Neptune cluster into a CloudFormation cloud assembly.
//!
//! The construct logic lives in `neptune-construct`; this crate composes the
//! stack, parses configuration and writes the assembly to disk.

pub mod command;
pub mod config;
pub mod error;
pub mod output;
pub mod stack;

pub use stack::{AppsyncNeptuneStack, StackSettings};
