#![doc = include_str!(concat!(env!("OUT_DIR"), "/README_GENERATED.md"))]

pub mod error;
pub mod parser;

pub use error::CliError;
pub use parser::Cli;
