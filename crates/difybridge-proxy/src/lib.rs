#![doc = include_str!(concat!(env!("OUT_DIR"), "/README_GENERATED.md"))]
#![deny(unsafe_code)]

pub mod blocking;
pub mod error;
pub mod frames;
pub mod models;
pub mod server;
pub mod stream;
pub mod transport;

pub use error::ProxyError;
pub use server::{ProxyState, create_router, serve};
pub use transport::UpstreamClient;
