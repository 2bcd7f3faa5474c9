//! Composition root: the builder and the consumer-facing catalog.

mod builder;
mod facade;

pub use builder::{Muninn, MuninnBuilder};
pub use facade::ServerCatalog;
