//! # Input / Output Multiplexers
//!
//! Fan one logical consumer and one logical producer out over every usable
//! system, applying the serde table at the transport boundary.

mod consumer;
mod producer;

pub use consumer::ConsumerMultiplexer;
pub use producer::ProducerMultiplexer;
