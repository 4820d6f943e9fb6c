//! Graphormer encoder layer (Ying et al., 2021).
//!
//! A transformer encoder layer whose self-attention accepts a
//! graph-structural bias that is added to the attention scores.

mod config;
pub use config::GraphEncoderLayerConfig;

mod feed_forward;
pub use feed_forward::FeedForward;

mod layer;
pub use layer::{GraphEncoderLayer, GraphEncoderLayerBuilder, GraphEncoderLayerOutput};
