//! Graph transformer models.

pub mod graphormer;
pub use graphormer::{GraphEncoderLayer, GraphEncoderLayerBuilder, GraphEncoderLayerConfig};
