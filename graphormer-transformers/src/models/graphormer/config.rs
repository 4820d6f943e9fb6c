use serde::{Deserialize, Serialize};

use crate::attention::MultiheadAttentionConfig;
use crate::TransformerError;

/// Graphormer encoder layer configuration.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct GraphEncoderLayerConfig {
    pub activation_dropout: f64,
    pub activation_fn: String,
    pub attention_dropout: f64,
    pub dropout: f64,
    pub embedding_dim: i64,
    pub ffn_embedding_dim: i64,
    pub layer_norm_eps: f64,
    pub num_attention_heads: i64,
    pub pre_layernorm: bool,
    pub q_noise: f64,
    pub qn_block_size: i64,
}

impl Default for GraphEncoderLayerConfig {
    fn default() -> Self {
        GraphEncoderLayerConfig {
            activation_dropout: 0.1,
            activation_fn: "relu".to_owned(),
            attention_dropout: 0.1,
            dropout: 0.1,
            embedding_dim: 768,
            ffn_embedding_dim: 3072,
            layer_norm_eps: 1e-5,
            num_attention_heads: 8,
            pre_layernorm: false,
            q_noise: 0.0,
            qn_block_size: 8,
        }
    }
}

impl GraphEncoderLayerConfig {
    /// Check that dimensions are positive and probabilities are in *[0, 1)*.
    ///
    /// The activation function and the divisibility of the embedding size
    /// by the number of heads are checked by the modules that use them.
    pub fn validate(&self) -> Result<(), TransformerError> {
        for (name, value) in &[
            ("embedding_dim", self.embedding_dim),
            ("ffn_embedding_dim", self.ffn_embedding_dim),
            ("num_attention_heads", self.num_attention_heads),
        ] {
            if *value <= 0 {
                return Err(TransformerError::illegal_configuration(format!(
                    "{} should be larger than 0, was: {}",
                    name, value
                )));
            }
        }

        for (name, p) in &[
            ("activation_dropout", self.activation_dropout),
            ("attention_dropout", self.attention_dropout),
            ("dropout", self.dropout),
            ("q_noise", self.q_noise),
        ] {
            if !(0.0..1.0).contains(p) {
                return Err(TransformerError::illegal_configuration(format!(
                    "{} should be in [0,1), was: {}",
                    name, p
                )));
            }
        }

        Ok(())
    }
}

impl From<&GraphEncoderLayerConfig> for MultiheadAttentionConfig {
    fn from(config: &GraphEncoderLayerConfig) -> Self {
        MultiheadAttentionConfig {
            embedding_dim: config.embedding_dim,
            num_attention_heads: config.num_attention_heads,
            attention_dropout: config.attention_dropout,
            q_noise: config.q_noise,
            qn_block_size: config.qn_block_size,
        }
    }
}
