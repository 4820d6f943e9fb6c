use tch::TchError;
use thiserror::Error;

/// Transformer errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransformerError {
    /// The configuration contains an invalid value.
    #[error("illegal configuration: {0}")]
    IllegalConfiguration(String),

    /// The embedding size is not a multiple of the number of attention heads.
    #[error("embedding size ({embedding_dim:?}) is not a multiple of attention heads ({num_attention_heads:?})")]
    IncorrectHiddenSize {
        /// The embedding size.
        embedding_dim: i64,

        /// The number of attention heads.
        num_attention_heads: i64,
    },

    /// The input does not have the shape `[seq_len, batch_size, embedding_dim]`.
    #[error("expected input of shape [seq_len, batch_size, {embedding_dim}], got: {shape:?}")]
    IncorrectInputShape {
        /// The embedding size of the layer.
        embedding_dim: i64,

        /// The shape of the input.
        shape: Vec<i64>,
    },

    /// The key or value of self-attention differs in shape from the query.
    #[error("self-attention query has shape {query:?}, but key or value has shape {other:?}")]
    MismatchingInputShapes { query: Vec<i64>, other: Vec<i64> },

    /// Torch error.
    #[error(transparent)]
    Tch(#[from] TchError),

    /// The activation function is unknown.
    #[error("unknown activation function: {activation:?}")]
    UnknownActivationFunction { activation: String },
}

impl TransformerError {
    pub(crate) fn illegal_configuration(message: impl Into<String>) -> Self {
        TransformerError::IllegalConfiguration(message.into())
    }

    pub(crate) fn unknown_activation_function(activation: impl Into<String>) -> Self {
        TransformerError::UnknownActivationFunction {
            activation: activation.into(),
        }
    }
}
