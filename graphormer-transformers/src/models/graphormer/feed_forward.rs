use std::borrow::Borrow;

use tch::nn::{Linear, Path};
use tch::Tensor;

use crate::activations::Activation;
use crate::layers::{linear, Dropout};
use crate::models::graphormer::GraphEncoderLayerConfig;
use crate::module::{FallibleModule, FallibleModuleT};
use crate::TransformerError;

/// Position-wise feed-forward block.
///
/// Projects to the feed-forward width, applies the activation and
/// activation dropout, and projects back to the embedding width.
/// Quantization noise is not applied to these projections.
#[derive(Debug)]
pub struct FeedForward {
    activation: Activation,
    activation_dropout: Dropout,
    fc1: Linear,
    fc2: Linear,
}

impl FeedForward {
    /// Construct the feed-forward block.
    ///
    /// The projections are stored as `fc1` and `fc2` in `vs`. Fails if
    /// the configured activation function is unknown.
    pub fn new<'a>(
        vs: impl Borrow<Path<'a>>,
        config: &GraphEncoderLayerConfig,
    ) -> Result<Self, TransformerError> {
        let vs = vs.borrow();

        let activation = config.activation_fn.parse()?;

        Ok(FeedForward {
            activation,
            activation_dropout: Dropout::new(config.activation_dropout),
            fc1: linear(
                vs / "fc1",
                config.embedding_dim,
                config.ffn_embedding_dim,
            )?,
            fc2: linear(
                vs / "fc2",
                config.ffn_embedding_dim,
                config.embedding_dim,
            )?,
        })
    }

    /// The activation function of the block.
    pub fn activation(&self) -> Activation {
        self.activation
    }
}

impl FallibleModuleT for FeedForward {
    type Error = TransformerError;

    fn forward_t(&self, input: &Tensor, train: bool) -> Result<Tensor, Self::Error> {
        let hidden = input.f_linear(&self.fc1.ws, self.fc1.bs.as_ref())?;
        let hidden = self.activation.forward(&hidden)?;
        let hidden = self.activation_dropout.forward_t(&hidden, train)?;
        Ok(hidden.f_linear(&self.fc2.ws, self.fc2.bs.as_ref())?)
    }
}
