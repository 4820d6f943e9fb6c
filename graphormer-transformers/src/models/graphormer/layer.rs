use std::borrow::Borrow;

use tch::nn::Path;
use tch::Tensor;

use crate::attention::{AttentionMasks, MultiheadAttention, MultiheadAttentionConfig, SelfAttention};
use crate::cow::CowTensor;
use crate::layers::{Dropout, LayerNorm};
use crate::models::graphormer::{FeedForward, GraphEncoderLayerConfig};
use crate::module::{FallibleModule, FallibleModuleT};
use crate::traits::{LayerAttention, LayerOutput};
use crate::TransformerError;

/// Output of a Graphormer encoder layer.
#[derive(Debug)]
pub struct GraphEncoderLayerOutput {
    /// The output of the layer.
    pub output: Tensor,

    /// The attention weights of the self-attention provider.
    ///
    /// The layer does not request attention weights, so this is `None`
    /// unless the provider returns weights regardless.
    pub attention: Option<Tensor>,
}

impl LayerAttention for GraphEncoderLayerOutput {
    fn layer_attention(&self) -> Option<&Tensor> {
        self.attention.as_ref()
    }
}

impl LayerOutput for GraphEncoderLayerOutput {
    fn layer_output(&self) -> &Tensor {
        &self.output
    }
}

/// Graphormer encoder layer.
///
/// A self-attention block and a position-wise feed-forward block, each
/// with dropout, a residual connection, and layer normalization. In
/// post-norm placement, normalization is applied after the residual
/// connection. In pre-norm placement, normalization is applied to the
/// input of the attention/feed-forward module, while the residual
/// connection uses the unnormalized input of the block.
///
/// The attention provider `A` receives the graph-structural attention
/// bias; `N` is the normalization of both blocks.
#[derive(Debug)]
pub struct GraphEncoderLayer<A = MultiheadAttention, N = LayerNorm> {
    embedding_dim: i64,
    pre_layernorm: bool,

    dropout: Dropout,
    feed_forward: FeedForward,
    final_layer_norm: N,
    self_attn: A,
    self_attn_layer_norm: N,
}

impl<A, N> GraphEncoderLayer<A, N>
where
    A: SelfAttention,
    N: FallibleModule<Error = TransformerError>,
{
    /// Apply the self-attention block.
    ///
    /// Returns the output of the block and the attention weights of the
    /// attention provider.
    pub fn attention_block_t(
        &self,
        input: &Tensor,
        masks: &AttentionMasks,
        train: bool,
    ) -> Result<(Tensor, Option<Tensor>), TransformerError> {
        let hidden = CowTensor::map_if(input, self.pre_layernorm, |input| {
            self.self_attn_layer_norm.forward(input)
        })?;

        let (hidden, attention) =
            self.self_attn
                .forward_t(&hidden, &hidden, &hidden, masks, false, train)?;
        let hidden = self.dropout.forward_t(&hidden, train)?.f_add(input)?;

        let hidden = if self.pre_layernorm {
            hidden
        } else {
            self.self_attn_layer_norm.forward(&hidden)?
        };

        Ok((hidden, attention))
    }

    /// The dimensionality of the input and output representations.
    pub fn embedding_dim(&self) -> i64 {
        self.embedding_dim
    }

    /// Apply the feed-forward block.
    pub fn feed_forward_block_t(&self, input: &Tensor, train: bool) -> Result<Tensor, TransformerError> {
        let hidden = CowTensor::map_if(input, self.pre_layernorm, |input| {
            self.final_layer_norm.forward(input)
        })?;

        let hidden = self.feed_forward.forward_t(&hidden, train)?;
        let hidden = self.dropout.forward_t(&hidden, train)?.f_add(input)?;

        if self.pre_layernorm {
            Ok(hidden)
        } else {
            self.final_layer_norm.forward(&hidden)
        }
    }

    /// Apply the encoder layer.
    ///
    /// `input` has shape `[seq_len, batch_size, embedding_dim]`, the
    /// output has the same shape. `attn_bias` is added to the raw
    /// attention scores, `attn_mask` is applied to the attention scores
    /// of every sequence and `key_padding_mask` (`[batch_size, seq_len]`)
    /// marks padding positions with `true`.
    pub fn forward_t(
        &self,
        input: &Tensor,
        attn_bias: Option<&Tensor>,
        attn_mask: Option<&Tensor>,
        key_padding_mask: Option<&Tensor>,
        train: bool,
    ) -> Result<GraphEncoderLayerOutput, TransformerError> {
        let shape = input.size();
        if shape.len() != 3 || shape[2] != self.embedding_dim {
            return Err(TransformerError::IncorrectInputShape {
                embedding_dim: self.embedding_dim,
                shape,
            });
        }

        let masks = AttentionMasks {
            attn_bias,
            key_padding_mask,
            attn_mask,
        };

        let (hidden, attention) = self.attention_block_t(input, &masks, train)?;
        let output = self.feed_forward_block_t(&hidden, train)?;

        Ok(GraphEncoderLayerOutput { output, attention })
    }

    /// Returns `true` if normalization is applied before the attention and
    /// feed-forward modules.
    pub fn pre_layernorm(&self) -> bool {
        self.pre_layernorm
    }
}

/// Builder for Graphormer encoder layers.
///
/// The builder accepts an initialization function, which is called once
/// before the parameters of the layer are created. This can be used to
/// seed the random number generator for parameter initialization.
pub struct GraphEncoderLayerBuilder<'c> {
    config: &'c GraphEncoderLayerConfig,
    init_fn: Option<Box<dyn FnOnce() + 'c>>,
}

impl<'c> GraphEncoderLayerBuilder<'c> {
    pub fn new(config: &'c GraphEncoderLayerConfig) -> Self {
        GraphEncoderLayerBuilder {
            config,
            init_fn: None,
        }
    }

    /// Call `init_fn` before the parameters are created.
    pub fn init_fn(mut self, init_fn: impl FnOnce() + 'c) -> Self {
        self.init_fn = Some(Box::new(init_fn));
        self
    }

    /// Construct a layer that uses multi-head self-attention.
    pub fn build<'a>(
        self,
        vs: impl Borrow<Path<'a>>,
    ) -> Result<GraphEncoderLayer<MultiheadAttention>, TransformerError> {
        self.build_with_attention(vs, |vs, config| MultiheadAttention::new(vs, config))
    }

    /// Construct a layer with a custom self-attention provider.
    ///
    /// `attention_fn` constructs the provider from the `self_attn`
    /// sub-path and the attention hyperparameters.
    pub fn build_with_attention<'a, A, F>(
        self,
        vs: impl Borrow<Path<'a>>,
        attention_fn: F,
    ) -> Result<GraphEncoderLayer<A>, TransformerError>
    where
        A: SelfAttention,
        F: for<'p> FnOnce(Path<'p>, &MultiheadAttentionConfig) -> Result<A, TransformerError>,
    {
        if let Some(init_fn) = self.init_fn {
            init_fn();
        }

        let config = self.config;
        config.validate()?;

        let vs = vs.borrow();

        let self_attn = attention_fn(vs / "self_attn", &MultiheadAttentionConfig::from(config))?;
        let feed_forward = FeedForward::new(vs, config)?;

        let layer_norm = |name: &str| {
            LayerNorm::new(
                vs / name,
                vec![config.embedding_dim],
                config.layer_norm_eps,
                true,
            )
        };

        let layer = GraphEncoderLayer {
            embedding_dim: config.embedding_dim,
            pre_layernorm: config.pre_layernorm,

            dropout: Dropout::new(config.dropout),
            feed_forward,
            final_layer_norm: layer_norm("final_layer_norm")?,
            self_attn,
            self_attn_layer_norm: layer_norm("self_attn_layer_norm")?,
        };

        log::debug!(
            "Constructed {}-norm encoder layer: embedding_dim: {}, ffn_embedding_dim: {}, heads: {}, activation: {}",
            if config.pre_layernorm { "pre" } else { "post" },
            config.embedding_dim,
            config.ffn_embedding_dim,
            config.num_attention_heads,
            layer.feed_forward.activation(),
        );

        Ok(layer)
    }
}
