//! Basic neural network modules.
//!
//! These are modules that are not provided by the Torch binding, or where
//! different behavior is required from the modules.

use std::borrow::Borrow;

use tch::nn::{Init, Linear, Path};
use tch::{Kind, Tensor};

use crate::module::{FallibleModule, FallibleModuleT};
use crate::TransformerError;

/// Dropout layer.
///
/// This layer zeros out random elements of a tensor with probability
/// *p*. Dropout is a form of regularization and prevents
/// co-adaptation of neurons.
#[derive(Debug)]
pub struct Dropout {
    p: f64,
}

impl Dropout {
    /// Drop out elements with probability *p*.
    pub fn new(p: f64) -> Self {
        Dropout { p }
    }
}

impl FallibleModuleT for Dropout {
    type Error = TransformerError;

    fn forward_t(&self, input: &Tensor, train: bool) -> Result<Tensor, Self::Error> {
        Ok(input.f_dropout(self.p, train)?)
    }
}

/// Layer that applies layer normalization.
#[derive(Debug)]
pub struct LayerNorm {
    eps: f64,
    normalized_shape: Vec<i64>,

    weight: Option<Tensor>,
    bias: Option<Tensor>,
}

impl LayerNorm {
    /// Construct a layer normalization layer.
    ///
    /// The mean and standard deviation are computed over the last
    /// number of dimensions with the shape defined by
    /// `normalized_shape`. If `elementwise_affine` is `True`, a
    /// learnable affine transformation of the shape
    /// `normalized_shape` is added after normalization.
    pub fn new<'a>(
        vs: impl Borrow<Path<'a>>,
        normalized_shape: impl Into<Vec<i64>>,
        eps: f64,
        elementwise_affine: bool,
    ) -> Result<Self, TransformerError> {
        let vs = vs.borrow();

        let normalized_shape = normalized_shape.into();

        let (weight, bias) = if elementwise_affine {
            (
                Some(vs.f_var("weight", &normalized_shape, Init::Const(1.))?),
                Some(vs.f_var("bias", &normalized_shape, Init::Const(0.))?),
            )
        } else {
            (None, None)
        };

        Ok(LayerNorm {
            eps,
            normalized_shape,

            weight,
            bias,
        })
    }
}

impl FallibleModule for LayerNorm {
    type Error = TransformerError;

    fn forward(&self, input: &Tensor) -> Result<Tensor, Self::Error> {
        Ok(input.f_layer_norm(
            self.normalized_shape.as_slice(),
            self.weight.as_ref(),
            self.bias.as_ref(),
            self.eps,
            false,
        )?)
    }
}

/// Linear layer with quantization noise.
///
/// During training, blocks of `block_size` consecutive input columns of
/// each weight row are zeroed out with probability *p*, the remaining
/// weights are scaled by *1 / (1 - p)* (Fan et al., 2020). Outside of
/// training, or when *p = 0*, this is a plain affine transformation.
#[derive(Debug)]
pub struct QuantNoiseLinear {
    linear: Linear,
    p: f64,
    block_size: i64,
}

impl QuantNoiseLinear {
    /// Construct a linear layer with quantization noise.
    ///
    /// The weight matrix of shape `[out_features, in_features]` is
    /// initialized with `ws_init`, the bias with zeros.
    pub fn new<'a>(
        vs: impl Borrow<Path<'a>>,
        in_features: i64,
        out_features: i64,
        ws_init: Init,
        p: f64,
        block_size: i64,
    ) -> Result<Self, TransformerError> {
        if !(0.0..1.0).contains(&p) {
            return Err(TransformerError::illegal_configuration(format!(
                "quantization noise should be in [0,1), was: {}",
                p
            )));
        }

        if p > 0. && (block_size <= 0 || in_features % block_size != 0) {
            return Err(TransformerError::illegal_configuration(format!(
                "input features ({}) must be a multiple of the quantization noise block size ({})",
                in_features, block_size
            )));
        }

        let vs = vs.borrow();

        Ok(QuantNoiseLinear {
            linear: Linear {
                ws: vs.f_var("weight", &[out_features, in_features], ws_init)?,
                bs: Some(vs.f_var("bias", &[out_features], Init::Const(0.))?),
            },
            p,
            block_size,
        })
    }

    fn noised_weight(&self) -> Result<Tensor, TransformerError> {
        let (out_features, in_features) = self.linear.ws.size2()?;
        let n_blocks = in_features / self.block_size;

        let drop_mask = Tensor::f_full(
            [out_features, n_blocks, 1],
            self.p,
            (Kind::Float, self.linear.ws.device()),
        )?
        .f_bernoulli()?
        .f_expand([out_features, n_blocks, self.block_size], false)?
        .f_reshape([out_features, in_features])?
        .f_to_kind(Kind::Bool)?;

        Ok(self
            .linear
            .ws
            .f_masked_fill(&drop_mask, 0.)?
            .f_div_scalar(1. - self.p)?)
    }
}

impl FallibleModuleT for QuantNoiseLinear {
    type Error = TransformerError;

    fn forward_t(&self, input: &Tensor, train: bool) -> Result<Tensor, Self::Error> {
        if train && self.p > 0. {
            Ok(input.f_linear(&self.noised_weight()?, self.linear.bs.as_ref())?)
        } else {
            Ok(input.f_linear(&self.linear.ws, self.linear.bs.as_ref())?)
        }
    }
}

/// Construct a linear layer that is initialized like `torch.nn.Linear`.
///
/// Weights and biases are sampled from *U(-k, k)*, where
/// *k = 1 / sqrt(in_features)*.
pub fn linear<'a>(
    vs: impl Borrow<Path<'a>>,
    in_features: i64,
    out_features: i64,
) -> Result<Linear, TransformerError> {
    let vs = vs.borrow();

    let bound = 1.0 / (in_features as f64).sqrt();
    let init = Init::Uniform {
        lo: -bound,
        up: bound,
    };

    Ok(Linear {
        ws: vs.f_var("weight", &[out_features, in_features], init)?,
        bs: Some(vs.f_var("bias", &[out_features], init)?),
    })
}

/// Xavier/Glorot uniform initialization of a weight matrix.
pub fn xavier_uniform(fan_in: i64, fan_out: i64, gain: f64) -> Init {
    let bound = gain * (6.0 / (fan_in + fan_out) as f64).sqrt();
    Init::Uniform {
        lo: -bound,
        up: bound,
    }
}
