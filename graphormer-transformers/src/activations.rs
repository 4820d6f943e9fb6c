//! Activation functions

use std::fmt;
use std::str::FromStr;

use tch::Tensor;

use crate::module::FallibleModule;
use crate::TransformerError;

/// Activation functions of the feed-forward block.
///
/// The set of activations is closed. An activation is selected by its
/// name through [`FromStr`], which rejects unknown names. So, a layer
/// cannot be constructed with an activation that it cannot apply.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Activation {
    /// GELU activation function.
    ///
    /// GELU(x)=x Φ(x)
    ///
    /// where Φ(x) is the CDF for the Gaussian distribution.
    Gelu,

    /// Identity.
    Linear,

    /// ReLU activation function
    ///
    /// ReLU(x)=max(0,x)
    Relu,

    /// Swish/SiLU activation function.
    ///
    /// Swish(x)=x σ(x)
    Swish,

    /// Hyperbolic tangent.
    Tanh,
}

impl Activation {
    /// The name of the activation, as used in configuration files.
    pub fn name(self) -> &'static str {
        match self {
            Activation::Gelu => "gelu",
            Activation::Linear => "linear",
            Activation::Relu => "relu",
            Activation::Swish => "swish",
            Activation::Tanh => "tanh",
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Activation {
    type Err = TransformerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gelu" => Ok(Activation::Gelu),
            "linear" => Ok(Activation::Linear),
            "relu" => Ok(Activation::Relu),
            "swish" => Ok(Activation::Swish),
            "tanh" => Ok(Activation::Tanh),
            unknown => Err(TransformerError::unknown_activation_function(unknown)),
        }
    }
}

impl FallibleModule for Activation {
    type Error = TransformerError;

    fn forward(&self, input: &Tensor) -> Result<Tensor, Self::Error> {
        Ok(match self {
            Activation::Gelu => input.f_gelu("none")?,
            Activation::Linear => input.shallow_clone(),
            Activation::Relu => input.f_relu()?,
            Activation::Swish => input.f_silu()?,
            Activation::Tanh => input.f_tanh()?,
        })
    }
}
