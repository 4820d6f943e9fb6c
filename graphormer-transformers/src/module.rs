//! Module traits with fallible forward passes.
//!
//! Tensor operations in `tch` can fail, e.g. on shape mismatches. The
//! modules in this crate return these failures rather than panicking.

use std::fmt::Debug;

use tch::Tensor;

/// Module whose forward pass can fail and that behaves identically
/// during training and inference, such as layer normalization.
pub trait FallibleModule: Debug + Send {
    type Error;

    fn forward(&self, input: &Tensor) -> Result<Tensor, Self::Error>;
}

/// Module whose forward pass can fail and depends on whether it is
/// applied in a training step, such as dropout.
pub trait FallibleModuleT: Debug + Send {
    type Error;

    fn forward_t(&self, input: &Tensor, train: bool) -> Result<Tensor, Self::Error>;
}

/// Every mode-independent module can be used where a mode-dependent
/// module is expected.
impl<M> FallibleModuleT for M
where
    M: FallibleModule,
{
    type Error = M::Error;

    fn forward_t(&self, input: &Tensor, _train: bool) -> Result<Tensor, Self::Error> {
        self.forward(input)
    }
}
