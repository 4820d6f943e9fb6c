use std::ops::Deref;

use tch::Tensor;

/// Tensor that is either owned or borrowed.
///
/// The input of a sub-layer is only transformed in pre-norm placement.
/// In post-norm placement the input is used as-is and does not need to
/// be copied.
pub enum CowTensor<'a> {
    Owned(Tensor),
    Borrowed(&'a Tensor),
}

impl<'a> CowTensor<'a> {
    /// Apply `f` to `tensor` if `apply` is `true`, borrow `tensor`
    /// otherwise.
    pub fn map_if<F, E>(tensor: &'a Tensor, apply: bool, f: F) -> Result<Self, E>
    where
        F: FnOnce(&Tensor) -> Result<Tensor, E>,
    {
        if apply {
            f(tensor).map(CowTensor::Owned)
        } else {
            Ok(CowTensor::Borrowed(tensor))
        }
    }
}

impl<'a> Deref for CowTensor<'a> {
    type Target = Tensor;

    fn deref(&self) -> &Self::Target {
        match self {
            CowTensor::Owned(tensor) => tensor,
            CowTensor::Borrowed(tensor) => tensor,
        }
    }
}

#[cfg(test)]
mod tests {
    use tch::{Device, Kind, Tensor};

    use super::CowTensor;
    use crate::TransformerError;

    #[test]
    fn map_if_borrows_when_not_applied() {
        let tensor = Tensor::ones([2, 3], (Kind::Float, Device::Cpu));

        let cow = CowTensor::map_if(&tensor, false, |_| -> Result<Tensor, TransformerError> {
            panic!("function applied to borrowed tensor")
        })
        .unwrap();

        match cow {
            CowTensor::Borrowed(borrowed) => assert!(std::ptr::eq(borrowed, &tensor)),
            CowTensor::Owned(_) => panic!("expected borrowed tensor"),
        }
    }

    #[test]
    fn map_if_owns_result_when_applied() {
        let tensor = Tensor::ones([2, 3], (Kind::Float, Device::Cpu));

        let cow = CowTensor::map_if(&tensor, true, |t| {
            Ok::<_, TransformerError>(t.f_mul_scalar(2.)?)
        })
        .unwrap();

        assert!(matches!(cow, CowTensor::Owned(_)));
        assert!(cow.equal(&Tensor::full([2, 3], 2., (Kind::Float, Device::Cpu))));
    }

    #[test]
    fn map_if_propagates_errors() {
        let tensor = Tensor::ones([2, 3], (Kind::Float, Device::Cpu));

        let result = CowTensor::map_if(&tensor, true, |_| {
            Err(TransformerError::IllegalConfiguration("failed".to_string()))
        });

        assert!(matches!(
            result,
            Err(TransformerError::IllegalConfiguration(_))
        ));
    }
}
