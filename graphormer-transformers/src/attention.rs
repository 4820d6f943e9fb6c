//! Self-attention with graph-structural attention biases.

use std::borrow::Borrow;
use std::fmt::Debug;

use tch::nn::Path;
use tch::{Kind, Tensor};

use crate::layers::{xavier_uniform, Dropout, QuantNoiseLinear};
use crate::module::FallibleModuleT;
use crate::TransformerError;

/// Optional biases and masks that are applied to attention scores.
#[derive(Clone, Copy, Debug, Default)]
pub struct AttentionMasks<'a> {
    /// Additive bias of the raw attention scores, typically encoding
    /// graph structure (e.g. shortest-path distances).
    ///
    /// The bias must have *batch_size × num_heads × target_len ×
    /// source_len* elements, e.g. shape `[batch_size, num_heads,
    /// target_len, source_len]`.
    pub attn_bias: Option<&'a Tensor>,

    /// Mask of shape `[batch_size, source_len]`, where `true` marks
    /// padding positions that should not be attended to.
    pub key_padding_mask: Option<&'a Tensor>,

    /// Mask of shape `[target_len, source_len]` that is applied to the
    /// attention scores of every sequence and head. Floating point masks
    /// are added to the scores, in boolean masks `true` marks positions
    /// that should not be attended to.
    pub attn_mask: Option<&'a Tensor>,
}

/// Self-attention provider.
///
/// Inputs and outputs are in the `[seq_len, batch_size, embedding_dim]`
/// data layout.
pub trait SelfAttention: Debug + Send {
    /// Apply attention.
    ///
    /// Returns the attended representations, which have the same shape
    /// as `query`. Attention weights are returned when `need_weights` is
    /// `true`, otherwise `None` is returned.
    fn forward_t(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        masks: &AttentionMasks,
        need_weights: bool,
        train: bool,
    ) -> Result<(Tensor, Option<Tensor>), TransformerError>;
}

/// Multi-head attention hyperparameters.
#[derive(Clone, Copy, Debug)]
pub struct MultiheadAttentionConfig {
    pub embedding_dim: i64,
    pub num_attention_heads: i64,
    pub attention_dropout: f64,
    pub q_noise: f64,
    pub qn_block_size: i64,
}

/// Multi-head scaled dot-product self-attention.
///
/// Raw attention scores are offset by the attention bias and the
/// attention mask. Padding positions are excluded from the softmax.
#[derive(Debug)]
pub struct MultiheadAttention {
    embedding_dim: i64,
    head_dim: i64,
    num_heads: i64,
    scaling: f64,

    dropout: Dropout,
    k_proj: QuantNoiseLinear,
    out_proj: QuantNoiseLinear,
    q_proj: QuantNoiseLinear,
    v_proj: QuantNoiseLinear,
}

impl MultiheadAttention {
    pub fn new<'a>(
        vs: impl Borrow<Path<'a>>,
        config: &MultiheadAttentionConfig,
    ) -> Result<Self, TransformerError> {
        let embedding_dim = config.embedding_dim;
        let num_heads = config.num_attention_heads;

        if num_heads <= 0 || embedding_dim % num_heads != 0 {
            return Err(TransformerError::IncorrectHiddenSize {
                embedding_dim,
                num_attention_heads: num_heads,
            });
        }

        let vs = vs.borrow();

        let head_dim = embedding_dim / num_heads;

        // Initialized as a stacked query/key/value projection, hence the
        // gain of 1/sqrt(2).
        let qkv_init = xavier_uniform(embedding_dim, embedding_dim, 1. / 2f64.sqrt());
        let projection = |name: &str, init| {
            QuantNoiseLinear::new(
                vs / name,
                embedding_dim,
                embedding_dim,
                init,
                config.q_noise,
                config.qn_block_size,
            )
        };

        Ok(MultiheadAttention {
            embedding_dim,
            head_dim,
            num_heads,
            scaling: (head_dim as f64).powf(-0.5),

            dropout: Dropout::new(config.attention_dropout),
            k_proj: projection("k_proj", qkv_init)?,
            v_proj: projection("v_proj", qkv_init)?,
            q_proj: projection("q_proj", qkv_init)?,
            out_proj: projection("out_proj", xavier_uniform(embedding_dim, embedding_dim, 1.))?,
        })
    }

    /// Reshape `[seq_len, batch_size, embedding_dim]` to
    /// `[batch_size * num_heads, seq_len, head_dim]`.
    fn split_heads(&self, x: &Tensor, batch_size: i64) -> Result<Tensor, TransformerError> {
        let seq_len = x.size()[0];
        Ok(x.f_contiguous()?
            .f_view([seq_len, batch_size * self.num_heads, self.head_dim])?
            .f_transpose(0, 1)?)
    }
}

impl SelfAttention for MultiheadAttention {
    fn forward_t(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        masks: &AttentionMasks,
        need_weights: bool,
        train: bool,
    ) -> Result<(Tensor, Option<Tensor>), TransformerError> {
        let (tgt_len, batch_size, embedding_dim) = query.size3()?;
        if embedding_dim != self.embedding_dim {
            return Err(TransformerError::IncorrectInputShape {
                embedding_dim: self.embedding_dim,
                shape: query.size(),
            });
        }

        // Only self-attention is supported.
        for input in &[key, value] {
            if input.size() != query.size() {
                return Err(TransformerError::MismatchingInputShapes {
                    query: query.size(),
                    other: input.size(),
                });
            }
        }

        let src_len = tgt_len;
        let bsz_heads = batch_size * self.num_heads;

        let q = self
            .q_proj
            .forward_t(query, train)?
            .f_mul_scalar(self.scaling)?;
        let k = self.k_proj.forward_t(key, train)?;
        let v = self.v_proj.forward_t(value, train)?;

        let q = self.split_heads(&q, batch_size)?;
        let k = self.split_heads(&k, batch_size)?;
        let v = self.split_heads(&v, batch_size)?;

        // Raw attention scores: [batch_size * num_heads, tgt_len, src_len].
        let mut attn_weights = q.f_bmm(&k.f_transpose(1, 2)?)?;

        if let Some(attn_bias) = masks.attn_bias {
            attn_weights =
                attn_weights.f_add(&attn_bias.f_reshape([bsz_heads, tgt_len, src_len])?)?;
        }

        if let Some(attn_mask) = masks.attn_mask {
            let attn_mask = attn_mask.f_unsqueeze(0)?;
            attn_weights = if attn_mask.kind() == Kind::Bool {
                attn_weights.f_masked_fill(&attn_mask, f64::NEG_INFINITY)?
            } else {
                attn_weights.f_add(&attn_mask)?
            };
        }

        if let Some(key_padding_mask) = masks.key_padding_mask {
            // Expand the mask to [batch_size, 1, 1, src_len] to mask the
            // same keys for every head and query.
            let key_padding_mask = key_padding_mask
                .f_to_kind(Kind::Bool)?
                .f_unsqueeze(1)?
                .f_unsqueeze(2)?;
            attn_weights = attn_weights
                .f_view([batch_size, self.num_heads, tgt_len, src_len])?
                .f_masked_fill(&key_padding_mask, f64::NEG_INFINITY)?
                .f_view([bsz_heads, tgt_len, src_len])?;
        }

        let attn_weights = attn_weights.f_softmax(-1, Kind::Float)?;
        let attn_probs = self
            .dropout
            .forward_t(&attn_weights.f_to_kind(v.kind())?, train)?;

        let attn = attn_probs
            .f_bmm(&v)?
            .f_transpose(0, 1)?
            .f_contiguous()?
            .f_view([tgt_len, batch_size, self.embedding_dim])?;
        let attn = self.out_proj.forward_t(&attn, train)?;

        let attn_weights = if need_weights {
            // Average the weights over heads: [batch_size, tgt_len, src_len].
            Some(
                attn_weights
                    .f_view([batch_size, self.num_heads, tgt_len, src_len])?
                    .f_mean_dim(1i64, false, Kind::Float)?,
            )
        } else {
            None
        };

        Ok((attn, attn_weights))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::convert::TryInto;

    use approx::assert_abs_diff_eq;
    use maplit::btreeset;
    use ndarray::{s, Array2, ArrayD, Axis, Ix3};
    use tch::nn::VarStore;
    use tch::{Device, Kind, Tensor};
    use test_case::test_case;

    use super::{AttentionMasks, MultiheadAttention, MultiheadAttentionConfig, SelfAttention};
    use crate::TransformerError;

    fn attention_config() -> MultiheadAttentionConfig {
        MultiheadAttentionConfig {
            embedding_dim: 8,
            num_attention_heads: 2,
            attention_dropout: 0.1,
            q_noise: 0.,
            qn_block_size: 8,
        }
    }

    fn varstore_variables(vs: &VarStore) -> BTreeSet<String> {
        vs.variables()
            .into_iter()
            .map(|(k, _)| k)
            .collect::<BTreeSet<_>>()
    }

    #[test_case(Device::Cpu)]
    #[cfg_attr(cuda_test, test_case(Device::Cuda(0)))]
    fn attention_output_has_query_shape(device: Device) {
        let vs = VarStore::new(device);
        let attention = MultiheadAttention::new(vs.root(), &attention_config()).unwrap();

        let input = Tensor::randn([5, 3, 8], (Kind::Float, device));
        let (output, weights) = attention
            .forward_t(&input, &input, &input, &AttentionMasks::default(), true, false)
            .unwrap();

        assert_eq!(output.size(), &[5, 3, 8]);
        assert_eq!(weights.unwrap().size(), &[3, 5, 5]);
    }

    #[test]
    fn attention_weights_are_not_returned_when_not_needed() {
        let vs = VarStore::new(Device::Cpu);
        let attention = MultiheadAttention::new(vs.root(), &attention_config()).unwrap();

        let input = Tensor::randn([5, 3, 8], (Kind::Float, Device::Cpu));
        let (_, weights) = attention
            .forward_t(&input, &input, &input, &AttentionMasks::default(), false, false)
            .unwrap();

        assert!(weights.is_none());
    }

    #[test]
    fn attention_weights_are_distributions() {
        let vs = VarStore::new(Device::Cpu);
        let attention = MultiheadAttention::new(vs.root(), &attention_config()).unwrap();

        let input = Tensor::randn([4, 2, 8], (Kind::Float, Device::Cpu));
        let (_, weights) = attention
            .forward_t(&input, &input, &input, &AttentionMasks::default(), true, false)
            .unwrap();

        let weights: ArrayD<f32> = (&weights.unwrap()).try_into().unwrap();
        assert_abs_diff_eq!(
            weights.sum_axis(Axis(2)),
            ArrayD::<f32>::ones(vec![2, 4]),
            epsilon = 1e-5
        );
    }

    #[test]
    fn embedding_dim_must_be_a_multiple_of_heads() {
        let vs = VarStore::new(Device::Cpu);
        let config = MultiheadAttentionConfig {
            num_attention_heads: 3,
            ..attention_config()
        };

        assert!(matches!(
            MultiheadAttention::new(vs.root(), &config),
            Err(TransformerError::IncorrectHiddenSize {
                embedding_dim: 8,
                num_attention_heads: 3
            })
        ));
    }

    #[test]
    fn padding_positions_are_not_attended() {
        let vs = VarStore::new(Device::Cpu);
        let attention = MultiheadAttention::new(vs.root(), &attention_config()).unwrap();

        let input = Tensor::randn([4, 2, 8], (Kind::Float, Device::Cpu));

        // The last two positions of the second sequence are padding.
        let key_padding_mask = Tensor::from_slice(&[
            false, false, false, false, //
            false, false, true, true,
        ])
        .view([2, 4]);

        let (_, weights) = attention
            .forward_t(
                &input,
                &input,
                &input,
                &AttentionMasks {
                    key_padding_mask: Some(&key_padding_mask),
                    ..AttentionMasks::default()
                },
                true,
                false,
            )
            .unwrap();

        let weights: ArrayD<f32> = (&weights.unwrap()).try_into().unwrap();
        let weights = weights.into_dimensionality::<Ix3>().unwrap();
        let padded = weights
            .index_axis(Axis(0), 1)
            .slice(s![.., 2..])
            .to_owned();
        assert_abs_diff_eq!(padded, Array2::<f32>::zeros((4, 2)));

        // Attention in the first sequence is not affected.
        assert!(weights
            .index_axis(Axis(0), 0)
            .iter()
            .all(|&weight| weight > 0.));
    }

    #[test]
    fn negative_infinite_bias_removes_key() {
        let vs = VarStore::new(Device::Cpu);
        let attention = MultiheadAttention::new(vs.root(), &attention_config()).unwrap();

        let input = Tensor::randn([3, 1, 8], (Kind::Float, Device::Cpu));

        // Bias of shape [batch_size, num_heads, tgt_len, src_len] that
        // removes the first key for all queries and heads.
        let attn_bias = Tensor::zeros([1, 2, 3, 3], (Kind::Float, Device::Cpu));
        let _ = attn_bias.narrow(3, 0, 1).fill_(f64::NEG_INFINITY);

        let (_, weights) = attention
            .forward_t(
                &input,
                &input,
                &input,
                &AttentionMasks {
                    attn_bias: Some(&attn_bias),
                    ..AttentionMasks::default()
                },
                true,
                false,
            )
            .unwrap();

        let weights: ArrayD<f32> = (&weights.unwrap()).try_into().unwrap();
        let weights = weights.into_dimensionality::<Ix3>().unwrap();
        assert_abs_diff_eq!(
            weights.slice(s![0, .., 0]).to_owned(),
            ndarray::arr1(&[0f32, 0., 0.])
        );
    }

    #[test]
    fn boolean_attention_mask_excludes_positions() {
        let vs = VarStore::new(Device::Cpu);
        let attention = MultiheadAttention::new(vs.root(), &attention_config()).unwrap();

        let input = Tensor::randn([3, 2, 8], (Kind::Float, Device::Cpu));

        // Causal mask: position i may not attend to j > i.
        let attn_mask = Tensor::ones([3, 3], (Kind::Float, Device::Cpu))
            .triu(1)
            .to_kind(Kind::Bool);

        let (_, weights) = attention
            .forward_t(
                &input,
                &input,
                &input,
                &AttentionMasks {
                    attn_mask: Some(&attn_mask),
                    ..AttentionMasks::default()
                },
                true,
                false,
            )
            .unwrap();

        let weights: ArrayD<f32> = (&weights.unwrap()).try_into().unwrap();
        let weights = weights.into_dimensionality::<Ix3>().unwrap();
        for sequence in weights.outer_iter() {
            assert_abs_diff_eq!(sequence[[0, 1]], 0f32);
            assert_abs_diff_eq!(sequence[[0, 2]], 0f32);
            assert_abs_diff_eq!(sequence[[1, 2]], 0f32);
            assert_abs_diff_eq!(sequence[[0, 0]], 1f32, epsilon = 1e-6);
        }
    }

    fn masked_weights(
        attention: &MultiheadAttention,
        input: &Tensor,
        attn_mask: Option<&Tensor>,
    ) -> ndarray::Array3<f32> {
        let (_, weights) = attention
            .forward_t(
                input,
                input,
                input,
                &AttentionMasks {
                    attn_mask,
                    ..AttentionMasks::default()
                },
                true,
                false,
            )
            .unwrap();

        let weights: ArrayD<f32> = (&weights.unwrap()).try_into().unwrap();
        weights.into_dimensionality::<Ix3>().unwrap()
    }

    #[test]
    fn float_attention_mask_is_added_to_scores() {
        let vs = VarStore::new(Device::Cpu);
        let attention = MultiheadAttention::new(vs.root(), &attention_config()).unwrap();

        let input = Tensor::randn([3, 2, 8], (Kind::Float, Device::Cpu));

        // Remove the last key for every query.
        let attn_mask = Tensor::zeros([3, 3], (Kind::Float, Device::Cpu));
        let _ = attn_mask.narrow(1, 2, 1).fill_(f64::NEG_INFINITY);

        let weights = masked_weights(&attention, &input, Some(&attn_mask));
        assert_abs_diff_eq!(
            weights.slice(s![.., .., 2]).to_owned(),
            Array2::<f32>::zeros((2, 3))
        );
        assert_abs_diff_eq!(
            weights.sum_axis(Axis(2)),
            Array2::<f32>::ones((2, 3)),
            epsilon = 1e-5
        );
    }

    #[test]
    fn finite_float_attention_mask_shifts_weights() {
        let vs = VarStore::new(Device::Cpu);
        let attention = MultiheadAttention::new(vs.root(), &attention_config()).unwrap();

        let input = Tensor::randn([3, 2, 8], (Kind::Float, Device::Cpu));

        // Favor the first key.
        let attn_mask = Tensor::zeros([3, 3], (Kind::Float, Device::Cpu));
        let _ = attn_mask.narrow(1, 0, 1).fill_(5.);

        let unmasked = masked_weights(&attention, &input, None);
        let masked = masked_weights(&attention, &input, Some(&attn_mask));

        for (masked, unmasked) in masked
            .slice(s![.., .., 0])
            .iter()
            .zip(unmasked.slice(s![.., .., 0]).iter())
        {
            assert!(
                masked > unmasked,
                "offset did not increase weight: {} <= {}",
                masked,
                unmasked
            );
        }
    }

    #[test]
    fn key_must_have_query_shape() {
        let vs = VarStore::new(Device::Cpu);
        let attention = MultiheadAttention::new(vs.root(), &attention_config()).unwrap();

        let query = Tensor::randn([3, 2, 8], (Kind::Float, Device::Cpu));
        let key = Tensor::randn([4, 2, 8], (Kind::Float, Device::Cpu));

        match attention.forward_t(&query, &key, &key, &AttentionMasks::default(), false, false) {
            Err(TransformerError::MismatchingInputShapes { query, other }) => {
                assert_eq!(query, &[3, 2, 8]);
                assert_eq!(other, &[4, 2, 8]);
            }
            other => panic!("expected mismatching shapes error, got: {:?}", other),
        }
    }

    #[test]
    fn attention_variable_names() {
        let vs = VarStore::new(Device::Cpu);
        let _attention = MultiheadAttention::new(vs.root().sub("self_attn"), &attention_config());

        assert_eq!(
            varstore_variables(&vs),
            btreeset![
                "self_attn.k_proj.bias".to_string(),
                "self_attn.k_proj.weight".to_string(),
                "self_attn.out_proj.bias".to_string(),
                "self_attn.out_proj.weight".to_string(),
                "self_attn.q_proj.bias".to_string(),
                "self_attn.q_proj.weight".to_string(),
                "self_attn.v_proj.bias".to_string(),
                "self_attn.v_proj.weight".to_string(),
            ]
        );
    }
}
