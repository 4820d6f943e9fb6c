use tch::Tensor;

/// Access to the attention weights of an encoder layer.
pub trait LayerAttention {
    /// Attention weights averaged over heads, when they were computed.
    fn layer_attention(&self) -> Option<&Tensor>;
}

/// Access to the hidden representations of an encoder layer.
pub trait LayerOutput {
    /// Output of the layer, with the same shape as its input.
    fn layer_output(&self) -> &Tensor;
}
