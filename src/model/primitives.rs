//! Layer constructors shared by every block: normal-initialized linear and
//! embedding layers, and layer norm with the encoder's epsilon.

use burn::nn::{
    Embedding, EmbeddingConfig, Initializer, LayerNorm, LayerNormConfig, Linear, LinearConfig,
};
use burn::prelude::*;

/// Layer norm epsilon used throughout the encoder and heads.
pub const LAYER_NORM_EPS: f64 = 1e-12;

/// Layer norm over the last dimension; scale starts at one, shift at zero.
pub fn init_layer_norm<B: Backend>(d_model: usize, device: &B::Device) -> LayerNorm<B> {
    LayerNormConfig::new(d_model)
        .with_epsilon(LAYER_NORM_EPS)
        .init(device)
}

// ─── Initialization ───────────────────────────────────────────────

/// Linear layer with normal weights and a zeroed bias.
pub fn init_linear<B: Backend>(
    d_input: usize,
    d_output: usize,
    bias: bool,
    initializer: &Initializer,
    device: &B::Device,
) -> Linear<B> {
    let mut linear = LinearConfig::new(d_input, d_output)
        .with_bias(bias)
        .with_initializer(initializer.clone())
        .init(device);
    if bias {
        linear.bias = Some(Initializer::Zeros.init([d_output], device));
    }
    linear
}

/// Embedding table with normal weights.
pub fn init_embedding<B: Backend>(
    n_embedding: usize,
    d_model: usize,
    initializer: &Initializer,
    device: &B::Device,
) -> Embedding<B> {
    EmbeddingConfig::new(n_embedding, d_model)
        .with_initializer(initializer.clone())
        .init(device)
}
