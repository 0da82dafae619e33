//! Encoder stack: N structurally identical, independently initialized layers.

use burn::module::Module;
use burn::prelude::*;

use super::attention::Attention;
use super::config::LukeConfig;
use super::feed_forward::{Intermediate, Output};
use crate::checkpoint::ParamLoader;
use crate::error::CheckpointError;

/// Word and entity hidden states after one layer.
#[derive(Debug, Clone)]
pub struct EncodedLayer<B: Backend> {
    /// [batch, words, hidden]
    pub word: Tensor<B, 3>,
    /// [batch, entities, hidden]; `None` for word-only input.
    pub entity: Option<Tensor<B, 3>>,
}

// ─── Layer ────────────────────────────────────────────────────────

/// Fused attention, then the same feed-forward weights applied to each stream.
#[derive(Module, Debug)]
pub struct Layer<B: Backend> {
    pub attention: Attention<B>,
    pub intermediate: Intermediate<B>,
    pub output: Output<B>,
}

impl<B: Backend> Layer<B> {
    pub fn new(config: &LukeConfig, device: &B::Device) -> Self {
        Self {
            attention: Attention::new(config, device),
            intermediate: Intermediate::new(config, device),
            output: Output::new(config, device),
        }
    }

    pub fn forward(
        &self,
        word: Tensor<B, 3>,
        entity: Option<Tensor<B, 3>>,
        mask: Tensor<B, 4>,
    ) -> EncodedLayer<B> {
        let (word_attention, entity_attention) = self.attention.forward(word, entity, mask);

        let word = self.feed_forward(word_attention);
        let entity = entity_attention.map(|hidden| self.feed_forward(hidden));
        EncodedLayer { word, entity }
    }

    fn feed_forward(&self, attention_output: Tensor<B, 3>) -> Tensor<B, 3> {
        let inner = self.intermediate.forward(attention_output.clone());
        self.output.forward(inner, attention_output)
    }

    pub fn load_named(
        mut self,
        loader: &mut ParamLoader<B>,
        prefix: &str,
    ) -> Result<Self, CheckpointError> {
        self.attention = self
            .attention
            .load_named(loader, &format!("{prefix}attention."))?;
        self.intermediate = self
            .intermediate
            .load_named(loader, &format!("{prefix}intermediate."))?;
        self.output = self.output.load_named(loader, &format!("{prefix}output."))?;
        Ok(self)
    }
}

// ─── Encoder ──────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    pub layers: Vec<Layer<B>>,
}

impl<B: Backend> Encoder<B> {
    pub fn new(config: &LukeConfig, device: &B::Device) -> Self {
        let mut layers = Vec::with_capacity(config.num_hidden_layers);
        for _ in 0..config.num_hidden_layers {
            layers.push(Layer::new(config, device));
        }
        Self { layers }
    }

    /// Run every layer in order.
    ///
    /// With `output_all_layers` the result holds one entry per layer;
    /// otherwise only the final layer's states.
    pub fn forward(
        &self,
        word: Tensor<B, 3>,
        entity: Option<Tensor<B, 3>>,
        mask: Tensor<B, 4>,
        output_all_layers: bool,
    ) -> Vec<EncodedLayer<B>> {
        let mut all_layers = Vec::new();
        let mut state = EncodedLayer { word, entity };

        for layer in &self.layers {
            state = layer.forward(state.word, state.entity, mask.clone());
            if output_all_layers {
                all_layers.push(state.clone());
            }
        }

        if !output_all_layers {
            all_layers.push(state);
        }
        all_layers
    }

    pub fn load_named(
        mut self,
        loader: &mut ParamLoader<B>,
        prefix: &str,
    ) -> Result<Self, CheckpointError> {
        let mut layers = Vec::with_capacity(self.layers.len());
        for (i, layer) in self.layers.drain(..).enumerate() {
            layers.push(layer.load_named(loader, &format!("{prefix}layer.{i}."))?);
        }
        self.layers = layers;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type B = NdArray;

    fn test_config(layers: usize) -> LukeConfig {
        LukeConfig::new()
            .with_hidden_size(8)
            .with_num_hidden_layers(layers)
            .with_num_attention_heads(2)
            .with_intermediate_size(16)
            .with_hidden_dropout_prob(0.0)
            .with_attention_probs_dropout_prob(0.0)
    }

    #[test]
    fn collects_every_layer_or_only_the_last() {
        let device = Default::default();
        let encoder = Encoder::<B>::new(&test_config(3), &device);
        let word = Tensor::<B, 3>::random([2, 4, 8], Distribution::Default, &device);
        let entity = Tensor::<B, 3>::random([2, 2, 8], Distribution::Default, &device);
        let mask = Tensor::<B, 4>::zeros([2, 1, 1, 6], &device);

        let all = encoder.forward(word.clone(), Some(entity.clone()), mask.clone(), true);
        assert_eq!(all.len(), 3);
        for layer in &all {
            assert_eq!(layer.word.dims(), [2, 4, 8]);
            assert_eq!(layer.entity.as_ref().unwrap().dims(), [2, 2, 8]);
        }

        let last = encoder.forward(word, Some(entity), mask, false);
        assert_eq!(last.len(), 1);
        let a = last[0].word.clone().into_data().to_vec::<f32>().unwrap();
        let b = all[2].word.clone().into_data().to_vec::<f32>().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn layers_are_initialized_independently() {
        let device = Default::default();
        let encoder = Encoder::<B>::new(&test_config(2), &device);
        let first = encoder.layers[0].intermediate.clone();
        let second = encoder.layers[1].intermediate.clone();
        let x = Tensor::<B, 3>::ones([1, 1, 8], &device);
        let a = first.forward(x.clone()).into_data().to_vec::<f32>().unwrap();
        let b = second.forward(x).into_data().to_vec::<f32>().unwrap();
        assert_ne!(a, b);
    }
}
