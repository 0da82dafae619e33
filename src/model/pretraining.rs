//! Pretraining model: base encoder plus masked-word, masked-entity and
//! next-sentence heads, with the multi-task loss.
//!
//! Each supervision signal is optional. Label `-1` marks a position that was
//! not masked; only masked positions are gathered and decoded. The total loss
//! is the sum of the terms that are present, or `None` without supervision.

use burn::module::Module;
use burn::prelude::*;
use burn::tensor::activation;

use super::config::LukeConfig;
use super::heads::{EntityPredictionHead, PreTrainingHeads, TiedPredictionHead};
use super::luke::{LukeInput, LukeModel};
use crate::checkpoint::{Checkpoint, LoadReport, ParamLoader};
use crate::error::{CheckpointError, ConfigError};

/// Label value for positions that carry no supervision.
pub const IGNORE_LABEL: i64 = -1;

/// Supervision for one batch. Any subset may be present.
#[derive(Debug, Clone)]
pub struct PretrainingLabels<B: Backend> {
    /// [batch, entities]; entity ids at masked positions, `-1` elsewhere.
    pub masked_entity_labels: Option<Tensor<B, 2, Int>>,
    /// [batch, words]; word ids at masked positions, `-1` elsewhere.
    pub masked_lm_labels: Option<Tensor<B, 2, Int>>,
    /// [batch]; 1 when the second segment is a random sentence.
    pub is_random_next: Option<Tensor<B, 1, Int>>,
}

impl<B: Backend> Default for PretrainingLabels<B> {
    fn default() -> Self {
        Self {
            masked_entity_labels: None,
            masked_lm_labels: None,
            is_random_next: None,
        }
    }
}

/// Loss and accuracy counts for one objective.
#[derive(Debug, Clone)]
pub struct TaskMetrics<B: Backend> {
    /// Mean cross-entropy over the supervised positions, shape [1].
    pub loss: Tensor<B, 1>,
    /// Positions whose argmax prediction equals the label.
    pub correct: usize,
    /// Supervised positions; the batch size for next-sentence prediction.
    pub total: usize,
}

impl<B: Backend> TaskMetrics<B> {
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }

    pub fn loss_value(&self) -> f32 {
        self.loss.clone().into_data().iter::<f32>().next().unwrap_or(f32::NAN)
    }
}

#[derive(Debug, Clone)]
pub struct PretrainingOutput<B: Backend> {
    /// Sum of the present task losses; `None` when no labels were given.
    pub loss: Option<Tensor<B, 1>>,
    pub masked_entity: Option<TaskMetrics<B>>,
    pub masked_lm: Option<TaskMetrics<B>>,
    pub nsp: Option<TaskMetrics<B>>,
}

#[derive(Module, Debug)]
pub struct LukePretrainingModel<B: Backend> {
    pub luke: LukeModel<B>,
    pub cls: PreTrainingHeads<B>,
    pub entity_predictions: EntityPredictionHead<B>,
}

impl LukeConfig {
    /// Initialize the encoder together with the pretraining heads.
    pub fn init_pretraining<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<LukePretrainingModel<B>, ConfigError> {
        Ok(LukePretrainingModel {
            luke: self.init(device)?,
            cls: PreTrainingHeads::new(self, device),
            entity_predictions: TiedPredictionHead::for_entities(self, device),
        })
    }
}

impl<B: Backend> LukePretrainingModel<B> {
    pub fn forward(&self, input: LukeInput<B>, labels: PretrainingLabels<B>) -> PretrainingOutput<B> {
        let batch_size = input.words.ids.dims()[0];
        let output = self.luke.forward(input, false);
        let pooled_output = output.pooled_output.clone();
        let last = output.last_layer();

        let masked_entity = match (labels.masked_entity_labels, &last.entity) {
            (Some(labels), Some(entity_output)) => Some(self.masked_task(
                entity_output.clone(),
                labels,
                |hidden| {
                    self.entity_predictions
                        .forward(hidden, self.luke.entity_embedding_weight())
                },
            )),
            _ => None,
        };

        let masked_lm = labels.masked_lm_labels.map(|labels| {
            self.masked_task(last.word.clone(), labels, |hidden| {
                self.cls
                    .predictions
                    .forward(hidden, self.luke.word_embedding_weight())
            })
        });

        // Rows labelled -1 are left out of the loss; `total` stays the batch size.
        let nsp = labels.is_random_next.map(|targets| {
            let (rows, targets) = supervised(int_values(targets));
            let scores = self.cls.seq_relationship.forward(pooled_output);
            let metrics = score_rows(scores, rows, targets, |scores| scores);
            TaskMetrics {
                total: batch_size,
                ..metrics
            }
        });

        let mut loss: Option<Tensor<B, 1>> = None;
        for task in [&masked_entity, &masked_lm, &nsp].into_iter().flatten() {
            loss = Some(match loss {
                Some(total) => total + task.loss.clone(),
                None => task.loss.clone(),
            });
        }

        PretrainingOutput {
            loss,
            masked_entity,
            masked_lm,
            nsp,
        }
    }

    /// Gather the positions whose label is not `-1`, decode them, score them.
    ///
    /// With nothing masked the head is skipped and the loss is zero.
    fn masked_task(
        &self,
        sequence_output: Tensor<B, 3>,
        labels: Tensor<B, 2, Int>,
        decode: impl FnOnce(Tensor<B, 2>) -> Tensor<B, 2>,
    ) -> TaskMetrics<B> {
        let [batch_size, seq_len, hidden] = sequence_output.dims();
        let (positions, targets) = supervised(int_values(labels));
        let flat = sequence_output.reshape([batch_size * seq_len, hidden]);
        score_rows(flat, positions, targets, decode)
    }

    /// Word embedding table; also the masked-word decoder weight.
    pub fn word_decoder_weight(&self) -> Tensor<B, 2> {
        self.luke.word_embedding_weight()
    }

    /// Entity embedding table; also the masked-entity decoder weight.
    pub fn entity_decoder_weight(&self) -> Tensor<B, 2> {
        self.luke.entity_embedding_weight()
    }

    /// Replace parameters with entries of an external checkpoint.
    pub fn load_checkpoint(self, checkpoint: Checkpoint) -> Result<(Self, LoadReport), CheckpointError> {
        let mut loader = ParamLoader::new(checkpoint);
        let model = self.load_named(&mut loader, "")?;
        Ok((model, loader.finish("LukePretrainingModel")))
    }

    pub fn load_named(
        mut self,
        loader: &mut ParamLoader<B>,
        prefix: &str,
    ) -> Result<Self, CheckpointError> {
        // The encoder's parameters sit at the root of the checkpoint namespace.
        self.luke = self.luke.load_named(loader, prefix)?;
        self.cls = self.cls.load_named(loader, &format!("{prefix}cls."))?;
        self.entity_predictions = self
            .entity_predictions
            .load_named(loader, &format!("{prefix}entity_predictions."))?;
        Ok(self)
    }
}

/// Mean cross-entropy between logits and class targets.
/// logits: [n, classes], targets: [n]
pub fn cross_entropy_loss<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1> {
    let log_probs = activation::log_softmax(logits, 1);

    // Gather the log-prob of the target class
    let targets_2d: Tensor<B, 2, Int> = targets.unsqueeze_dim::<2>(1);
    let selected = log_probs.gather(1, targets_2d); // [n, 1]

    selected.mean().neg()
}

/// Split labels into (row index, label) for every row not marked `-1`.
fn supervised(labels: Vec<i64>) -> (Vec<i64>, Vec<i64>) {
    labels
        .into_iter()
        .enumerate()
        .filter(|(_, label)| *label != IGNORE_LABEL)
        .map(|(i, label)| (i as i64, label))
        .unzip()
}

/// Select `rows` of `input`, map them to class scores and score them against `targets`.
///
/// No rows: `decode` is not called and the loss is a zero scalar.
fn score_rows<B: Backend>(
    input: Tensor<B, 2>,
    rows: Vec<i64>,
    targets: Vec<i64>,
    decode: impl FnOnce(Tensor<B, 2>) -> Tensor<B, 2>,
) -> TaskMetrics<B> {
    let device = input.device();
    if rows.is_empty() {
        return TaskMetrics {
            loss: Tensor::zeros([1], &device),
            correct: 0,
            total: 0,
        };
    }

    let n = rows.len();
    let index = Tensor::<B, 1, Int>::from_data(TensorData::new(rows, [n]), &device);
    let scores = decode(input.select(0, index));
    let correct = count_correct(scores.clone(), &targets);
    let targets = Tensor::<B, 1, Int>::from_data(TensorData::new(targets, [n]), &device);

    TaskMetrics {
        loss: cross_entropy_loss(scores, targets),
        correct,
        total: n,
    }
}

fn count_correct<B: Backend>(scores: Tensor<B, 2>, targets: &[i64]) -> usize {
    let predictions = int_values(scores.argmax(1).squeeze_dim::<1>(1));
    predictions
        .iter()
        .zip(targets)
        .filter(|(predicted, target)| predicted == target)
        .count()
}

fn int_values<B: Backend, const D: usize>(tensor: Tensor<B, D, Int>) -> Vec<i64> {
    tensor.into_data().iter::<i64>().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::luke::{EntityInput, WordInput};
    use burn::backend::NdArray;
    use burn::module::Param;

    type B = NdArray;

    #[test]
    fn cross_entropy_of_uniform_logits() {
        let device = Default::default();
        let logits = Tensor::<B, 2>::zeros([3, 4], &device);
        let targets = Tensor::<B, 1, Int>::from_ints([0, 1, 3], &device);
        let loss = cross_entropy_loss(logits, targets);
        let value = loss.into_data().to_vec::<f32>().unwrap()[0];
        assert!((value - 4f32.ln()).abs() < 1e-5, "loss {}", value);
    }

    #[test]
    fn cross_entropy_prefers_correct_class() {
        let device = Default::default();
        let targets = Tensor::<B, 1, Int>::from_ints([1], &device);
        let good = Tensor::<B, 2>::from_floats([[0.0, 5.0]], &device);
        let bad = Tensor::<B, 2>::from_floats([[5.0, 0.0]], &device);
        let good = cross_entropy_loss(good, targets.clone()).into_data().to_vec::<f32>().unwrap()[0];
        let bad = cross_entropy_loss(bad, targets).into_data().to_vec::<f32>().unwrap()[0];
        assert!(good < bad);
    }

    #[test]
    fn accuracy_counts() {
        let device = Default::default();
        let scores = Tensor::<B, 2>::from_floats([[0.1, 0.9], [0.8, 0.2], [0.3, 0.7]], &device);
        assert_eq!(count_correct(scores, &[1, 1, 1]), 2);
    }

    // ─── Model ────────────────────────────────────────────────────────

    fn test_config() -> LukeConfig {
        LukeConfig::new()
            .with_vocab_size(32)
            .with_entity_vocab_size(16)
            .with_hidden_size(8)
            .with_entity_emb_size(8)
            .with_num_hidden_layers(1)
            .with_num_attention_heads(2)
            .with_intermediate_size(16)
            .with_max_position_embeddings(16)
    }

    fn test_input<Bk: Backend>(device: &Bk::Device) -> LukeInput<Bk> {
        LukeInput {
            words: WordInput {
                ids: Tensor::from_ints([[2, 7, 9, 3], [2, 5, 3, 0]], device),
                segment_ids: None,
                attention_mask: Tensor::from_ints([[1, 1, 1, 1], [1, 1, 1, 0]], device),
            },
            entities: Some(EntityInput {
                ids: Tensor::from_ints([[4], [6]], device),
                position_ids: Tensor::from_ints([[[1, 2, -1]], [[1, -1, -1]]], device),
                segment_ids: None,
                attention_mask: Tensor::from_ints([[1], [1]], device),
            }),
        }
    }

    #[test]
    fn tied_heads_add_only_their_own_params() {
        let device = Default::default();
        for config in [test_config(), test_config().with_entity_emb_size(4)] {
            let model = config.init_pretraining::<B>(&device).unwrap();
            assert_eq!(model.num_params(), config.pretraining_param_estimate());
        }
    }

    #[test]
    fn no_labels_no_loss() {
        let device = Default::default();
        let model = test_config().init_pretraining::<B>(&device).unwrap();
        let output = model.forward(test_input(&device), PretrainingLabels::default());
        assert!(output.loss.is_none());
        assert!(output.masked_entity.is_none());
        assert!(output.masked_lm.is_none());
        assert!(output.nsp.is_none());
    }

    #[test]
    fn entity_labels_alone_give_entity_loss() {
        let device = Default::default();
        let model = test_config().init_pretraining::<B>(&device).unwrap();
        let labels = PretrainingLabels {
            masked_entity_labels: Some(Tensor::from_ints([[5], [-1]], &device)),
            ..Default::default()
        };
        let output = model.forward(test_input(&device), labels);
        let entity = output.masked_entity.unwrap();
        assert_eq!(entity.total, 1);
        assert!(entity.correct <= 1);
        assert!(output.masked_lm.is_none());
        let total = output.loss.unwrap().into_data().to_vec::<f32>().unwrap()[0];
        assert!((total - entity.loss_value()).abs() < 1e-6);
    }

    #[test]
    fn nothing_masked_gives_zero_term() {
        let device = Default::default();
        let model = test_config().init_pretraining::<B>(&device).unwrap();
        let labels = PretrainingLabels {
            masked_lm_labels: Some(Tensor::from_ints([[-1, -1, -1, -1], [-1, -1, -1, -1]], &device)),
            is_random_next: Some(Tensor::from_ints([0, 1], &device)),
            ..Default::default()
        };
        let output = model.forward(test_input(&device), labels);
        let lm = output.masked_lm.unwrap();
        assert_eq!((lm.correct, lm.total), (0, 0));
        assert_eq!(lm.loss_value(), 0.0);
        let nsp = output.nsp.unwrap();
        assert_eq!(nsp.total, 2);
        let total = output.loss.unwrap().into_data().to_vec::<f32>().unwrap()[0];
        assert!((total - nsp.loss_value()).abs() < 1e-6);
    }

    #[test]
    fn word_decoder_is_tied_to_embedding_table() {
        let device = Default::default();
        let mut model = test_config().init_pretraining::<B>(&device).unwrap();
        // With a zero table the decoder sees only its zero bias: uniform logits.
        model.luke.embeddings.word_embeddings.weight =
            Param::from_tensor(Tensor::zeros([32, 8], &device));
        let labels = PretrainingLabels {
            masked_lm_labels: Some(Tensor::from_ints([[-1, 11, -1, -1], [-1, -1, 4, -1]], &device)),
            ..Default::default()
        };
        let output = model.forward(test_input(&device), labels);
        let lm = output.masked_lm.unwrap();
        assert_eq!(lm.total, 2);
        assert!((lm.loss_value() - 32f32.ln()).abs() < 1e-4);
    }

    #[test]
    fn masked_word_loss_reads_labelled_positions() {
        let device = Default::default();
        let model = test_config().init_pretraining::<B>(&device).unwrap();
        let labels = PretrainingLabels {
            masked_lm_labels: Some(Tensor::from_ints([[-1, 11, -1, -1], [-1, -1, 4, -1]], &device)),
            ..Default::default()
        };
        let lm = model
            .forward(test_input(&device), labels)
            .masked_lm
            .unwrap();
        assert_eq!(lm.total, 2);

        // Decode (sequence 0, word 1) and (sequence 1, word 2) by hand.
        let encoded = model.luke.forward(test_input(&device), false);
        let word = encoded.last_layer().word.clone();
        let rows = Tensor::cat(
            vec![
                word.clone().narrow(0, 0, 1).narrow(1, 1, 1).reshape([1, 8]),
                word.narrow(0, 1, 1).narrow(1, 2, 1).reshape([1, 8]),
            ],
            0,
        );
        let scores = model
            .cls
            .predictions
            .forward(rows, model.word_decoder_weight());

        let expected = cross_entropy_loss(scores.clone(), Tensor::from_ints([11, 4], &device));
        let expected = expected.into_data().to_vec::<f32>().unwrap()[0];
        assert!(
            (lm.loss_value() - expected).abs() < 1e-5,
            "{} vs {}",
            lm.loss_value(),
            expected
        );

        let predicted: Vec<i64> = scores.argmax(1).into_data().iter::<i64>().collect();
        let correct = predicted.iter().zip([11, 4]).filter(|(p, t)| **p == *t).count();
        assert_eq!(lm.correct, correct);
    }

    #[test]
    fn unlabelled_next_sentence_rows_are_skipped() {
        let device = Default::default();
        let model = test_config().init_pretraining::<B>(&device).unwrap();
        let labels = PretrainingLabels {
            is_random_next: Some(Tensor::from_ints([1, -1], &device)),
            ..Default::default()
        };
        let output = model.forward(test_input(&device), labels);
        let nsp = output.nsp.unwrap();
        assert_eq!(nsp.total, 2);
        assert!(nsp.correct <= 1);

        let pooled = model.luke.forward(test_input(&device), false).pooled_output;
        let scores = model.cls.seq_relationship.forward(pooled.narrow(0, 0, 1));
        let expected = cross_entropy_loss(scores, Tensor::from_ints([1], &device));
        let expected = expected.into_data().to_vec::<f32>().unwrap()[0];
        assert!((nsp.loss_value() - expected).abs() < 1e-5);

        let labels = PretrainingLabels {
            is_random_next: Some(Tensor::from_ints([-1, -1], &device)),
            ..Default::default()
        };
        let nsp = model.forward(test_input(&device), labels).nsp.unwrap();
        assert_eq!((nsp.correct, nsp.total), (0, 2));
        assert_eq!(nsp.loss_value(), 0.0);
    }

    #[test]
    fn gradient_reaches_tied_word_table() {
        use burn::backend::Autodiff;
        type A = Autodiff<NdArray>;

        let device = Default::default();
        let model = test_config().init_pretraining::<A>(&device).unwrap();
        let labels = PretrainingLabels {
            masked_lm_labels: Some(Tensor::from_ints([[-1, 11, -1, -1], [-1, -1, 4, -1]], &device)),
            masked_entity_labels: Some(Tensor::from_ints([[5], [7]], &device)),
            is_random_next: Some(Tensor::from_ints([1, 0], &device)),
        };
        let output = model.forward(test_input(&device), labels);
        let grads = output.loss.unwrap().backward();

        let word_grad = model
            .luke
            .embeddings
            .word_embeddings
            .weight
            .val()
            .grad(&grads)
            .expect("word table gradient");
        // Rows never looked up still get a gradient through the decoder.
        let row = word_grad.narrow(0, 20, 1).abs().sum().into_scalar();
        assert!(row > 0.0);
        assert!(model.entity_predictions.bias.val().grad(&grads).is_some());
    }
}
