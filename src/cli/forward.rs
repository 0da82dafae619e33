use std::path::PathBuf;
use std::process;

use burn::backend::wgpu::{Wgpu, WgpuDevice};
use burn::backend::NdArray;
use burn::prelude::*;
use burn::tensor::Distribution;
use clap::Args;
use tracing::info;

use luke::checkpoint::load_checkpoint;
use luke::model::embeddings::PADDING_POSITION;
use luke::model::pretraining::IGNORE_LABEL;
use luke::{EntityInput, LukeConfig, LukeInput, PretrainingLabels, TaskMetrics, WordInput};

use super::load_config;

#[derive(Args)]
pub struct ForwardArgs {
    /// Model config JSON
    #[arg(short, long)]
    pub config: PathBuf,
    /// Sequences per batch
    #[arg(long, default_value = "2")]
    pub batch: usize,
    /// Words per sequence
    #[arg(long, default_value = "16")]
    pub words: usize,
    /// Entities per sequence
    #[arg(long, default_value = "4")]
    pub entities: usize,
    /// Position slots per entity
    #[arg(long, default_value = "3")]
    pub positions: usize,
    /// Native checkpoint to load before the pass
    #[arg(long, value_name = "PATH")]
    pub checkpoint: Option<PathBuf>,
    /// Run on the GPU backend (default: CPU)
    #[arg(long)]
    pub gpu: bool,
    /// Random seed for weights and the synthetic batch
    #[arg(long, default_value = "42")]
    pub seed: u64,
}

/// Every `MASK_STRIDE`-th word (starting at 1) carries a masked-word label.
const MASK_STRIDE: usize = 7;

pub fn cmd_forward(args: ForwardArgs) {
    let config = load_config(&args.config);
    if args.batch == 0 || args.words == 0 || args.positions == 0 {
        eprintln!("error: --batch, --words and --positions must be positive");
        process::exit(1);
    }
    if args.words > config.max_position_embeddings {
        eprintln!(
            "error: {} words exceed max_position_embeddings ({})",
            args.words, config.max_position_embeddings
        );
        process::exit(1);
    }

    if args.gpu {
        run::<Wgpu>(&config, &args, &WgpuDevice::default());
    } else {
        run::<NdArray>(&config, &args, &Default::default());
    }
}

fn run<B: Backend>(config: &LukeConfig, args: &ForwardArgs, device: &B::Device) {
    B::seed(device, args.seed);

    let mut model = match config.init_pretraining::<B>(device) {
        Ok(model) => model,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };
    if let Some(path) = &args.checkpoint {
        model = match load_checkpoint(model, path, device) {
            Ok(Some(model)) => model,
            Ok(None) => {
                eprintln!("error: no checkpoint at '{}'", path.display());
                process::exit(1);
            }
            Err(e) => {
                eprintln!("error: {}", e);
                process::exit(1);
            }
        };
    }

    let (input, labels) = synthetic_batch::<B>(config, args, device);
    info!(
        batch = args.batch,
        words = args.words,
        entities = args.entities,
        "running pretraining forward pass"
    );

    let start = std::time::Instant::now();
    let output = model.forward(input, labels);
    let total = output
        .loss
        .and_then(|loss| loss.into_data().iter::<f32>().next());
    let elapsed = start.elapsed();

    report("masked entity", output.masked_entity.as_ref());
    report("masked word", output.masked_lm.as_ref());
    report("next sentence", output.nsp.as_ref());
    match total {
        Some(loss) => println!("total loss {:.4} ({:.1}ms)", loss, elapsed.as_secs_f64() * 1e3),
        None => println!("no supervision ({:.1}ms)", elapsed.as_secs_f64() * 1e3),
    }
}

fn report<B: Backend>(name: &str, metrics: Option<&TaskMetrics<B>>) {
    match metrics {
        Some(m) => println!(
            "  {:<14} loss {:.4} | acc {:.3} ({}/{})",
            name,
            m.loss_value(),
            m.accuracy(),
            m.correct,
            m.total,
        ),
        None => println!("  {:<14} (skipped)", name),
    }
}

/// Random ids with every supervision signal present.
///
/// Entity `e` spans consecutive words starting at `1 + e`; the second half of
/// each sequence is segment 1 when the config has a second segment type.
fn synthetic_batch<B: Backend>(
    config: &LukeConfig,
    args: &ForwardArgs,
    device: &B::Device,
) -> (LukeInput<B>, PretrainingLabels<B>) {
    let (b, w, e, s) = (args.batch, args.words, args.entities, args.positions);

    let word_ids = Tensor::<B, 2, Int>::random(
        [b, w],
        Distribution::Uniform(1.0, config.vocab_size as f64),
        device,
    );
    let word_host: Vec<i64> = word_ids.to_data().iter::<i64>().collect();
    let second_segment = config.type_vocab_size.min(2) as i64 - 1;
    let word_segments: Vec<i64> = (0..b * w)
        .map(|i| if i % w >= w / 2 { second_segment } else { 0 })
        .collect();

    let masked_lm: Vec<i64> = word_host
        .iter()
        .enumerate()
        .map(|(i, id)| if i % w % MASK_STRIDE == 1 { *id } else { IGNORE_LABEL })
        .collect();

    let words = WordInput {
        ids: word_ids,
        segment_ids: Some(Tensor::from_data(TensorData::new(word_segments, [b, w]), device)),
        attention_mask: Tensor::ones([b, w], device),
    };

    let mut labels = PretrainingLabels {
        masked_lm_labels: Some(Tensor::from_data(TensorData::new(masked_lm, [b, w]), device)),
        is_random_next: Some(Tensor::from_data(
            TensorData::new((0..b as i64).map(|i| i % 2).collect::<Vec<_>>(), [b]),
            device,
        )),
        ..Default::default()
    };

    if e == 0 {
        return (
            LukeInput {
                words,
                entities: None,
            },
            labels,
        );
    }

    let entity_ids = Tensor::<B, 2, Int>::random(
        [b, e],
        Distribution::Uniform(1.0, config.entity_vocab_size as f64),
        device,
    );
    let entity_host: Vec<i64> = entity_ids.to_data().iter::<i64>().collect();

    let mut positions = Vec::with_capacity(b * e * s);
    for _ in 0..b {
        for entity in 0..e {
            let start = (1 + entity) % w;
            let span = 2.min(s).min(w - start);
            for slot in 0..s {
                positions.push(if slot < span {
                    (start + slot) as i64
                } else {
                    PADDING_POSITION
                });
            }
        }
    }
    // First entity of each sequence is masked.
    let masked_entity: Vec<i64> = entity_host
        .iter()
        .enumerate()
        .map(|(i, id)| if i % e == 0 { *id } else { IGNORE_LABEL })
        .collect();

    labels.masked_entity_labels = Some(Tensor::from_data(
        TensorData::new(masked_entity, [b, e]),
        device,
    ));

    let entities = EntityInput {
        ids: entity_ids,
        position_ids: Tensor::from_data(TensorData::new(positions, [b, e, s]), device),
        segment_ids: None,
        attention_mask: Tensor::ones([b, e], device),
    };

    (
        LukeInput {
            words,
            entities: Some(entities),
        },
        labels,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(entities: usize) -> ForwardArgs {
        ForwardArgs {
            config: PathBuf::from("unused.json"),
            batch: 2,
            words: 6,
            entities,
            positions: 3,
            checkpoint: None,
            gpu: false,
            seed: 7,
        }
    }

    fn small_config() -> LukeConfig {
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

    #[test]
    fn single_segment_config_gets_only_segment_zero() {
        let device = Default::default();
        let config = small_config().with_type_vocab_size(1);
        let (input, labels) = synthetic_batch::<NdArray>(&config, &args(2), &device);

        let segments: Vec<i64> = input
            .words
            .segment_ids
            .clone()
            .expect("segments")
            .into_data()
            .iter::<i64>()
            .collect();
        assert!(segments.iter().all(|s| *s == 0));

        let model = config.init_pretraining::<NdArray>(&device).unwrap();
        let output = model.forward(input, labels);
        assert!(output.loss.is_some());
    }

    #[test]
    fn two_segment_config_splits_each_sequence() {
        let device = Default::default();
        let (input, _) = synthetic_batch::<NdArray>(&small_config(), &args(0), &device);
        assert!(input.entities.is_none());
        let segments: Vec<i64> = input
            .words
            .segment_ids
            .expect("segments")
            .into_data()
            .iter::<i64>()
            .collect();
        assert_eq!(segments, vec![0, 0, 0, 1, 1, 1, 0, 0, 0, 1, 1, 1]);
    }
}
