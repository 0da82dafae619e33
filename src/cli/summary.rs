use std::path::PathBuf;
use std::process;

use burn::backend::NdArray;
use burn::module::Module;
use clap::Args;

use super::{format_count, load_config};

#[derive(Args)]
pub struct SummaryArgs {
    /// Model config JSON
    #[arg(short, long)]
    pub config: PathBuf,
}

pub fn cmd_summary(args: SummaryArgs) {
    let config = load_config(&args.config);
    let device = Default::default();
    let model = match config.init_pretraining::<NdArray>(&device) {
        Ok(model) => model,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };

    let luke = &model.luke;
    let encoder_layer = luke.encoder.layers.first().map_or(0, |l| l.num_params());
    let rows = [
        ("word embeddings", luke.embeddings.num_params()),
        ("entity embeddings", luke.entity_embeddings.num_params()),
        ("encoder layer (each)", encoder_layer),
        ("encoder", luke.encoder.num_params()),
        ("pooler", luke.pooler.num_params()),
        ("masked-word + next-sentence heads", model.cls.num_params()),
        ("masked-entity head", model.entity_predictions.num_params()),
    ];

    println!(
        "hidden {} | layers {} | heads {} (size {}) | intermediate {} | entity width {}",
        config.hidden_size,
        config.num_hidden_layers,
        config.num_attention_heads,
        config.head_size(),
        config.intermediate_size,
        config.entity_emb_size,
    );
    println!();
    for (name, count) in rows {
        println!("  {:<36} {:>15}", name, format_count(count));
    }
    println!("  {:<36} {:>15}", "encoder total", format_count(luke.num_params()));
    println!("  {:<36} {:>15}", "pretraining total", format_count(model.num_params()));
}
