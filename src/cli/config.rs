use std::path::PathBuf;
use std::process;

use clap::Args;
use luke::LukeConfig;

#[derive(Args)]
pub struct ConfigArgs {
    /// Output JSON file
    #[arg(short, long)]
    pub output: PathBuf,
    /// Word vocabulary size
    #[arg(long)]
    pub vocab: Option<usize>,
    /// Entity vocabulary size
    #[arg(long)]
    pub entity_vocab: Option<usize>,
    /// Hidden width
    #[arg(long)]
    pub hidden: Option<usize>,
    /// Entity embedding width (projected to the hidden width when smaller)
    #[arg(long)]
    pub entity_emb: Option<usize>,
    /// Number of encoder layers
    #[arg(long)]
    pub layers: Option<usize>,
    /// Number of attention heads
    #[arg(long)]
    pub heads: Option<usize>,
    /// Feed-forward inner width
    #[arg(long)]
    pub intermediate: Option<usize>,
    /// Maximum word position
    #[arg(long)]
    pub max_positions: Option<usize>,
}

pub fn cmd_config(args: ConfigArgs) {
    let mut config = LukeConfig::new();
    if let Some(v) = args.vocab {
        config.vocab_size = v;
    }
    if let Some(v) = args.entity_vocab {
        config.entity_vocab_size = v;
    }
    if let Some(v) = args.hidden {
        config.hidden_size = v;
    }
    if let Some(v) = args.entity_emb {
        config.entity_emb_size = v;
    }
    if let Some(v) = args.layers {
        config.num_hidden_layers = v;
    }
    if let Some(v) = args.heads {
        config.num_attention_heads = v;
    }
    if let Some(v) = args.intermediate {
        config.intermediate_size = v;
    }
    if let Some(v) = args.max_positions {
        config.max_position_embeddings = v;
    }

    if let Err(e) = config.validate() {
        eprintln!("error: {}", e);
        process::exit(1);
    }
    if let Err(e) = config.to_file(&args.output) {
        eprintln!("error: {}", e);
        process::exit(1);
    }

    eprintln!(
        "Wrote {} (~{}M params with pretraining heads)",
        args.output.display(),
        config.pretraining_param_estimate() / 1_000_000,
    );
}
