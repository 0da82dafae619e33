pub mod config;
pub mod forward;
pub mod summary;

use std::path::Path;
use std::process;

use luke::LukeConfig;

/// Load and validate a model config, exiting with a message on failure.
pub fn load_config(path: &Path) -> LukeConfig {
    match LukeConfig::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    }
}

/// Group digits in threes for parameter counts.
pub fn format_count(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
