use std::fs::OpenOptions;
use std::path::Path;

use anyhow::Context;
use env_logger::{Builder, Env, Target};

/// The terminal belongs to the dashboard, so logs only go somewhere when a
/// file is given or `RUST_LOG` asks for them explicitly.
pub fn init(log_file: Option<&Path>) -> anyhow::Result<()> {
    let mut builder = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            let mut b = Builder::from_env(Env::default().default_filter_or("info"));
            b.target(Target::Pipe(Box::new(file)));
            b
        }
        None => Builder::from_env(Env::default().default_filter_or("off")),
    };
    builder.try_init()?;
    Ok(())
}
