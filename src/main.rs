use std::env;

use anyhow::Context;
use fed_multimodal::ExperimentConfig;
use log::info;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = match env::args().nth(1).or_else(|| env::var("FED_CONFIG").ok()) {
        Some(path) => ExperimentConfig::from_json_file(&path)
            .with_context(|| format!("failed to read config from {path}"))?,
        None => {
            info!("no config given, running with defaults");
            ExperimentConfig::default()
        }
    };

    let result = fed_multimodal::run(&config).context("experiment failed")?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}
