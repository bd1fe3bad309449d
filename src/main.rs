mod dialog;
mod game;
mod llm;
mod world;

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use log::info;

use llm::{BackendConfig, Generator};
use world::GameState;

const USAGE: &str = "\
Usage: parley <save.json> <npc-name> [model] [backend-url] [timeout-secs]

Example:
  parley ./save.json \"Mira the Fence\" llama3.1 http://localhost:11434 120

The backend URL falls back to $OLLAMA_HOST, then http://localhost:11434.
With the `local` feature, a model ending in .gguf runs in-process.

Logging: set RUST_LOG=debug or RUST_LOG=trace for verbose output";

#[cfg(feature = "local")]
fn open_local(config: &BackendConfig) -> Result<Option<Box<dyn Generator>>> {
    if !config.model.ends_with(".gguf") {
        return Ok(None);
    }
    let model = llm::local::LocalModel::load(config, llm::local::LocalConfig::default())
        .context("failed to load model")?;
    Ok(Some(Box::new(model)))
}

#[cfg(not(feature = "local"))]
fn open_local(_config: &BackendConfig) -> Result<Option<Box<dyn Generator>>> {
    Ok(None)
}

fn open_backend(config: &BackendConfig) -> Result<Box<dyn Generator>> {
    if let Some(local) = open_local(config)? {
        return Ok(local);
    }

    let ollama = llm::ollama::Ollama::new(config).context("failed to set up Ollama client")?;
    Ok(Box::new(ollama))
}

fn main() -> Result<()> {
    // Initialize logging. Control verbosity with RUST_LOG env var:
    //   RUST_LOG=info   # transitions, repairs, backend calls
    //   RUST_LOG=debug  # + prompts and parsed payloads
    //   RUST_LOG=trace  # + raw backend replies
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = std::env::args().collect();

    let save_path = args.get(1).map(PathBuf::from).context(USAGE)?;
    let npc_name = args.get(2).context(USAGE)?;

    let defaults = BackendConfig::default();
    let config = BackendConfig {
        model: args.get(3).cloned().unwrap_or(defaults.model),
        base_url: args
            .get(4)
            .cloned()
            .or_else(|| std::env::var("OLLAMA_HOST").ok())
            .unwrap_or(defaults.base_url),
        timeout: args
            .get(5)
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout),
        ..defaults
    };

    println!("Model   : {}", config.model);
    println!("Backend : {}", config.base_url);
    println!("Timeout : {:?}", config.timeout);

    let mut state = if save_path.exists() {
        GameState::load(&save_path)?
    } else {
        info!("No save at {}, starting fresh", save_path.display());
        GameState::default()
    };

    let mut generator = open_backend(&config)?;

    let stdin = io::stdin();
    let mut term = game::Terminal::new(stdin.lock(), io::stdout());
    game::run(
        &mut term,
        generator.as_mut(),
        &mut state,
        npc_name,
        &mut rand::thread_rng(),
    )?;

    state.save(&save_path)
}
