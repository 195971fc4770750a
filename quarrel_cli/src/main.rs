mod config;
mod targets;

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use quarrel_core::report::{DIFFS_DIR, SUMMARY_DIR};
use quarrel_core::{BatchVerdict, DiffManager, Reporter};
use tracing::{info, warn};

use config::DriverConfig;
use targets::{demo_targets, DemoHost, EDGES};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Files (or directories, one level deep) to replay.
    inputs: Vec<PathBuf>,
    #[clap(long)]
    output_root: Option<PathBuf>,
}

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match cli.config_file {
        Some(config_path) => DriverConfig::load_from_file(&config_path)?,
        None => {
            let default_config_path = PathBuf::from("quarrel.toml");
            if default_config_path.exists() {
                DriverConfig::load_from_file(&default_config_path)?
            } else {
                DriverConfig::default()
            }
        }
    };
    if let Some(output_root) = cli.output_root {
        config.output_root = output_root;
    }

    let mut input_paths = config.input_paths.take().unwrap_or_default();
    input_paths.extend(cli.inputs);
    if input_paths.is_empty() {
        anyhow::bail!("no inputs given; pass files or directories to replay");
    }

    // The coordinator does not create its output directories; the driver,
    // acting as the host, does.
    fs::create_dir_all(config.output_root.join(DIFFS_DIR))?;
    fs::create_dir_all(config.output_root.join(SUMMARY_DIR))?;

    let mut host = DemoHost::new();
    let mut manager = DiffManager::new(Reporter::new(&config.output_root));

    let mut registered = Vec::new();
    for (i, target) in demo_targets().into_iter().enumerate() {
        manager.begin_registration(&host);
        let module = host.add_module(EDGES, 0x1000 * (i as u64 + 1));
        let index = manager.end_registration(&host, target.name)?;
        registered.push((index, module, target));
    }

    let mut inputs = Vec::new();
    for path in &input_paths {
        if path.is_file() {
            inputs.push(path.clone());
        } else if path.is_dir() {
            for entry in fs::read_dir(path)? {
                let entry_path = entry?.path();
                if entry_path.is_file() {
                    inputs.push(entry_path);
                }
            }
        } else {
            warn!(path = %path.display(), "input path does not exist; skipped");
        }
    }
    inputs.sort();

    let mut batches = 0u64;
    let mut reported = 0u64;
    let mut classified = 0u64;

    for path in &inputs {
        let data = fs::read(path)?;
        manager.start_batch(&data)?;
        for (index, module, target) in &registered {
            let run = manager.start_run()?;
            debug_assert_eq!(run, *index);
            host.clear_counters();
            let (exit_code, output) = target.execute(&data, host.counters_mut(*module));
            manager.end_run(&host, run, exit_code, &output, None)?;
        }
        let verdict = manager.end_batch()?;
        batches += 1;
        match &verdict {
            BatchVerdict::Reported { stem } => {
                reported += 1;
                info!(input = %path.display(), %stem, "divergence reported");
            }
            BatchVerdict::Classified(class) => {
                classified += 1;
                info!(input = %path.display(), %class, "divergence classified");
            }
            other => {
                info!(input = %path.display(), verdict = ?other, "batch done");
            }
        }
    }

    let (coarse, fine) = manager.novelty_counts();
    println!(
        "Replayed {} inputs: {} reported, {} classified, {} coarse / {} fine signatures",
        batches, reported, classified, coarse, fine
    );

    Ok(())
}
