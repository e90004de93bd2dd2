// src/main.rs

use cmdpipe::{build_runtime, cli, load_config, logging, run_with_config};

fn main() {
    if let Err(err) = run_main() {
        eprintln!("cmdpipe error: {err:?}");
        std::process::exit(1);
    }
}

// The runtime shape comes from the config, so the config is loaded before
// the runtime exists.
fn run_main() -> anyhow::Result<()> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    let cfg = load_config(&args)?;
    let runtime = build_runtime(&cfg.runtime)?;
    runtime.block_on(run_with_config(&args, cfg))
}
