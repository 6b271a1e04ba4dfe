// File: ./src/bin/notesync.rs
use anyhow::Result;
use notesync::cli::{self, CliCommand};
use notesync::config::Config;
use notesync::context::{AppContext, SharedContext, StandardContext};
use notesync::notify;
use notesync::source::Registry;
use notesync::sync::SyncManager;
use simplelog::{
    ColorChoice, CombinedLogger, LevelFilter, SharedLogger, TermLogger, TerminalMode, WriteLogger,
};
use std::env;
use std::fs::OpenOptions;
use std::sync::Arc;

fn init_logging(ctx: &dyn AppContext, verbose: bool) {
    let term_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let log_config = simplelog::ConfigBuilder::new()
        .add_filter_allow_str("notesync")
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        term_level,
        log_config.clone(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )];

    if let Some(path) = ctx.get_log_path() {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => loggers.push(WriteLogger::new(LevelFilter::Debug, log_config, file)),
            Err(e) => eprintln!("Could not open log file {:?}: {}", path, e),
        }
    }

    let _ = CombinedLogger::init(loggers);
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let parsed = match cli::parse_args(&args) {
        Ok(p) => p,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            eprintln!("Run 'notesync --help' for usage.");
            std::process::exit(64);
        }
    };
    if parsed.command == CliCommand::Help {
        cli::print_help("notesync");
        return Ok(());
    }

    let ctx: SharedContext = Arc::new(StandardContext::new(parsed.root.clone()));
    let config = Config::load_or_default(ctx.as_ref())?;
    init_logging(ctx.as_ref(), parsed.verbose || config.debug_logging);

    let mut registry = Registry::new();
    for err in registry.register_configured(&config) {
        log::error!("Source not loaded: {}", err);
    }

    let notifier = notify::from_config(config.desktop_notifications);
    let manager = SyncManager::with_notifier(ctx, config, registry, notifier);

    let code = cli::run(&parsed.command, &manager).await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
