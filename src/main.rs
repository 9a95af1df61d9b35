use std::{
    io::{self, BufRead},
    path::PathBuf,
    sync::mpsc::{self, Sender},
    thread,
};

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use stride::{
    Command, ManualPositionSource, PositionSource, SessionController, Snapshot, StrideError,
    TrackerConfig, sources::ReplayPositionSource, status::LogStatusPresenter, writer,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
    /// Config file to use instead of the one in the platform config directory
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Runs a session driven by `start`, `resume`, `pause` and `stop` lines on stdin
    Run {
        /// JSON Lines file of position samples to replay while tracking
        #[arg(short, long)]
        positions: Option<PathBuf>,

        /// Writes a JSON Lines trace of every published snapshot
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Tracks time without position samples
        #[arg(long, default_value_t = false)]
        deny_sampling: bool,
    },
    /// Prints the effective configuration
    Config {
        /// Saves the effective configuration to the platform config directory
        #[arg(long, default_value_t = false)]
        save: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<TrackerConfig, StrideError> {
    match path {
        Some(path) => TrackerConfig::from_file(path),
        None => Ok(TrackerConfig::from_local_file()?.unwrap_or_default()),
    }
}

fn read_commands(command_tx: Sender<Command>) {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        match Command::parse(&line) {
            Some(command) => {
                if command_tx.send(command).is_err() {
                    return;
                }
            }
            None => warn!("Unknown command '{}', expected start, resume, pause or stop", line.trim()),
        }
    }
    // end of input ends the session
    let _ = command_tx.send(Command::Stop);
}

fn run(
    config: TrackerConfig,
    positions: Option<PathBuf>,
    output: Option<PathBuf>,
    deny_sampling: bool,
) -> Result<(), StrideError> {
    let position_source: Box<dyn PositionSource> = match positions {
        Some(file) => Box::new(ReplayPositionSource::from_file(&file)?),
        None => Box::new(ManualPositionSource::new()),
    };
    let controller = SessionController::new(
        config,
        position_source,
        move || !deny_sampling,
        LogStatusPresenter,
    )?;

    // if we need to write an output file the writer gets its own subscription
    let writer_handle = match output {
        Some(output_file) => {
            let (snapshot_tx, snapshot_rx) = mpsc::channel::<Snapshot>();
            controller.subscribe(snapshot_tx)?;
            Some(thread::spawn(move || {
                writer::write_snapshots(&output_file, snapshot_rx)
            }))
        }
        None => None,
    };

    let (command_tx, command_rx) = mpsc::channel::<Command>();
    let ctrlc_tx = command_tx.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(Command::Stop);
    })
    .expect("Could not set Ctrl-C handler");
    thread::spawn(move || read_commands(command_tx));

    info!("Type start, pause, resume or stop");
    for command in command_rx {
        match controller.dispatch(command) {
            Ok(snapshot) => info!(
                "{:?}: {} elapsed, {} path points",
                snapshot.state,
                stride::status::format_elapsed(snapshot.elapsed.total_millis, true),
                snapshot.path_len()
            ),
            Err(e) => warn!("{}", e),
        }
        if controller.state().is_stopped() {
            break;
        }
    }

    // dropping the controller closes every subscription, which ends the writer
    drop(controller);
    if let Some(handle) = writer_handle {
        match handle.join() {
            Ok(result) => result?,
            Err(_) => error!("Snapshot writer thread panicked"),
        }
    }
    Ok(())
}

fn show_config(config: TrackerConfig, save: bool) -> Result<(), StrideError> {
    let rendered = serde_json::to_string_pretty(&config)
        .map_err(|e| StrideError::ConfigSerializeError { source: e })?;
    println!("{}", rendered);
    if save {
        config.save()?;
        info!("Configuration saved");
    }
    Ok(())
}

fn main() {
    colog::init();

    let cli = Args::parse();
    let config = load_config(cli.config.as_ref()).expect("Error while loading configuration");
    match cli.command {
        Commands::Run {
            positions,
            output,
            deny_sampling,
        } => run(config, positions, output, deny_sampling).expect("Error while running session"),
        Commands::Config { save } => {
            show_config(config, save).expect("Error while showing configuration")
        }
    };
}
