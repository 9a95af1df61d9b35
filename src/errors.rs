// Error types for stride

use crate::session::{Command, SessionState};
use snafu::Snafu;
use std::io;

#[derive(Debug, Snafu)]
pub enum StrideError {
    // Session state machine errors
    #[snafu(display("Cannot apply {command:?} while the session is {from:?}"))]
    InvalidTransition {
        from: SessionState,
        command: Command,
    },
    #[snafu(display("Unable to spawn {name} thread"))]
    ThreadSpawnError { name: String, source: io::Error },

    // Errors while broadcasting session state
    #[snafu(display("Observer is no longer receiving snapshots"))]
    ObserverDisconnected,
    #[snafu(display("Observer failed: {description}"))]
    ObserverFailed { description: String },
    #[snafu(display("Status presenter failed: {description}"))]
    PresenterError { description: String },

    // Position sampling errors
    #[snafu(display("Position source error: {description}"))]
    PositionSourceError { description: String },
    #[snafu(display("Invalid position sample file: {path}"))]
    InvalidSampleFile { path: String },
    #[snafu(display("Error loading position sample file"))]
    SampleLoaderError { source: io::Error },

    // Errors for the snapshot writer
    #[snafu(display("Error writing snapshot file"))]
    WriterError { source: io::Error },

    // Config management errors
    #[snafu(display("Could not find application data directory to save config file"))]
    NoConfigDir,
    #[snafu(display("Error reading or writing config file"))]
    ConfigIOError { source: io::Error },
    #[snafu(display("Error serializing config file"))]
    ConfigSerializeError { source: serde_json::Error },
    #[snafu(display("Invalid configuration: {field} - {reason}"))]
    InvalidConfig { field: String, reason: String },
}
