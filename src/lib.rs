// Library interface for stride
// This allows integration tests to access internal modules

pub mod config;
pub mod errors;
pub mod observable;
pub mod session;
pub mod sources;
pub mod status;
pub mod writer;

// Re-export commonly used types
pub use config::TrackerConfig;
pub use errors::StrideError;
pub use observable::{ObservableState, Observer, SubscriptionId};
pub use session::{
    Command, ElapsedTime, GeoPoint, SessionController, SessionState, Snapshot, StatusAction,
};
pub use sources::{AlwaysGranted, ManualPositionSource, PermissionGate, PositionSource};
pub use status::{StatusPresenter, StatusView};
