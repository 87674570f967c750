pub mod locks;
pub mod reload;
pub mod service;
pub mod testing;

pub use reload::{
    ArcReload, CommandReload, MultiReload, PidSource, ReloadConfig, ReloadError, ReloadTrigger,
    ServiceConfig, SignalReload, TriggerConfig,
};
pub use service::{AccountSyncService, Operation, Step, StepFailure, SyncError, SyncReport};
