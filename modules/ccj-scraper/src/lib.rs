pub mod controller;
pub mod dry_run;
pub mod heartbeat;
pub mod monitor;
pub mod raw_inmate_data;
pub mod search_commands;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;

pub use controller::{Controller, ControllerConfig, PipelineStage};
pub use monitor::{Event, Monitor, Role};
pub use raw_inmate_data::RawInmateData;
pub use search_commands::{FindInmates, SearchCommands, SearchQueue};
