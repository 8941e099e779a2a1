pub mod config;
pub mod error;
pub mod types;

pub use config::{ActiveExclusion, FeatureControls, ScraperConfig};
pub use error::ScraperError;
pub use types::*;
