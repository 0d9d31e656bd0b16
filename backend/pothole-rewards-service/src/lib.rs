pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{Result, RewardsError};
pub use handlers::{AppState, Backends};
pub use models::{
    AwardOutcome, GeoPoint, RedemptionRequest, RedemptionStatus, Region, Report, ReportStatus,
    UserAccount,
};
pub use services::{
    PointsLedger, RedemptionWorkflow, ReportIntake, ReviewEngine, SubmitReport,
};
