pub mod account;
pub mod redemption;
pub mod region;
pub mod report;

pub use account::*;
pub use redemption::*;
pub use region::*;
pub use report::*;
