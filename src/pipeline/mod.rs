pub mod candidates;
pub mod dispatcher;
pub mod harvest;
pub mod sink;

pub use harvest::{HarvestSettings, Harvester};
