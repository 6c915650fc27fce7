pub mod convergence;
pub mod funding;
pub mod ledger;
pub mod network;
pub mod report;
pub mod scenario;

pub use scenario::DynError;
