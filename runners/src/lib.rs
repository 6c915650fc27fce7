pub mod context;
pub mod logging;
pub mod wallet;

pub use context::{DEMO_FUNDS, build_context};
pub use logging::init_tracing;
pub use wallet::{CliWallet, WalletError};
