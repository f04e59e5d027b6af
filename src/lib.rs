// Public library interface for v2v-helper
//
// Guest inspection, in-place conversion and post-conversion fixups for
// disks migrated into a new hypervisor. The binary in main.rs is a thin
// CLI over these modules.

pub mod config;
pub mod convert;
pub mod error;
pub mod exec;
pub mod guest;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod repair;
pub mod timing;
pub mod utils;

pub use error::{Result, V2vError};
