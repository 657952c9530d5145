pub mod cancel;
pub mod error;
pub mod partition;
pub mod runner;
pub mod source;
pub mod state;
