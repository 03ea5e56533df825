// Conveyor Core - Domain Logic & Ports
// NO OS or network adapters; those live in the infra crates

pub mod application;
pub mod domain;
pub mod error;
pub mod port;

pub use error::{AgentError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
