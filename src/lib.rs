pub mod audit;
pub mod auth;
pub mod config;
pub mod error;
pub mod providers;
pub mod proxy;
pub mod routing;
pub mod server;
pub mod tee;
pub mod translate;

pub use audit::{AuditStore, AuditWriter, FsAuditStore, MemoryAuditStore};
pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use server::{build_router, AppState};
