// herald-core/src/services/mod.rs

pub mod forward_service;
pub mod sync_service;

pub use forward_service::ForwardService;
pub use sync_service::TopologySyncService;
