//! 业务服务层

pub mod cache_loader;
pub mod permission_service;
pub mod refetch_service;
pub mod session;
pub mod sync_service;

pub use cache_loader::CacheLoader;
pub use permission_service::PermissionService;
pub use refetch_service::{RefetchOutcome, RefetchWorker};
pub use session::Session;
pub use sync_service::{ConfirmMode, MutationSpec, SyncService};
