//! 客户端缓存
//! 键寻址、命令式变更接口、乐观更新协议与过期重新拉取队列

mod claim;
pub mod command;
pub mod key;
pub mod optimistic;
pub mod refetch;
pub mod store;

pub use command::CacheCommand;
pub use key::CacheKey;
pub use optimistic::{Confirmation, PendingMutation, Resolution, Snapshot};
pub use refetch::RefetchQueue;
pub use store::{ApplyReport, CacheStore, EntrySnapshot, EntryState, Origin};
