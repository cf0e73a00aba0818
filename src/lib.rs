//! TaskMaster 客户端核心
//! 访问控制判定与实时缓存同步

pub mod cache;
pub mod config;
pub mod error;
pub mod guard;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod notify;
pub mod realtime;
pub mod remote;
pub mod routes;
pub mod services;
pub mod telemetry;
