//! HTTP 处理器模块

pub mod access;
pub mod cache;
pub mod health;
pub mod realtime;
