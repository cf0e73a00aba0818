//! 后端 REST API 契约
//! 变更请求要么返回权威实体，要么返回带可读消息的错误

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::{cache::CacheKey, config::ApiConfig};

/// 后端返回的失败，附带可读消息
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct RemoteError {
    pub status: Option<u16>,
    pub message: String,
}

impl RemoteError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        RemoteError::new(e.status().map(|s| s.as_u16()), e.to_string())
    }
}

/// 按缓存键拉取服务端最新值
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, key: &CacheKey) -> std::result::Result<Value, RemoteError>;
}

/// 后端错误响应体
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// 基于 reqwest 的 REST 拉取器（Bearer 令牌认证）
#[derive(Clone)]
pub struct RestFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl RestFetcher {
    pub fn new(base_url: &str, config: &ApiConfig) -> std::result::Result<Self, RemoteError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                .map_err(|e| RemoteError::new(None, format!("Invalid API token: {}", e)))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Fetcher for RestFetcher {
    async fn fetch(&self, key: &CacheKey) -> std::result::Result<Value, RemoteError> {
        let path = key
            .resource_path()
            .ok_or_else(|| RemoteError::new(None, format!("No resource mapped for {}", key)))?;

        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<Value>().await?);
        }

        let text = response.text().await?;
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.message)
            .unwrap_or(text);
        Err(RemoteError::new(Some(status.as_u16()), message))
    }
}
