//! Evolver 函数客户端
//!
//! 根地址 `https://{project_id}.supabase.co/functions/v1/{function}`（可由 base_url 覆盖），
//! Bearer + `apikey` 头鉴权，JSON 请求/响应；非 2xx 返回 `EvolverError::DataService`。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use crate::config::DataServiceSection;
use crate::core::EvolverError;
use crate::evolution::store::CycleStore;
use crate::evolution::types::{EvolutionCycle, EvolverConfig, SystemMetrics};

#[derive(Debug, Clone)]
pub struct DataServiceClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl DataServiceClient {
    /// base_url 为 Evolver 函数地址（已含函数路径前缀）
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build data service HTTP client, request timeout disabled: {}", e);
                Client::new()
            });
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn from_section(section: &DataServiceSection) -> Result<Self, EvolverError> {
        let url = section.evolver_url().ok_or_else(|| {
            EvolverError::Config("data_service.project_id or data_service.base_url is required".to_string())
        })?;
        Ok(Self::new(url, section.api_key.clone(), section.timeout_secs))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn list_cycles(&self) -> Result<Vec<EvolutionCycle>, EvolverError> {
        self.call(Method::GET, "/cycles", None::<&()>).await
    }

    pub async fn get_cycle(&self, id: &str) -> Result<EvolutionCycle, EvolverError> {
        self.call(Method::GET, &format!("/cycles/{}", id), None::<&()>)
            .await
    }

    pub async fn create_cycle(&self, cycle: &EvolutionCycle) -> Result<EvolutionCycle, EvolverError> {
        self.call(Method::POST, "/cycles", Some(cycle)).await
    }

    /// 部分更新：patch 为任意 JSON 对象
    pub async fn patch_cycle<P>(&self, id: &str, patch: &P) -> Result<EvolutionCycle, EvolverError>
    where
        P: Serialize + ?Sized,
    {
        self.call(Method::PATCH, &format!("/cycles/{}", id), Some(patch))
            .await
    }

    /// 请求服务端发起一个新周期
    pub async fn start_cycle(&self) -> Result<EvolutionCycle, EvolverError> {
        self.call(Method::POST, "/cycles/start", Some(&json!({})))
            .await
    }

    pub async fn approve_proposal(&self, proposal_id: &str) -> Result<(), EvolverError> {
        self.send(
            Method::POST,
            &format!("/proposals/{}/approve", proposal_id),
            Some(&json!({})),
        )
        .await
        .map(|_| ())
    }

    pub async fn reject_proposal(&self, proposal_id: &str, reason: &str) -> Result<(), EvolverError> {
        self.send(
            Method::POST,
            &format!("/proposals/{}/reject", proposal_id),
            Some(&json!({ "reason": reason })),
        )
        .await
        .map(|_| ())
    }

    pub async fn get_config(&self) -> Result<EvolverConfig, EvolverError> {
        self.call(Method::GET, "/config", None::<&()>).await
    }

    pub async fn update_config(&self, config: &EvolverConfig) -> Result<EvolverConfig, EvolverError> {
        self.call(Method::PATCH, "/config", Some(config)).await
    }

    pub async fn get_metrics(&self) -> Result<SystemMetrics, EvolverError> {
        self.call(Method::GET, "/metrics", None::<&()>).await
    }

    pub async fn rollback_cycle(&self, cycle_id: &str) -> Result<(), EvolverError> {
        self.send(
            Method::POST,
            &format!("/cycles/{}/rollback", cycle_id),
            Some(&json!({})),
        )
        .await
        .map(|_| ())
    }

    async fn call<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T, EvolverError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let text = self.send(method, path, body).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// 发送请求并返回响应体原文
    async fn send<B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<String, EvolverError>
    where
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%method, %url, "Data service request");

        let mut request = self.client.request(method.clone(), &url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key).header("apikey", key);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            tracing::warn!(%method, %url, "Data service request failed: {}", e);
            EvolverError::from(e)
        })?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            tracing::warn!(%method, %url, status = status.as_u16(), "Data service returned an error");
            return Err(EvolverError::DataService {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }
}

#[async_trait]
impl CycleStore for DataServiceClient {
    async fn create_cycle(&self, cycle: &EvolutionCycle) -> Result<(), EvolverError> {
        self.send(Method::POST, "/cycles", Some(cycle)).await.map(|_| ())
    }

    async fn update_cycle(&self, cycle: &EvolutionCycle) -> Result<(), EvolverError> {
        self.send(Method::PATCH, &format!("/cycles/{}", cycle.id), Some(cycle))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_section_requires_target() {
        assert!(matches!(
            DataServiceClient::from_section(&DataServiceSection::default()),
            Err(EvolverError::Config(_))
        ));

        let section = DataServiceSection {
            project_id: Some("abcd".to_string()),
            ..Default::default()
        };
        let client = DataServiceClient::from_section(&section).unwrap();
        assert_eq!(client.base_url(), "https://abcd.supabase.co/functions/v1/evolver");
    }

    #[test]
    fn test_base_url_override_trims_slash() {
        let client = DataServiceClient::new("http://localhost:54321/functions/v1/evolver/", None, 5);
        assert_eq!(client.base_url(), "http://localhost:54321/functions/v1/evolver");
    }
}
