use reqwest::StatusCode;
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;

use super::error::RpcError;
use crate::membership::types::ReplicaAddress;

/// A decoded answer together with the HTTP status it came with.
#[derive(Debug)]
pub struct Reply<T> {
    pub status: StatusCode,
    pub body: T,
}

/// Shared HTTP client for talking to replicas.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Clone, Default)]
pub struct PeerClient {
    http: reqwest::Client,
}

impl PeerClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        address: &ReplicaAddress,
        path: &str,
        timeout: Duration,
    ) -> Result<Reply<T>, RpcError> {
        let request = self.http.get(address.url(path)).timeout(timeout);
        Self::exchange(address, request).await
    }

    pub async fn get_query<Q: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        address: &ReplicaAddress,
        path: &str,
        query: &Q,
        timeout: Duration,
    ) -> Result<Reply<T>, RpcError> {
        let request = self
            .http
            .get(address.url(path))
            .query(query)
            .timeout(timeout);
        Self::exchange(address, request).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        address: &ReplicaAddress,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<Reply<T>, RpcError> {
        let request = self.http.post(address.url(path)).json(body).timeout(timeout);
        Self::exchange(address, request).await
    }

    async fn exchange<T: DeserializeOwned>(
        address: &ReplicaAddress,
        request: reqwest::RequestBuilder,
    ) -> Result<Reply<T>, RpcError> {
        let response = request.send().await.map_err(|e| RpcError::Unavailable {
            address: address.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            return Err(RpcError::Unavailable {
                address: address.to_string(),
                reason: "service unavailable".to_string(),
            });
        }

        match response.json::<T>().await {
            Ok(body) => Ok(Reply { status, body }),
            // a body cut off by the timeout is still an availability problem
            Err(e) if e.is_timeout() => Err(RpcError::Unavailable {
                address: address.to_string(),
                reason: e.to_string(),
            }),
            Err(e) => Err(RpcError::Decode {
                address: address.to_string(),
                reason: format!("{} ({})", e, status),
            }),
        }
    }
}
