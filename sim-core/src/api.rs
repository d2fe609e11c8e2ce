//! Requests the game needs the host page to perform over HTTP.
//!
//! Nothing here touches the network. Stores queue an [`ApiRequest`], the
//! client drains the queue to JSON for the host, and the host answers with an
//! [`ApiOutcome`] keyed by request id. The purpose recorded at queue time tells
//! the caller which store should consume the answer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const SESSION_PATH: &str = "/api/game/session";
pub const PLAYER_STATS_PATH: &str = "/api/player-stats";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApiPurpose {
    SaveSession,
    SyncStats,
    LoadStats { fid: i64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiRequest {
    pub id: u64,
    pub method: HttpMethod,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// The host attaches `Authorization: Bearer <token>` when set.
    pub requires_auth: bool,
    pub purpose: ApiPurpose,
}

/// Host answer for one request. `status == 0` means the request never got a
/// response (offline, CORS, aborted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiOutcome {
    pub status: u16,
    #[serde(default)]
    pub body: String,
}

impl ApiOutcome {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn transport_error(message: impl Into<String>) -> Self {
        Self::new(0, message)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

#[derive(Debug, Default)]
pub struct ApiOutbox {
    next_id: u64,
    queued: Vec<ApiRequest>,
    pending: BTreeMap<u64, ApiPurpose>,
}

impl ApiOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(
        &mut self,
        method: HttpMethod,
        path: impl Into<String>,
        body: Option<Value>,
        requires_auth: bool,
        purpose: ApiPurpose,
    ) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.queued.push(ApiRequest {
            id,
            method,
            path: path.into(),
            body,
            requires_auth,
            purpose,
        });
        id
    }

    /// Hands queued requests to the host; they stay pending until resolved.
    pub fn drain(&mut self) -> Vec<ApiRequest> {
        let drained: Vec<ApiRequest> = self.queued.drain(..).collect();
        for request in &drained {
            self.pending.insert(request.id, request.purpose);
        }
        drained
    }

    /// Unknown or already-resolved ids return `None`.
    pub fn resolve(&mut self, id: u64) -> Option<ApiPurpose> {
        self.pending.remove(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn drained_requests_resolve_once() {
        let mut outbox = ApiOutbox::new();
        let id = outbox.queue(
            HttpMethod::Post,
            SESSION_PATH,
            Some(json!({ "score": 10 })),
            true,
            ApiPurpose::SaveSession,
        );

        let drained = outbox.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].id, id);
        assert!(outbox.drain().is_empty());

        assert_eq!(outbox.resolve(id), Some(ApiPurpose::SaveSession));
        assert_eq!(outbox.resolve(id), None);
    }

    #[test]
    fn request_serializes_for_the_host() {
        let mut outbox = ApiOutbox::new();
        outbox.queue(
            HttpMethod::Get,
            format!("{PLAYER_STATS_PATH}/7"),
            None,
            false,
            ApiPurpose::LoadStats { fid: 7 },
        );

        let value = serde_json::to_value(outbox.drain()).unwrap();
        assert_eq!(
            value,
            json!([{
                "id": 1,
                "method": "GET",
                "path": "/api/player-stats/7",
                "requiresAuth": false,
                "purpose": { "type": "load_stats", "fid": 7 }
            }])
        );
    }

    #[test]
    fn only_2xx_counts_as_success() {
        assert!(ApiOutcome::new(201, "").is_success());
        assert!(!ApiOutcome::new(401, "unauthorized").is_success());
        assert!(!ApiOutcome::transport_error("offline").is_success());
    }
}
