//! services/tracker/src/adapters/lrs.rs
//!
//! This module contains the record-store adapter, the concrete
//! implementation of the `RecordStore` port from the core crate. It speaks
//! the xAPI REST shape: statement POSTs plus per-collection state documents
//! keyed by activity, agent and (optionally) registration.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use url::Url;
use xapi_core::domain::{Actor, StateKey, Statement};
use xapi_core::ports::{PortError, PortResult, RecordStore};

const XAPI_VERSION: &str = "1.0.3";

/// How long the best-effort terminal transport will wait before giving up.
const TERMINAL_SEND_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// The resolved transport credentials: where the record store lives, the
/// full authorization header value, and any LMS-specified extended query
/// parameters the terminal transport must forward.
#[derive(Debug, Clone)]
pub struct LrsCredentials {
    pub endpoint: Url,
    pub auth: String,
    pub extended: Vec<(String, String)>,
}

/// A record-store adapter that implements the `RecordStore` port over HTTP.
#[derive(Clone)]
pub struct XapiRecordStore {
    client: reqwest::Client,
    credentials: LrsCredentials,
}

impl XapiRecordStore {
    /// Creates a new `XapiRecordStore`.
    pub fn new(credentials: LrsCredentials) -> PortResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        Ok(Self {
            client,
            credentials,
        })
    }

    fn join(&self, path: &str) -> PortResult<Url> {
        self.credentials
            .endpoint
            .join(path)
            .map_err(|e| PortError::Unexpected(e.to_string()))
    }

    fn agent_json(actor: &Actor) -> PortResult<String> {
        serde_json::to_string(actor).map_err(|e| PortError::InvalidPayload(e.to_string()))
    }

    fn state_url(&self, key: &StateKey, state_id: &str) -> PortResult<Url> {
        let mut url = self.join("activities/state")?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("activityId", &key.activity_id);
            query.append_pair("agent", &Self::agent_json(&key.actor)?);
            query.append_pair("stateId", state_id);

            if let Some(registration) = &key.registration {
                query.append_pair("registration", &registration.to_string());
            }
        }

        Ok(url)
    }

    /// The statements endpoint with the extended LMS parameters appended.
    fn statements_url(&self) -> PortResult<Url> {
        let mut url = self.join("statements")?;

        if !self.credentials.extended.is_empty() {
            let mut query = url.query_pairs_mut();
            for (name, value) in &self.credentials.extended {
                query.append_pair(name, value);
            }
        }

        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("Authorization", &self.credentials.auth)
            .header("X-Experience-API-Version", XAPI_VERSION)
    }

    /// Maps a document read response: 404 and empty bodies are absence, a
    /// malformed body is a hard payload error.
    async fn read_document(response: reqwest::Response) -> PortResult<Option<Value>> {
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            return Err(PortError::Unexpected(format!(
                "Invalid status code {} returned from state read",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        if body.is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| PortError::InvalidPayload(e.to_string()))
    }
}

//=========================================================================================
// `RecordStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl RecordStore for XapiRecordStore {
    async fn post_statement(&self, statement: &Statement) -> PortResult<()> {
        let url = self.statements_url()?;

        let response = self
            .request(reqwest::Method::POST, url)
            .json(statement)
            .send()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PortError::Unexpected(format!(
                "Invalid status code {} returned from statement send",
                response.status()
            )));
        }

        Ok(())
    }

    async fn get_state(&self, key: &StateKey, state_id: &str) -> PortResult<Option<Value>> {
        let url = self.state_url(key, state_id)?;

        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        Self::read_document(response).await
    }

    async fn set_state(&self, key: &StateKey, state_id: &str, document: &Value) -> PortResult<()> {
        let url = self.state_url(key, state_id)?;

        let response = self
            .request(reqwest::Method::PUT, url)
            .json(document)
            .send()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PortError::Unexpected(format!(
                "Invalid status code {} returned from state write",
                response.status()
            )));
        }

        Ok(())
    }

    async fn delete_state(&self, key: &StateKey, state_id: &str) -> PortResult<()> {
        let url = self.state_url(key, state_id)?;

        let response = self
            .request(reqwest::Method::DELETE, url)
            .send()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PortError::Unexpected(format!(
                "Invalid status code {} returned from state delete",
                response.status()
            )));
        }

        Ok(())
    }

    async fn get_agent_profile(
        &self,
        actor: &Actor,
        profile_id: &str,
    ) -> PortResult<Option<Value>> {
        let mut url = self.join("agents/profile")?;
        url.query_pairs_mut()
            .append_pair("agent", &Self::agent_json(actor)?)
            .append_pair("profileId", profile_id);

        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        Self::read_document(response).await
    }

    /// The keep-alive-capable transport for terminal statements. Runs on a
    /// dedicated blocking client so it needs no async executor to make
    /// progress during unload.
    fn post_statements_blocking(&self, statements: &[Statement]) -> PortResult<()> {
        let url = self.statements_url()?;

        let client = reqwest::blocking::Client::builder()
            .timeout(TERMINAL_SEND_TIMEOUT)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = client
            .post(url)
            .header("Authorization", &self.credentials.auth)
            .header("X-Experience-API-Version", XAPI_VERSION)
            .json(&statements)
            .send()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PortError::Unexpected(format!(
                "Invalid status code {} returned from terminal statement send",
                response.status()
            )));
        }

        Ok(())
    }
}
