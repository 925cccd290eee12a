//! Member client — the transport used to reach peer members.
//!
//! The HTTP implementation speaks the same REST surface clients use,
//! with the notification User-Agent so the receiving member classifies
//! the request correctly.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use netgrid_catalog::MemberRecord;
use netgrid_core::{NetworkPut, NetworksPost, API_VERSION, USER_AGENT_NOTIFIER};

use crate::{ClusterError, ClusterResult};

/// Operations issued against a single peer member.
#[async_trait]
pub trait MemberClient: Send + Sync {
    /// `POST /1.0/networks` on the peer, within a project.
    async fn create_network(&self, project: &str, req: &NetworksPost) -> ClusterResult<()>;

    /// `PUT /1.0/networks/{name}` on the peer, within a project.
    async fn update_network(
        &self,
        project: &str,
        name: &str,
        req: &NetworkPut,
    ) -> ClusterResult<()>;

    /// `DELETE /1.0/networks/{name}` on the peer, within a project.
    async fn delete_network(&self, project: &str, name: &str) -> ClusterResult<()>;

    /// Forward an arbitrary request to the peer (used for `?target=`
    /// redirection). Returns the status code and response body.
    async fn forward(
        &self,
        method: &str,
        path: &str,
        query: &[(String, String)],
        body: Option<serde_json::Value>,
    ) -> ClusterResult<(u16, serde_json::Value)>;
}

/// Hands out clients scoped to individual members.
pub trait MemberClientFactory: Send + Sync {
    fn client(&self, member: &MemberRecord) -> Arc<dyn MemberClient>;
}

// ── HTTP implementation ───────────────────────────────────────────

/// reqwest-based member client.
pub struct HttpMemberClient {
    client: reqwest::Client,
    member: String,
    base_url: String,
}

impl HttpMemberClient {
    pub fn new(member: &MemberRecord, user_agent: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(user_agent)
            .build()
            .unwrap_or_default();

        Self {
            client,
            member: member.name.clone(),
            base_url: format!("http://{}/{}", member.address, API_VERSION),
        }
    }

    fn peer_error(&self, message: impl Into<String>) -> ClusterError {
        ClusterError::Peer {
            member: self.member.clone(),
            message: message.into(),
        }
    }

    async fn check(&self, response: reqwest::Response) -> ClusterResult<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(self.peer_error(format!("status {status}: {body}")))
    }
}

#[async_trait]
impl MemberClient for HttpMemberClient {
    async fn create_network(&self, project: &str, req: &NetworksPost) -> ClusterResult<()> {
        let url = format!("{}/networks", self.base_url);
        debug!(member = %self.member, network = %req.name, "peer create network");
        let response = self
            .client
            .post(&url)
            .query(&[("project", project)])
            .json(req)
            .send()
            .await
            .map_err(|e| ClusterError::Transport(e.to_string()))?;
        self.check(response).await
    }

    async fn update_network(
        &self,
        project: &str,
        name: &str,
        req: &NetworkPut,
    ) -> ClusterResult<()> {
        let url = format!("{}/networks/{}", self.base_url, name);
        debug!(member = %self.member, network = %name, "peer update network");
        let response = self
            .client
            .put(&url)
            .query(&[("project", project)])
            .json(req)
            .send()
            .await
            .map_err(|e| ClusterError::Transport(e.to_string()))?;
        self.check(response).await
    }

    async fn delete_network(&self, project: &str, name: &str) -> ClusterResult<()> {
        let url = format!("{}/networks/{}", self.base_url, name);
        debug!(member = %self.member, network = %name, "peer delete network");
        let response = self
            .client
            .delete(&url)
            .query(&[("project", project)])
            .send()
            .await
            .map_err(|e| ClusterError::Transport(e.to_string()))?;
        self.check(response).await
    }

    async fn forward(
        &self,
        method: &str,
        path: &str,
        query: &[(String, String)],
        body: Option<serde_json::Value>,
    ) -> ClusterResult<(u16, serde_json::Value)> {
        let url = format!("{}{}", self.base_url, path);
        let method: reqwest::Method = method
            .parse()
            .map_err(|_| ClusterError::Transport(format!("invalid method {method:?}")))?;

        let mut request = self.client.request(method, &url).query(query);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ClusterError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .json::<serde_json::Value>()
            .await
            .unwrap_or(serde_json::Value::Null);
        Ok((status, body))
    }
}

/// Factory producing `HttpMemberClient`s with a fixed User-Agent.
pub struct HttpClientFactory {
    user_agent: String,
}

impl HttpClientFactory {
    /// Factory for cluster-notification sub-requests.
    pub fn notifier() -> Self {
        Self {
            user_agent: USER_AGENT_NOTIFIER.to_string(),
        }
    }

    pub fn with_user_agent(user_agent: &str) -> Self {
        Self {
            user_agent: user_agent.to_string(),
        }
    }
}

impl MemberClientFactory for HttpClientFactory {
    fn client(&self, member: &MemberRecord) -> Arc<dyn MemberClient> {
        Arc::new(HttpMemberClient::new(member, &self.user_agent))
    }
}
