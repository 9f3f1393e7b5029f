//! Obtains the connection ticket that authorizes a streaming connection.
//!
//! 获取授权流连接的连接票据。

use crate::config::RunConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use url::Url;

/// Header carrying the access token on the ticket exchange.
pub const TOKEN_HEADER: &str = "X-Intdash-Token";

/// A source of connection tickets.
///
/// 连接票据的来源。
#[async_trait]
pub trait TicketSource: Send + Sync {
    async fn fetch_ticket(&self) -> Result<String>;
}

/// Always yields the same ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticTicket(pub String);

#[async_trait]
impl TicketSource for StaticTicket {
    async fn fetch_ticket(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TicketResponse {
    ticket: String,
}

/// Exchanges an access token for a ticket at `{serverUrl}/api/iscp/tickets`.
///
/// 在 `{serverUrl}/api/iscp/tickets` 用访问令牌换取票据。
#[derive(Debug, Clone)]
pub struct HttpTicketSource {
    client: reqwest::Client,
    url: Url,
    token: String,
}

impl HttpTicketSource {
    pub fn new(url: Url, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            token: token.into(),
        }
    }

    pub fn from_config(config: &RunConfig) -> Result<Self> {
        Ok(Self::new(config.ticket_url()?, config.access_token.clone()))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl TicketSource for HttpTicketSource {
    async fn fetch_ticket(&self) -> Result<String> {
        debug!(url = %self.url, "requesting connection ticket");
        let response = self
            .client
            .post(self.url.clone())
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::TicketRejected {
                status: status.as_u16(),
            });
        }
        let body: TicketResponse = response.json().await?;
        Ok(body.ticket)
    }
}
