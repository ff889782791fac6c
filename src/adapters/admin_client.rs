//! Admin Client
//!
//! Administrative commands that mutate positions are sent to the running
//! server instead of writing to the store directly, so their events go out
//! through the server's publisher in commit order.

use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use crate::domain::{BoardId, ColumnId, ColumnRebalanced, Identity, Swimlane};
use crate::error::{CardflowError, MoveError, Result};

pub struct AdminClient {
    client: Client,
    base_url: String,
    identity: Identity,
}

impl AdminClient {
    pub fn new(base_url: &str, identity: Identity) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CardflowError::Internal(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            identity,
        })
    }

    /// POST /api/boards/:board_id/columns/:column_id/rebalance
    pub async fn rebalance_column(
        &self,
        board_id: &BoardId,
        column_id: &ColumnId,
        swimlane: Option<&Swimlane>,
    ) -> Result<ColumnRebalanced> {
        let url = format!(
            "{}/api/boards/{}/columns/{}/rebalance",
            self.base_url, board_id, column_id
        );
        let mut request = self
            .client
            .post(&url)
            .header("x-user-id", self.identity.user_id.as_str())
            .header("x-user-name", self.identity.display_name.as_str());
        if let Some(swimlane) = swimlane {
            request = request.query(&[("swimlane", swimlane.as_str())]);
        }

        debug!(%url, "requesting rebalance");
        let response = request.send().await?;
        Self::read(response).await
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await?;
        match serde_json::from_str::<MoveError>(&body) {
            Ok(err) => Err(err.into()),
            Err(_) => Err(CardflowError::Transport(format!(
                "server answered {}: {}",
                status, body
            ))),
        }
    }
}
