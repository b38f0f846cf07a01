use crate::allow_list::AllowList;
use crate::api::utils::{HandlerBody, deserialize_body, json_response};
use crate::config::ResponseMode;
use crate::decoder::RawRecord;
use crate::errors::{DataReceiverError, Result};
use crate::upsert::{UpsertEngine, UpsertSummary};
use hyper::body::Body;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use shared::http::ClientAddr;
use std::fmt::Display;

/// A batch as posted by a sender.
#[derive(Debug, Deserialize)]
pub struct ReceiveRequest {
    pub table_name: String,
    pub data: Vec<RawRecord>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ReceiveResponse {
    pub message: String,
}

impl ReceiveResponse {
    pub fn success(summary: &UpsertSummary) -> Self {
        ReceiveResponse {
            message: format!(
                "Success: {} added, {} updated",
                summary.inserted, summary.updated
            ),
        }
    }

    pub fn error(message: impl Display) -> Self {
        ReceiveResponse {
            message: format!("Error: {message}"),
        }
    }
}

/// Status and body reported for a rejected batch.
///
/// Persistence details stay in the logs; senders only learn that the batch
/// was not applied.
pub fn error_outcome(error: &DataReceiverError) -> (StatusCode, ReceiveResponse) {
    match error {
        DataReceiverError::UnknownEntity(_) => (
            StatusCode::BAD_REQUEST,
            ReceiveResponse::error("Unknown table name"),
        ),
        DataReceiverError::Decode { index, source } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            ReceiveResponse::error(format!("Invalid value in record {index}: {source}")),
        ),
        DataReceiverError::RequestBodyError(detail) => (
            StatusCode::BAD_REQUEST,
            ReceiveResponse::error(format!("Invalid request body: {detail}")),
        ),
        DataReceiverError::RequestBodyTooLarge(_) => (
            StatusCode::PAYLOAD_TOO_LARGE,
            ReceiveResponse::error("Request body too large"),
        ),
        DataReceiverError::Forbidden(_) => {
            (StatusCode::FORBIDDEN, ReceiveResponse::error("Forbidden"))
        }
        DataReceiverError::Persistence(_)
        | DataReceiverError::ResponseSerializationError(_)
        | DataReceiverError::Config(_)
        | DataReceiverError::Io(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ReceiveResponse::error("Something went wrong"),
        ),
    }
}

/// Handles posted batches on the receive path.
pub struct ReceiveHandler {
    engine: UpsertEngine,
    allow_list: AllowList,
    response_mode: ResponseMode,
    max_body_bytes: usize,
}

impl ReceiveHandler {
    pub fn new(
        engine: UpsertEngine,
        allow_list: AllowList,
        response_mode: ResponseMode,
        max_body_bytes: usize,
    ) -> Self {
        ReceiveHandler {
            engine,
            allow_list,
            response_mode,
            max_body_bytes,
        }
    }

    pub async fn handle<B>(&self, req: Request<B>) -> Result<Response<HandlerBody>>
    where
        B: Body + Send,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let peer = req.extensions().get::<ClientAddr>().map(|addr| addr.0);

        let result = match self.allow_list.check(peer) {
            Ok(()) => self.receive(req.into_body()).await,
            Err(e) => Err(e),
        };

        let (status, body) = match result {
            Ok(summary) => (StatusCode::OK, ReceiveResponse::success(&summary)),
            Err(e) => {
                tracing::debug!(kind = e.kind(), error = %e, "Receive failed");
                error_outcome(&e)
            }
        };

        json_response(self.response_mode.status(status), &body)
    }

    async fn receive<B>(&self, body: B) -> Result<UpsertSummary>
    where
        B: Body + Send,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let request: ReceiveRequest = deserialize_body(body, self.max_body_bytes).await?;
        self.engine.apply(&request.table_name, &request.data).await
    }
}
