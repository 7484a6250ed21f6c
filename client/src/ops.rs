//! Typed operations over an established daemon connection.

use std::time::Duration;

use clai_protocol::ClientOp;
use clai_protocol::HistoryPage;
use clai_protocol::ImportReport;
use clai_protocol::RequestEnvelope;
use clai_protocol::ResponseBody;
use clai_protocol::ResponseEnvelope;
use clai_protocol::ResponsePayload;
use clai_protocol::StatusBody;
use clai_protocol::Suggestion;
use clai_protocol::read_frame;
use clai_protocol::write_frame;
use tokio::io::BufStream;
use tokio::net::UnixStream;
use tracing::debug;

use crate::ClientError;
use crate::ConnectOptions;

pub struct ClaiClient {
    stream: BufStream<UnixStream>,
    next_request_id: u64,
}

impl ClaiClient {
    pub fn new(stream: UnixStream) -> Self {
        Self {
            stream: BufStream::new(stream),
            next_request_id: 1,
        }
    }

    /// Connect with the full recovery/spawn algorithm.
    pub async fn establish(options: &ConnectOptions) -> Result<Self, ClientError> {
        Ok(Self::new(crate::connect_or_spawn(options).await?))
    }

    /// Send one operation and wait for its response. Responses whose
    /// `request_id` does not match the outstanding request are stale
    /// left-overs on a reused connection and are discarded.
    pub async fn request(&mut self, op: ClientOp) -> Result<ResponseBody, ClientError> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        let budget = Duration::from_millis(op.budget_ms().max(100));

        write_frame(&mut self.stream, &RequestEnvelope { request_id, op }).await?;

        loop {
            let response: Option<ResponseEnvelope> =
                tokio::time::timeout(budget, read_frame(&mut self.stream))
                    .await
                    .map_err(|_| ClientError::Timeout)??;
            let Some(response) = response else {
                return Err(ClientError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed mid-request",
                )));
            };
            if response.request_id != request_id {
                debug!(
                    got = response.request_id,
                    want = request_id,
                    "discarding stale response"
                );
                continue;
            }
            return match response.payload {
                ResponsePayload::Ok { body } => Ok(body),
                ResponsePayload::Error { error } => Err(ClientError::Server(error)),
            };
        }
    }

    pub async fn ping(&mut self) -> Result<(), ClientError> {
        match self.request(ClientOp::Ping).await? {
            ResponseBody::Pong => Ok(()),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn status(&mut self) -> Result<StatusBody, ClientError> {
        match self.request(ClientOp::GetStatus).await? {
            ResponseBody::Status(status) => Ok(status),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn suggest(
        &mut self,
        params: clai_protocol::SuggestParams,
    ) -> Result<Vec<Suggestion>, ClientError> {
        match self.request(ClientOp::Suggest(params)).await? {
            ResponseBody::Suggestions(body) => Ok(body.suggestions),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn text_to_command(
        &mut self,
        params: clai_protocol::TextToCommandParams,
    ) -> Result<Vec<Suggestion>, ClientError> {
        match self.request(ClientOp::TextToCommand(params)).await? {
            ResponseBody::Suggestions(body) => Ok(body.suggestions),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn fetch_history(
        &mut self,
        params: clai_protocol::FetchHistoryParams,
    ) -> Result<HistoryPage, ClientError> {
        match self.request(ClientOp::FetchHistory(params)).await? {
            ResponseBody::History(page) => Ok(page),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn import_history(
        &mut self,
        params: clai_protocol::ImportHistoryParams,
    ) -> Result<ImportReport, ClientError> {
        match self.request(ClientOp::ImportHistory(params)).await? {
            ResponseBody::Import(report) => Ok(report),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Fire-and-forget send: any ack or error is accepted silently, so shell
    /// hooks stay fast and quiet.
    pub async fn send_event(&mut self, op: ClientOp) -> Result<(), ClientError> {
        match self.request(op).await {
            Ok(_) => Ok(()),
            Err(ClientError::Server(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
