//! Model query gateway: one query, one finite stream of text deltas.
//!
//! The gateway takes an owned snapshot of the conversation, so it can never
//! observe or cause a mutation of the live log. The returned [`QueryStream`]
//! yields deltas in order and stops after the provider's `done` chunk; if
//! anything goes wrong it yields exactly one error and then nothing.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use ferrocall_core::error::ProviderError;
use ferrocall_core::message::Message;
use ferrocall_core::provider::{Provider, ProviderRequest, QueryOptions, StreamChunk, Usage};
use futures::{Stream, StreamExt};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// Sends conversation snapshots to a provider.
#[derive(Clone)]
pub struct QueryGateway {
    provider: Arc<dyn Provider>,
}

impl QueryGateway {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Start a query. An `Err` here means no stream was ever opened.
    pub async fn query(
        &self,
        snapshot: Vec<Message>,
        options: QueryOptions,
    ) -> Result<QueryStream, ProviderError> {
        debug!(
            provider = %self.provider.name(),
            model = %options.model,
            messages = snapshot.len(),
            format = ?options.response_format,
            "Starting model query"
        );

        let request = ProviderRequest {
            messages: snapshot,
            options,
        };
        let rx = self.provider.stream(request).await.inspect_err(|e| {
            warn!(provider = %self.provider.name(), error = %e, "Model query failed");
        })?;

        Ok(QueryStream {
            inner: ReceiverStream::new(rx),
            assembled: String::new(),
            usage: None,
            finished: false,
        })
    }

    /// Run a query to completion and return the assembled text.
    pub async fn query_text(
        &self,
        snapshot: Vec<Message>,
        options: QueryOptions,
    ) -> Result<String, ProviderError> {
        self.query(snapshot, options).await?.collect_text().await
    }
}

/// The deltas of one model reply.
///
/// Yields `Ok(delta)` for each non-empty text chunk, then ends. After an
/// `Err` item the stream is finished.
pub struct QueryStream {
    inner: ReceiverStream<Result<StreamChunk, ProviderError>>,
    assembled: String,
    usage: Option<Usage>,
    finished: bool,
}

impl QueryStream {
    /// Everything received so far.
    pub fn assembled(&self) -> &str {
        &self.assembled
    }

    pub fn usage(&self) -> Option<&Usage> {
        self.usage.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Drain the stream, returning the concatenation of every delta.
    pub async fn collect_text(mut self) -> Result<String, ProviderError> {
        while let Some(item) = self.next().await {
            item?;
        }
        Ok(self.assembled)
    }
}

impl Stream for QueryStream {
    type Item = Result<String, ProviderError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if self.finished {
                return Poll::Ready(None);
            }

            let chunk = match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => {
                    // Sender dropped before `done`
                    self.finished = true;
                    return Poll::Ready(Some(Err(ProviderError::StreamInterrupted(
                        "stream closed before completion".into(),
                    ))));
                }
                Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(Some(Ok(chunk))) => chunk,
            };

            if chunk.usage.is_some() {
                self.usage = chunk.usage;
            }
            if chunk.done {
                self.finished = true;
            }

            match chunk.content {
                Some(delta) if !delta.is_empty() => {
                    self.assembled.push_str(&delta);
                    return Poll::Ready(Some(Ok(delta)));
                }
                // Empty or usage-only chunk; keep polling
                _ => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{Script, ScriptedProvider};
    use ferrocall_core::provider::ResponseFormat;

    fn gateway(scripts: Vec<Script>) -> (QueryGateway, Arc<ScriptedProvider>) {
        let provider = Arc::new(ScriptedProvider::new(scripts));
        (QueryGateway::new(provider.clone()), provider)
    }

    #[tokio::test]
    async fn deltas_arrive_in_order_and_concatenate() {
        let (gw, _) = gateway(vec![Script::reply(["Hel", "", "lo", " world"])]);
        let mut stream = gw
            .query(vec![Message::user("hi")], QueryOptions::new("m"))
            .await
            .unwrap();

        let mut seen = Vec::new();
        while let Some(item) = stream.next().await {
            seen.push(item.unwrap());
        }
        assert_eq!(seen, ["Hel", "lo", " world"]);
        assert_eq!(stream.assembled(), "Hello world");
        assert!(stream.is_finished());
    }

    #[tokio::test]
    async fn stream_error_is_terminal() {
        let (gw, _) = gateway(vec![Script::broken(
            ["partial "],
            ProviderError::StreamInterrupted("connection reset".into()),
        )]);
        let mut stream = gw
            .query(vec![Message::user("hi")], QueryOptions::new("m"))
            .await
            .unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap(), "partial ");
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(err.is_stream_error());
        assert!(stream.next().await.is_none());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn request_failure_surfaces_before_stream() {
        let (gw, _) = gateway(vec![Script::Fail(ProviderError::ApiError {
            status_code: 500,
            message: "boom".into(),
        })]);
        let result = gw.query(vec![Message::user("hi")], QueryOptions::new("m")).await;
        match result {
            Err(e) => assert!(e.to_string().contains("API request failed")),
            Ok(_) => panic!("expected request failure"),
        }
    }

    #[tokio::test]
    async fn gateway_sends_snapshot_and_options() {
        let (gw, provider) = gateway(vec![Script::reply(["ok"])]);
        let mut options = QueryOptions::new("llama3.1");
        options.response_format = ResponseFormat::StructuredJson;

        let text = gw
            .query_text(vec![Message::system("sys"), Message::user("hi")], options)
            .await
            .unwrap();
        assert_eq!(text, "ok");

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages.len(), 2);
        assert_eq!(requests[0].options.response_format, ResponseFormat::StructuredJson);
    }
}
