//! Shared test helpers: a provider that streams scripted replies.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use ferrocall_core::error::ProviderError;
use ferrocall_core::provider::{ChunkReceiver, Provider, ProviderRequest, StreamChunk};
use tokio::sync::mpsc;

/// One scripted provider answer.
pub enum Script {
    /// Stream these deltas, then `done`
    Reply(Vec<String>),
    /// Stream these deltas, then a terminal error
    Broken(Vec<String>, ProviderError),
    /// Refuse the request outright
    Fail(ProviderError),
}

impl Script {
    pub fn reply<I, S>(deltas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Reply(deltas.into_iter().map(Into::into).collect())
    }

    pub fn text(text: &str) -> Self {
        Self::Reply(vec![text.to_string()])
    }

    pub fn broken<I, S>(deltas: I, error: ProviderError) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Broken(deltas.into_iter().map(Into::into).collect(), error)
    }
}

/// Streams the next script for every request and records what it was sent.
///
/// Panics if more requests are made than scripts provided.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .expect("ScriptedProvider: no more scripted responses");

        let (deltas, tail) = match script {
            Script::Fail(e) => return Err(e),
            Script::Reply(deltas) => (deltas, Ok(StreamChunk::finished(None))),
            Script::Broken(deltas, e) => (deltas, Err(e)),
        };

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for delta in deltas {
                if tx.send(Ok(StreamChunk::delta(delta))).await.is_err() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            let _ = tx.send(tail).await;
        });
        Ok(rx)
    }
}
