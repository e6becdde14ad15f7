//! In-memory provider doubles for exercising the runtime without a network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use helmsman_core::ProviderError;
use tokio_util::sync::CancellationToken;

use crate::llm::{ChatTurn, CompletionProvider, CompletionResponse, CompletionSettings};
use crate::tools::CapabilityRegistry;

type ScriptedOutcome = Result<CompletionResponse, ProviderError>;

/// One request as the provider saw it.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedRequest {
    pub history: Vec<ChatTurn>,
    pub settings: CompletionSettings,
    pub capability_count: usize,
}

/// Replays a fixed script of outcomes. The last outcome repeats once the
/// script is exhausted.
#[derive(Debug)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<ScriptedOutcome>>,
    requests: Mutex<Vec<RecordedRequest>>,
    calls: AtomicUsize,
    latency: Option<Duration>,
    cancel_on_call: Option<CancellationToken>,
    bounds_requests: bool,
}

impl ScriptedProvider {
    pub fn new(script: Vec<ScriptedOutcome>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            latency: None,
            cancel_on_call: None,
            bounds_requests: false,
        }
    }

    pub fn repeating(outcome: ScriptedOutcome) -> Self {
        Self::new(vec![outcome])
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fires `token` from inside every call, before the outcome is returned.
    pub fn cancel_on_call(mut self, token: CancellationToken) -> Self {
        self.cancel_on_call = Some(token);
        self
    }

    /// Reports that requests carry their own deadline, like the HTTP provider.
    pub fn bounding_requests(mut self) -> Self {
        self.bounds_requests = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|requests| requests.clone()).unwrap_or_default()
    }

    fn next_outcome(&self) -> ScriptedOutcome {
        let Ok(mut script) = self.script.lock() else {
            return Err(ProviderError::UnexpectedResponse("script lock poisoned".to_string()));
        };
        match script.len() {
            0 => Err(ProviderError::UnexpectedResponse("script is empty".to_string())),
            1 => script[0].clone(),
            _ => script.pop_front().unwrap_or_else(|| {
                Err(ProviderError::UnexpectedResponse("script is empty".to_string()))
            }),
        }
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn provider_id(&self) -> &str {
        "scripted"
    }

    fn bounds_requests(&self) -> bool {
        self.bounds_requests
    }

    async fn complete(
        &self,
        history: &[ChatTurn],
        settings: &CompletionSettings,
        capabilities: &CapabilityRegistry,
    ) -> Result<CompletionResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(RecordedRequest {
                history: history.to_vec(),
                settings: settings.clone(),
                capability_count: capabilities.len(),
            });
        }

        let outcome = self.next_outcome();
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(token) = &self.cancel_on_call {
            token.cancel();
        }
        outcome
    }
}
