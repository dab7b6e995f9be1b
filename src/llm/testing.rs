//! Test doubles for the completion layer.

use super::{
    CompletionRequest, CompletionResponse, CompletionService, JitterSource, ResilientCaller,
    Sleeper, TokenUsage,
};
use crate::Result;
use crate::security::CallAuditLog;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

type Responder = dyn Fn(&CompletionRequest) -> Result<String> + Send + Sync;

/// Completion service answering through a closure.
pub struct MockCompletion {
    responder: Box<Responder>,
    calls: AtomicU32,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockCompletion {
    pub fn new(
        responder: impl Fn(&CompletionRequest) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl CompletionService for MockCompletion {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        (self.responder)(request).map(|text| CompletionResponse {
            text,
            usage: TokenUsage {
                input: 100,
                output: 25,
            },
        })
    }
}

pub struct NoSleep;

impl Sleeper for NoSleep {
    fn sleep(&self, _duration: Duration) {}
}

pub struct NoJitter;

impl JitterSource for NoJitter {
    fn jitter(&self, _max: Duration) -> Duration {
        Duration::ZERO
    }
}

/// A caller around `service` that never sleeps.
pub fn instant_caller(service: Arc<MockCompletion>) -> ResilientCaller {
    ResilientCaller::new(service, Arc::new(CallAuditLog::in_memory()))
        .with_sleeper(Arc::new(NoSleep))
        .with_jitter(Arc::new(NoJitter))
}

/// The last user message of a request.
pub fn user_message(request: &CompletionRequest) -> &str {
    request.user_messages.last().map_or("", String::as_str)
}
