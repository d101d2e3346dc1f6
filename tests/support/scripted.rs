//! Transport that replays canned responses and records what was sent.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use storecheck::core::{Result, StoreError};
use storecheck::transport::{Envelope, Request, Response, Transport};

#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<Response>>>,
    sent: Mutex<Vec<Envelope>>,
}

impl ScriptedTransport {
    pub fn new<I>(script: I) -> Self
    where
        I: IntoIterator<Item = Result<Response>>,
    {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn sent_requests(&self) -> Vec<Request> {
        self.sent().into_iter().map(|e| e.request).collect()
    }

    pub fn sent_kinds(&self) -> Vec<&'static str> {
        self.sent().iter().map(|e| e.request.kind()).collect()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn call(&self, envelope: Envelope) -> Result<Response> {
        let kind = envelope.request.kind();
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(envelope);
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        next.unwrap_or_else(|| Err(StoreError::Transport(format!("no scripted response for '{}'", kind))))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
