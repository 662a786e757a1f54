//! Shared test helpers for loop and pipeline tests.

use buildloop_core::{
    ActionCall, Message, Provider, ProviderError, ProviderRequest, ProviderResponse, StopReason,
    Usage,
};
use serde_json::Value;
use std::sync::Mutex;

type Responder = Box<dyn Fn(&ProviderRequest) -> ProviderResponse + Send + Sync>;

/// A provider that plays back scripted responses and records every request.
///
/// Scripted responses are returned in order. Once they run out, the
/// fallback (if any) answers every further call; without one the call
/// fails with a malformed-response error.
pub struct ScriptedProvider {
    script: Mutex<Vec<ProviderResponse>>,
    fallback: Option<Responder>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        let mut script = responses;
        script.reverse();
        Self {
            script: Mutex::new(script),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer every call with a clone of `response`.
    pub fn repeating(response: ProviderResponse) -> Self {
        Self::new(vec![]).then_respond(move |_| response.clone())
    }

    /// Compute each response from the request.
    pub fn from_fn(responder: impl Fn(&ProviderRequest) -> ProviderResponse + Send + Sync + 'static) -> Self {
        Self::new(vec![]).then_respond(responder)
    }

    pub fn then_respond(
        mut self,
        responder: impl Fn(&ProviderRequest) -> ProviderResponse + Send + Sync + 'static,
    ) -> Self {
        self.fallback = Some(Box::new(responder));
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> Option<ProviderRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };

        if let Some(response) = self.script.lock().unwrap().pop() {
            return Ok(response);
        }
        match &self.fallback {
            Some(responder) => Ok(responder(&request)),
            None => Err(ProviderError::MalformedResponse(format!(
                "scripted provider has no response for call #{call}"
            ))),
        }
    }
}

fn usage() -> Usage {
    Usage {
        input_tokens: 100,
        output_tokens: 20,
        cache_read_tokens: 80,
        cache_write_tokens: 0,
    }
}

fn response(message: Message, stop_reason: StopReason) -> ProviderResponse {
    ProviderResponse {
        message,
        stop_reason,
        usage: usage(),
        model: "mock-model".into(),
    }
}

/// Narration only, no actions.
pub fn text_response(text: &str) -> ProviderResponse {
    response(Message::assistant(text), StopReason::EndTurn)
}

/// One or more action calls.
pub fn calls_response(calls: Vec<ActionCall>) -> ProviderResponse {
    response(Message::assistant_with_calls("", calls), StopReason::ToolUse)
}

/// A single action call.
pub fn call_response(name: &str, input: Value) -> ProviderResponse {
    calls_response(vec![call(name, input)])
}

/// A response cut off at the output limit.
pub fn truncated_response(calls: Vec<ActionCall>) -> ProviderResponse {
    response(Message::assistant_with_calls("Here is the fi", calls), StopReason::MaxTokens)
}

pub fn call(name: &str, input: Value) -> ActionCall {
    ActionCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        input,
    }
}
