//! In-process fakes for the two external capabilities.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{LlmError, SearchError};
use crate::llm::{GenerationOptions, ModelInfo, TextGenerator};
use crate::search::{SearchHit, SearchProvider};

/// Replays canned responses in order and records every prompt it saw.
pub(crate) struct ScriptedGenerator {
    responses: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedGenerator {
    pub fn new<I, S>(responses: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().map(|r| Ok(r.into())).collect()),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// A generator whose first call fails with a request error.
    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::from([Err(message.to_string())])),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// `(system_prompt, user_prompt)` pairs, in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn invoke(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<String, LlmError> {
        self.calls
            .lock()
            .unwrap()
            .push((system_prompt.to_string(), user_prompt.to_string()));
        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(LlmError::Request { message }),
            None => Err(LlmError::Request {
                message: "script exhausted".to_string(),
            }),
        }
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "scripted".to_string(),
            model: "test".to_string(),
            api_base: "memory".to_string(),
        }
    }
}

/// Returns the same hits for every query.
pub(crate) struct StaticSearch {
    hits: Vec<SearchHit>,
    fail: bool,
    queries: Mutex<Vec<String>>,
}

impl StaticSearch {
    pub fn new(hits: Vec<SearchHit>) -> Arc<Self> {
        Arc::new(Self {
            hits,
            fail: false,
            queries: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            hits: Vec::new(),
            fail: true,
            queries: Mutex::new(Vec::new()),
        })
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchProvider for StaticSearch {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        _timeout_secs: u64,
    ) -> Result<Vec<SearchHit>, SearchError> {
        self.queries.lock().unwrap().push(query.to_string());
        if self.fail {
            return Err(SearchError::Request {
                message: "search backend unreachable".to_string(),
            });
        }
        Ok(self.hits.iter().take(max_results).cloned().collect())
    }
}

/// `n` distinct hits on example.com.
pub(crate) fn hits(n: usize) -> Vec<SearchHit> {
    (1..=n)
        .map(|i| SearchHit {
            title: format!("Result {}", i),
            url: format!("https://example.com/{}", i),
            content: format!("Finding number {} about the topic.", i),
            score: Some(1.0 - i as f64 / 10.0),
        })
        .collect()
}
