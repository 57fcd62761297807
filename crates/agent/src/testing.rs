//! Scripted doubles for the model-backed seams. Used by this crate's tests and
//! by the server's router tests, which run the runtime without a live model.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::extraction::{
    ExtractionError, ExtractionRequest, ExtractionResult, SlotExtractor,
};
use crate::guardrails::{Classification, ClassifierError, ClassifierLabel, TextClassifier};
use crate::llm::LlmClient;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Classifier that always answers with the same label.
pub struct ScriptedClassifier {
    answer: Option<Classification>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedClassifier {
    pub fn valid() -> Self {
        Self::labelled(ClassifierLabel::Valid, 0.95)
    }

    pub fn labelled(label: ClassifierLabel, confidence: f32) -> Self {
        Self {
            answer: Some(Classification { label, confidence }),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self { answer: None, delay: None, calls: AtomicUsize::new(0) }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextClassifier for ScriptedClassifier {
    async fn classify(&self, _text: &str) -> Result<Classification, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.answer.ok_or_else(|| ClassifierError::Backend("scripted failure".to_string()))
    }
}

/// Model client that replays canned completions in order and records every
/// prompt it receives. The last reply repeats once the script runs out.
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<String>>,
    last: Mutex<Option<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn replying(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|reply| reply.to_string()).collect()),
            last: Mutex::new(None),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, prompt: &str) -> Result<String> {
        lock(&self.prompts).push(prompt.to_string());
        let next = lock(&self.replies).pop_front();
        let mut last = lock(&self.last);
        match next {
            Some(reply) => {
                *last = Some(reply.clone());
                Ok(reply)
            }
            None => last.clone().ok_or_else(|| anyhow!("scripted model has no replies")),
        }
    }
}

/// Extractor that replays scripted results. An exhausted script yields an
/// empty extraction; `failing` errors on every call.
pub struct ScriptedExtractor {
    script: Mutex<VecDeque<Result<ExtractionResult, String>>>,
    always_fail: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedExtractor {
    pub fn new(script: Vec<Result<ExtractionResult, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            always_fail: false,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self { always_fail: true, ..Self::new(Vec::new()) }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SlotExtractor for ScriptedExtractor {
    async fn extract(
        &self,
        _request: &ExtractionRequest<'_>,
    ) -> Result<ExtractionResult, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.always_fail {
            return Err(ExtractionError::Backend("scripted failure".to_string()));
        }
        match lock(&self.script).pop_front() {
            Some(Ok(result)) => Ok(result),
            Some(Err(message)) => Err(ExtractionError::Backend(message)),
            None => Ok(ExtractionResult::default()),
        }
    }
}
