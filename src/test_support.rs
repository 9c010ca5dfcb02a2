//! Deterministic fakes shared by unit tests.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use markdown_rag_core::chunk::{chunk_documents, ChunkerOptions};
use markdown_rag_core::embedding::EmbeddingProvider;
use markdown_rag_core::models::{Chunk, Document};

use crate::llm::{ChatMessage, ChatModel};

const WORD_DIMS: usize = 512;

/// Bag-of-words embedder. Each new lowercase token gets the next slot, so
/// texts sharing words score above zero and texts sharing none score zero.
/// Build and query must share one instance.
#[derive(Default)]
pub struct WordEmbedder {
    vocab: Mutex<HashMap<String, usize>>,
}

impl WordEmbedder {
    fn vector(&self, text: &str) -> Vec<f32> {
        let mut vocab = self.vocab.lock().unwrap();
        let mut v = vec![0.0; WORD_DIMS];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let next = vocab.len();
            let slot = *vocab.entry(token.to_lowercase()).or_insert(next);
            v[slot % WORD_DIMS] += 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for WordEmbedder {
    fn model_name(&self) -> &str {
        "word-test"
    }

    fn dims(&self) -> usize {
        WORD_DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

/// Returns a constant vector and counts `embed` calls.
#[derive(Default)]
pub struct CountingEmbedder {
    calls: AtomicUsize,
}

impl CountingEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for CountingEmbedder {
    fn model_name(&self) -> &str {
        "counting-test"
    }

    fn dims(&self) -> usize {
        4
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0, 0.0]).collect())
    }
}

pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing-test"
    }

    fn dims(&self) -> usize {
        4
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("provider unreachable")
    }
}

/// Chunk `(source, text)` pairs with the default options.
pub fn word_chunks(docs: &[(&str, &str)]) -> Vec<Chunk> {
    let docs: Vec<Document> = docs.iter().map(|(s, t)| Document::new(*s, *t)).collect();
    chunk_documents(&docs, &ChunkerOptions::default())
}

/// Sets a flag when dropped, so tests can observe that a future was torn
/// down.
pub struct DropFlag(pub Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// A chat model that replays queued replies and records every request.
/// Runs out of replies with an error.
pub struct ScriptedChat {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
    delay: Option<Duration>,
    dropped: Arc<AtomicBool>,
}

impl ScriptedChat {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            requests: Mutex::new(Vec::new()),
            delay: None,
            dropped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A model whose every call waits far longer than any test deadline.
    pub fn hanging() -> Self {
        Self::new(&[]).with_delay(Duration::from_secs(3600))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }

    /// True once an in-flight call has been dropped before finishing.
    pub fn was_interrupted(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    fn model_name(&self) -> &str {
        "scripted-test"
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.requests.lock().unwrap().push(messages.to_vec());
        if let Some(delay) = self.delay {
            let guard = DropFlag(self.dropped.clone());
            tokio::time::sleep(delay).await;
            std::mem::forget(guard);
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted reply left"))
    }
}
