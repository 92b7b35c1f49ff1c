use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::info;

/// Knowledge base compiled into the binary; used when no path is configured.
pub const BUILTIN_KNOWLEDGE_BASE: &str = include_str!("../../../data/knowledge_base.json");

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("could not read knowledge base `{path}`: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("invalid knowledge base: {0}")]
    Parse(String),
    #[error("knowledge base contains no documents")]
    Empty,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentKind {
    Plan,
    Policy,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Document {
    pub key: String,
    pub kind: DocumentKind,
    pub content: String,
}

#[derive(Deserialize)]
struct RawKnowledgeBase {
    #[serde(default)]
    plans: Map<String, Value>,
    #[serde(default)]
    policies: Map<String, Value>,
}

#[derive(Deserialize)]
struct PlanEntry {
    name: String,
    description: String,
}

#[derive(Deserialize)]
struct PolicyEntry {
    title: String,
    description: String,
}

/// Flattens the knowledge base JSON into passages, plans first, in file order.
pub fn parse_knowledge_base(raw: &str) -> Result<Vec<Document>, RetrievalError> {
    let parsed: RawKnowledgeBase =
        serde_json::from_str(raw).map_err(|err| RetrievalError::Parse(err.to_string()))?;

    let mut documents = Vec::with_capacity(parsed.plans.len() + parsed.policies.len());
    for (key, value) in parsed.plans {
        let plan: PlanEntry = serde_json::from_value(value)
            .map_err(|err| RetrievalError::Parse(format!("plan `{key}`: {err}")))?;
        documents.push(Document {
            key,
            kind: DocumentKind::Plan,
            content: format!("{}: {}", plan.name, plan.description),
        });
    }
    for (key, value) in parsed.policies {
        let policy: PolicyEntry = serde_json::from_value(value)
            .map_err(|err| RetrievalError::Parse(format!("policy `{key}`: {err}")))?;
        documents.push(Document {
            key,
            kind: DocumentKind::Policy,
            content: format!("{}: {}", policy.title, policy.description),
        });
    }

    if documents.is_empty() {
        return Err(RetrievalError::Empty);
    }
    Ok(documents)
}

pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Local embedder: hashed unigram and bigram features, L2-normalised.
#[derive(Clone, Debug)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions: dimensions.max(1) }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let hash = fnv1a(feature.as_bytes());
        let bucket = (hash % self.dimensions as u64) as usize;
        let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimensions];
        let tokens = tokenize(text);

        for token in &tokens {
            self.add_feature(&mut vector, token, 1.0);
        }
        for pair in tokens.windows(2) {
            self.add_feature(&mut vector, &format!("{} {}", pair[0], pair[1]), 0.5);
        }

        let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|value| *value /= norm);
        }
        vector
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| stem(&token.to_lowercase()))
        .collect()
}

fn stem(token: &str) -> String {
    if token.len() > 3 && token.ends_with('s') && !token.ends_with("ss") {
        token[..token.len() - 1].to_string()
    } else {
        token.to_string()
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn cosine(left: &[f32], right: &[f32]) -> f32 {
    let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
    let left_norm = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|value| value * value).sum::<f32>().sqrt();
    if left_norm == 0.0 || right_norm == 0.0 {
        0.0
    } else {
        dot / (left_norm * right_norm)
    }
}

/// Immutable, pre-embedded corpus.
pub struct SemanticIndex {
    documents: Vec<Document>,
    vectors: Vec<Vec<f32>>,
    embedder: Box<dyn Embedder>,
}

impl SemanticIndex {
    pub fn build(documents: Vec<Document>, embedder: Box<dyn Embedder>) -> Self {
        let vectors = documents.iter().map(|document| embedder.embed(&document.content)).collect();
        Self { documents, vectors, embedder }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn search(&self, query: &str, top_k: usize) -> Vec<&Document> {
        let query_vector = self.embedder.embed(query);
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(index, vector)| (index, cosine(vector, &query_vector)))
            .collect();

        // stable sort keeps corpus order for equal scores
        scored.sort_by(|left, right| right.1.total_cmp(&left.1));
        scored.into_iter().take(top_k).map(|(index, _)| &self.documents[index]).collect()
    }
}

#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<String>, RetrievalError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KnowledgeSource {
    Builtin,
    File(PathBuf),
}

impl KnowledgeSource {
    pub fn from_path(path: Option<&Path>) -> Self {
        path.map(|path| Self::File(path.to_path_buf())).unwrap_or(Self::Builtin)
    }

    pub async fn load(&self) -> Result<Vec<Document>, RetrievalError> {
        match self {
            Self::Builtin => parse_knowledge_base(BUILTIN_KNOWLEDGE_BASE),
            Self::File(path) => {
                let raw = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|source| RetrievalError::Read { path: path.clone(), source })?;
                parse_knowledge_base(&raw)
            }
        }
    }
}

/// Shared retrieval handle. The index is built on first use, exactly once per handle;
/// a failed build is retried on the next call.
pub struct LazyKnowledgeRetriever {
    source: KnowledgeSource,
    dimensions: usize,
    index: OnceCell<Arc<SemanticIndex>>,
}

impl LazyKnowledgeRetriever {
    pub fn new(source: KnowledgeSource, dimensions: usize) -> Self {
        Self { source, dimensions, index: OnceCell::new() }
    }

    pub fn builtin() -> Self {
        Self::new(KnowledgeSource::Builtin, 256)
    }

    pub fn is_initialized(&self) -> bool {
        self.index.initialized()
    }

    pub async fn index(&self) -> Result<Arc<SemanticIndex>, RetrievalError> {
        let index = self
            .index
            .get_or_try_init(|| async {
                let documents = self.source.load().await?;
                let index =
                    SemanticIndex::build(documents, Box::new(HashingEmbedder::new(self.dimensions)));
                info!(
                    event_name = "agent.retrieval.index_initialized",
                    documents = index.len(),
                    dimensions = self.dimensions,
                    "knowledge index initialized"
                );
                Ok::<_, RetrievalError>(Arc::new(index))
            })
            .await?;
        Ok(Arc::clone(index))
    }
}

#[async_trait]
impl Retriever for LazyKnowledgeRetriever {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<String>, RetrievalError> {
        let index = self.index().await?;
        Ok(index.search(query, top_k).into_iter().map(|document| document.content.clone()).collect())
    }
}
