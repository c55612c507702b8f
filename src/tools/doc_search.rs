//! DocSearch 工具：本地文档的向量相似度检索
//!
//! 文档在首次查询时懒加载嵌入并缓存；查询返回余弦相似度最高的 top_k 篇（标题 + 片段）。

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::llm::{cosine_similarity, EmbeddingProvider};
use crate::tools::Tool;

/// 每篇文档返回的片段最大字符数
const SNIPPET_CHARS: usize = 400;

#[derive(Debug, Clone)]
pub struct Document {
    pub title: String,
    pub content: String,
}

pub struct DocSearchTool {
    embedder: Arc<dyn EmbeddingProvider>,
    documents: Vec<Document>,
    top_k: usize,
    /// 与 documents 一一对应；None 表示尚未计算
    embeddings: Mutex<Option<Vec<Vec<f32>>>>,
}

impl DocSearchTool {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, documents: Vec<Document>, top_k: usize) -> Self {
        Self {
            embedder,
            documents,
            top_k: top_k.max(1),
            embeddings: Mutex::new(None),
        }
    }

    /// 读取目录下的 .md / .txt 文件作为文档（不递归）
    pub fn load_dir(dir: &Path) -> std::io::Result<Vec<Document>> {
        let mut docs = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_text = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("md") || e.eq_ignore_ascii_case("txt"))
                .unwrap_or(false);
            if !is_text {
                continue;
            }
            let content = std::fs::read_to_string(&path)?;
            let title = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("untitled")
                .to_string();
            docs.push(Document { title, content });
        }
        docs.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(docs)
    }

    async fn ensure_embeddings(&self) -> Result<Vec<Vec<f32>>, String> {
        let mut guard = self.embeddings.lock().await;
        if let Some(cached) = guard.as_ref() {
            return Ok(cached.clone());
        }
        let mut vectors = Vec::with_capacity(self.documents.len());
        for doc in &self.documents {
            let v = self
                .embedder
                .embed(&doc.content)
                .await
                .map_err(|e| format!("Embedding failed for '{}': {}", doc.title, e))?;
            vectors.push(v);
        }
        *guard = Some(vectors.clone());
        Ok(vectors)
    }
}

#[async_trait]
impl Tool for DocSearchTool {
    fn name(&self) -> &str {
        "DocSearch"
    }

    fn description(&self) -> &str {
        "Searches the local document collection by semantic similarity and returns the most relevant passages. Input should be a search query."
    }

    async fn execute(&self, args: &str) -> Result<String, String> {
        let query = args.trim();
        if query.is_empty() {
            return Err("Missing query".to_string());
        }
        if self.documents.is_empty() {
            return Err("Document collection is empty".to_string());
        }
        let doc_vectors = self.ensure_embeddings().await?;
        let q = self.embedder.embed(query).await.map_err(|e| e.to_string())?;

        let mut scored: Vec<(f32, &Document)> = doc_vectors
            .iter()
            .zip(&self.documents)
            .map(|(v, d)| (cosine_similarity(&q, v), d))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let out = scored
            .into_iter()
            .take(self.top_k)
            .map(|(score, doc)| {
                let snippet: String = doc.content.chars().take(SNIPPET_CHARS).collect();
                format!("[{}] (score {:.3})\n{}", doc.title, score, snippet.trim())
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        Ok(out)
    }

    async fn cleanup(&self) {
        *self.embeddings.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    fn docs() -> Vec<Document> {
        vec![
            Document {
                title: "tokio".into(),
                content: "Tokio is an asynchronous runtime for Rust with tasks and timers.".into(),
            },
            Document {
                title: "baking".into(),
                content: "Sourdough bread needs flour, water, salt and a starter.".into(),
            },
        ]
    }

    #[tokio::test]
    async fn test_most_similar_document_first() {
        let tool = DocSearchTool::new(Arc::new(MockLlmClient::new()), docs(), 1);
        let out = tool.execute("asynchronous runtime for Rust").await.unwrap();
        assert!(out.starts_with("[tokio]"), "got {out}");
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let tool = DocSearchTool::new(Arc::new(MockLlmClient::new()), docs(), 2);
        assert!(tool.execute("  ").await.is_err());
    }

    #[test]
    fn test_load_dir_reads_text_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "alpha").unwrap();
        std::fs::write(dir.path().join("b.txt"), "beta").unwrap();
        std::fs::write(dir.path().join("c.bin"), "skip").unwrap();
        let docs = DocSearchTool::load_dir(dir.path()).unwrap();
        let titles: Vec<_> = docs.iter().map(|d| d.title.as_str()).collect();
        assert_eq!(titles, vec!["a", "b"]);
    }
}
