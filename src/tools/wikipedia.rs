//! Wikipedia 工具：调用 REST 摘要接口（/api/rest_v1/page/summary/{title}）

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;

use crate::tools::search::truncate_chars;
use crate::tools::Tool;

#[derive(Debug, Deserialize)]
struct Summary {
    #[serde(default)]
    title: String,
    #[serde(default)]
    extract: String,
    #[serde(rename = "type", default)]
    kind: String,
}

pub struct WikipediaTool {
    client: Client,
    base_url: String,
    max_result_chars: usize,
}

impl WikipediaTool {
    pub fn new(language: &str, timeout_secs: u64, max_result_chars: usize) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent(concat!("rewoo/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: format!("https://{}.wikipedia.org/api/rest_v1/page/summary", language),
            max_result_chars,
        }
    }

    /// 标题作为单个路径段追加，`/`、`#`、`%` 等字符由 Url 负责转义
    fn summary_url(&self, query: &str) -> Result<Url, String> {
        let mut url =
            Url::parse(&self.base_url).map_err(|e| format!("Invalid Wikipedia URL: {}", e))?;
        url.path_segments_mut()
            .map_err(|_| "Invalid Wikipedia URL".to_string())?
            .push(&title_slug(query));
        Ok(url)
    }
}

/// 页面标题：空格转下划线，保留原有大小写
fn title_slug(query: &str) -> String {
    query
        .trim()
        .trim_matches('"')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

#[async_trait]
impl Tool for WikipediaTool {
    fn name(&self) -> &str {
        "Wikipedia"
    }

    fn description(&self) -> &str {
        "Looks up the summary of a Wikipedia article. Useful for facts about people, places, companies, historical events. Input should be the article title, e.g. Wikipedia[Alan Turing]."
    }

    async fn execute(&self, args: &str) -> Result<String, String> {
        if args.trim().is_empty() {
            return Err("Missing article title".to_string());
        }
        let url = self.summary_url(args)?;
        tracing::info!(url = %url, "wikipedia lookup");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(format!("No Wikipedia article titled '{}'", args.trim()));
        }
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let summary: Summary = resp
            .json()
            .await
            .map_err(|e| format!("Invalid response: {}", e))?;
        if summary.kind == "disambiguation" {
            return Err(format!(
                "'{}' is ambiguous on Wikipedia; use a more specific title",
                summary.title
            ));
        }
        if summary.extract.trim().is_empty() {
            return Err(format!("Article '{}' has no summary", summary.title));
        }
        Ok(truncate_chars(summary.extract, self.max_result_chars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_slug() {
        assert_eq!(title_slug(" Alan  Turing "), "Alan_Turing");
        assert_eq!(title_slug("\"AC/DC\""), "AC/DC");
    }

    #[test]
    fn test_summary_url_uses_language() {
        let tool = WikipediaTool::new("zh", 1, 100);
        assert_eq!(
            tool.summary_url("Rust").unwrap().as_str(),
            "https://zh.wikipedia.org/api/rest_v1/page/summary/Rust"
        );
    }

    #[test]
    fn test_summary_url_keeps_reserved_characters_in_title() {
        let tool = WikipediaTool::new("en", 1, 100);
        let url = tool.summary_url("AC/DC #E1").unwrap();
        assert!(url.as_str().ends_with("/page/summary/AC%2FDC_%23E1"), "{url}");
        assert!(url.fragment().is_none());
        assert_eq!(url.query(), None);

        let url = tool.summary_url("100% Rock & Roll?").unwrap();
        assert!(url.as_str().ends_with("/page/summary/100%25_Rock_&_Roll%3F"), "{url}");
        assert_eq!(url.query(), None);
    }

    #[test]
    fn test_summary_deserializes_with_missing_fields() {
        let s: Summary = serde_json::from_str(r#"{"title":"Rust","extract":"A language."}"#).unwrap();
        assert_eq!(s.extract, "A language.");
        assert!(s.kind.is_empty());
    }
}
