//! Web Search
//!
//! Lets the model find pages about a topic before fetching them. The default
//! backend is DuckDuckGo's Instant Answer API, which needs no key.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const DUCKDUCKGO_API: &str = "https://api.duckduckgo.com/";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Returns at most `max_results` hits for `query`.
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>>;
}

pub struct DuckDuckGoSearch {
    http: reqwest::Client,
    endpoint: String,
}

impl DuckDuckGoSearch {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_endpoint(http, DUCKDUCKGO_API)
    }

    pub fn with_endpoint(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }
}

#[derive(Deserialize)]
struct InstantAnswer {
    #[serde(rename = "Heading", default)]
    heading: String,
    #[serde(rename = "AbstractURL", default)]
    abstract_url: String,
    #[serde(rename = "AbstractText", default)]
    abstract_text: String,
    #[serde(rename = "RelatedTopics", default)]
    related_topics: Vec<RelatedTopic>,
}

/// Either a single result or a named group of results.
#[derive(Deserialize)]
struct RelatedTopic {
    #[serde(rename = "FirstURL")]
    first_url: Option<String>,
    #[serde(rename = "Text")]
    text: Option<String>,
    #[serde(rename = "Topics", default)]
    topics: Vec<RelatedTopic>,
}

impl RelatedTopic {
    fn flatten(self, hits: &mut Vec<SearchHit>) {
        if let (Some(url), Some(text)) = (self.first_url, self.text) {
            let title = text.split(" - ").next().unwrap_or(&text).to_string();
            hits.push(SearchHit {
                title,
                url,
                snippet: text,
            });
        }
        for topic in self.topics {
            topic.flatten(hits);
        }
    }
}

/// Converts an Instant Answer response body into hits, abstract first.
pub fn parse_instant_answer(body: &str, max_results: usize) -> Result<Vec<SearchHit>> {
    let answer: InstantAnswer =
        serde_json::from_str(body).context("Unexpected search response")?;
    let mut hits = Vec::new();
    if !answer.abstract_url.is_empty() {
        hits.push(SearchHit {
            title: answer.heading,
            url: answer.abstract_url,
            snippet: answer.abstract_text,
        });
    }
    for topic in answer.related_topics {
        topic.flatten(&mut hits);
    }
    hits.truncate(max_results);
    Ok(hits)
}

#[async_trait]
impl WebSearch for DuckDuckGoSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        let body = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_redirect", "1"),
                ("no_html", "1"),
            ])
            .header(reqwest::header::USER_AGENT, "parlare/0.1")
            .send()
            .await
            .with_context(|| format!("Search request for '{}' failed", query))?
            .error_for_status()?
            .text()
            .await?;
        let hits = parse_instant_answer(&body, max_results)?;
        info!(%query, hits = hits.len(), "Web search finished");
        Ok(hits)
    }
}
