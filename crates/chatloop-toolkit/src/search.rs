//! Web search tool backed by DuckDuckGo's Instant Answer API or Tavily.

use async_trait::async_trait;
use chatloop_core::tools::{Tool, ToolParameterSchema, ToolSchema};
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::time::Duration;

pub const WEB_SEARCH_TOOL_NAME: &str = "web_search";

const DUCKDUCKGO_URL: &str = "https://api.duckduckgo.com/";
const TAVILY_URL: &str = "https://api.tavily.com/search";
const DEFAULT_MAX_RESULTS: usize = 5;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchProvider {
    /// Keyless instant answers.
    DuckDuckGo,
    Tavily { api_key: String },
}

#[derive(Clone, Debug)]
pub struct SearchConfig {
    pub provider: SearchProvider,
    /// Overrides the provider's endpoint (useful for proxies and tests).
    pub api_url: Option<String>,
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self::duckduckgo()
    }
}

impl SearchConfig {
    pub fn duckduckgo() -> Self {
        Self {
            provider: SearchProvider::DuckDuckGo,
            api_url: None,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    pub fn tavily(api_key: impl Into<String>) -> Self {
        Self {
            provider: SearchProvider::Tavily {
                api_key: api_key.into(),
            },
            api_url: None,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = Some(url.into());
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results.max(1);
        self
    }

    fn endpoint(&self) -> &str {
        match (&self.api_url, &self.provider) {
            (Some(url), _) => url,
            (None, SearchProvider::DuckDuckGo) => DUCKDUCKGO_URL,
            (None, SearchProvider::Tavily { .. }) => TAVILY_URL,
        }
    }
}

pub struct WebSearch {
    client: Client,
    config: SearchConfig,
}

impl WebSearch {
    pub fn new(config: SearchConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder()
                .user_agent(concat!("chatloop/", env!("CARGO_PKG_VERSION")))
                .timeout(REQUEST_TIMEOUT)
                .build()?,
            config,
        })
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Run `query` against the configured provider and return a plain-text digest.
    pub async fn search(&self, query: &str, max_results: Option<usize>) -> anyhow::Result<String> {
        let limit = max_results
            .unwrap_or(self.config.max_results)
            .clamp(1, self.config.max_results.max(1));
        let url = self.config.endpoint();

        match &self.config.provider {
            SearchProvider::DuckDuckGo => {
                tracing::info!(%query, "calling DuckDuckGo");
                let data: DuckDuckGoResponse = self
                    .client
                    .get(url)
                    .query(&[
                        ("q", query),
                        ("format", "json"),
                        ("no_html", "1"),
                        ("skip_disambig", "1"),
                    ])
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                Ok(format_duckduckgo(query, &data, limit))
            }
            SearchProvider::Tavily { api_key } => {
                tracing::info!(%query, "calling Tavily");
                let body = TavilyRequest {
                    api_key,
                    query,
                    max_results: limit,
                };
                let data: TavilyResponse = self
                    .client
                    .post(url)
                    .json(&body)
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                Ok(format_tavily(&data, limit))
            }
        }
    }
}

#[async_trait]
impl Tool for WebSearch {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            WEB_SEARCH_TOOL_NAME,
            "Search the web for current information. Returns short text snippets with source URLs.",
            ToolParameterSchema::object(
                "Web search input",
                [
                    (
                        "query".to_string(),
                        ToolParameterSchema::string("What to search for"),
                    ),
                    (
                        "max_results".to_string(),
                        ToolParameterSchema::integer("Maximum number of results to return")
                            .with_minimum(1.0),
                    ),
                ]
                .into_iter()
                .collect(),
                vec!["query".to_string()],
            ),
        )
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let args: SearchArgs = serde_json::from_value(args)?;
        if args.query.trim().is_empty() {
            anyhow::bail!("query must not be empty");
        }
        let digest = self.search(&args.query, args.max_results).await?;
        Ok(Value::String(digest))
    }
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default, deserialize_with = "positive_count")]
    max_results: Option<usize>,
}

/// Integral JSON numbers such as `3` or `3.0`, at least one.
fn positive_count<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(count) = Option::<f64>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if count.fract() != 0.0 || count < 1.0 {
        return Err(serde::de::Error::custom(format!(
            "max_results must be a positive integer, got {count}"
        )));
    }
    Ok(Some(count as usize))
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
}

#[derive(Debug, Default, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DuckDuckGoResponse {
    #[serde(default)]
    heading: String,
    #[serde(default)]
    abstract_text: String,
    #[serde(default, rename = "AbstractURL")]
    abstract_url: String,
    #[serde(default)]
    answer: String,
    #[serde(default)]
    related_topics: Vec<DuckDuckGoTopic>,
}

/// Either a leaf topic or a named group of topics.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DuckDuckGoTopic {
    Group {
        #[serde(rename = "Topics")]
        topics: Vec<DuckDuckGoTopic>,
    },
    Leaf {
        #[serde(rename = "Text", default)]
        text: String,
        #[serde(rename = "FirstURL", default)]
        first_url: String,
    },
}

fn collect_topics<'a>(topics: &'a [DuckDuckGoTopic], out: &mut Vec<(&'a str, &'a str)>) {
    for topic in topics {
        match topic {
            DuckDuckGoTopic::Group { topics } => collect_topics(topics, out),
            DuckDuckGoTopic::Leaf { text, first_url } if !text.is_empty() => {
                out.push((text.as_str(), first_url.as_str()))
            }
            DuckDuckGoTopic::Leaf { .. } => {}
        }
    }
}

fn format_duckduckgo(query: &str, data: &DuckDuckGoResponse, limit: usize) -> String {
    let mut lines = Vec::new();
    if !data.answer.is_empty() {
        lines.push(format!("Answer: {}", data.answer));
    }
    if !data.abstract_text.is_empty() {
        let heading: &str = if data.heading.is_empty() {
            query
        } else {
            &data.heading
        };
        lines.push(format!("{heading}: {}", data.abstract_text));
        if !data.abstract_url.is_empty() {
            lines.push(format!("Source: {}", data.abstract_url));
        }
    }

    let mut topics = Vec::new();
    collect_topics(&data.related_topics, &mut topics);
    if !topics.is_empty() {
        lines.push("Related:".into());
        for (text, url) in topics.into_iter().take(limit) {
            lines.push(format!("- {text} ({url})"));
        }
    }

    if lines.is_empty() {
        format!("No results found for '{query}'.")
    } else {
        lines.join("\n")
    }
}

fn format_tavily(data: &TavilyResponse, limit: usize) -> String {
    let mut lines = Vec::new();
    if let Some(answer) = data.answer.as_deref().filter(|a| !a.is_empty()) {
        lines.push(format!("Answer: {answer}"));
    }
    if data.results.is_empty() {
        lines.push("No results returned.".into());
    } else {
        lines.push("Top results:".into());
        for result in data.results.iter().take(limit) {
            lines.push(format!("- {} ({})", result.title, result.url));
            if !result.content.is_empty() {
                lines.push(format!("  {}", result.content));
            }
        }
    }
    lines.join("\n")
}
