//! Command line and environment configuration.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use chatloop_core::persistence::{Checkpointer, InMemoryCheckpointer};
use chatloop_persistence::{FileCheckpointer, SqliteCheckpointer};
use chatloop_runtime::providers::{DEFAULT_MODEL, GROQ_API_URL};
use chatloop_runtime::{
    ChatAgent, ConfigurableAgentBuilder, OpenAiChatModel, OpenAiConfig, DEFAULT_MAX_TOOL_ROUNDS,
    DEFAULT_SYSTEM_PROMPT,
};
use chatloop_toolkit::SearchConfig;
use clap::{Parser, ValueEnum};

/// Where checkpoints are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    /// SQLite database file at `--database`.
    Sqlite,
    /// One directory per thread under `--database`.
    File,
    /// Process memory; lost on restart.
    Memory,
    /// PostgreSQL at the `--database` URL.
    #[cfg(feature = "postgres")]
    Postgres,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SearchKind {
    #[value(name = "duckduckgo")]
    DuckDuckGo,
    Tavily,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "chatloop-server", version, about = "Tool-using chat agent over HTTP and SSE")]
pub struct Cli {
    /// Address to listen on.
    #[arg(long, env = "CHATLOOP_ADDR", default_value = "0.0.0.0:8000")]
    pub addr: SocketAddr,

    /// API key for the OpenAI-compatible endpoint.
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    pub api_key: String,

    #[arg(long, env = "CHATLOOP_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Chat completions URL.
    #[arg(long, env = "CHATLOOP_API_URL", default_value = GROQ_API_URL)]
    pub api_url: String,

    #[arg(long, env = "CHATLOOP_SYSTEM_PROMPT")]
    pub system_prompt: Option<String>,

    #[arg(long, env = "CHATLOOP_MAX_TOOL_ROUNDS", default_value_t = DEFAULT_MAX_TOOL_ROUNDS)]
    pub max_tool_rounds: usize,

    #[arg(long, env = "CHATLOOP_STORE", value_enum, default_value_t = StoreKind::Sqlite)]
    pub store: StoreKind,

    /// SQLite file, checkpoint directory or PostgreSQL URL, depending on `--store`.
    #[arg(long, env = "CHATLOOP_DATABASE", default_value = "chatbot.db")]
    pub database: String,

    /// Checkpoints kept per thread; unlimited when unset.
    #[arg(long, env = "CHATLOOP_MAX_HISTORY")]
    pub max_history: Option<usize>,

    #[arg(long, env = "CHATLOOP_SEARCH", value_enum, default_value_t = SearchKind::DuckDuckGo)]
    pub search: SearchKind,

    #[arg(long, env = "TAVILY_API_KEY", hide_env_values = true)]
    pub tavily_api_key: Option<String>,
}

impl Cli {
    pub fn search_config(&self) -> anyhow::Result<SearchConfig> {
        match self.search {
            SearchKind::DuckDuckGo => Ok(SearchConfig::duckduckgo()),
            SearchKind::Tavily => {
                let key = self
                    .tavily_api_key
                    .clone()
                    .context("--search tavily requires TAVILY_API_KEY")?;
                Ok(SearchConfig::tavily(key))
            }
        }
    }

    pub async fn checkpointer(&self) -> anyhow::Result<Arc<dyn Checkpointer>> {
        let store: Arc<dyn Checkpointer> = match self.store {
            StoreKind::Sqlite => {
                let mut builder = SqliteCheckpointer::builder().path(&self.database);
                if let Some(versions) = self.max_history {
                    builder = builder.max_history(versions);
                }
                Arc::new(
                    builder
                        .build()
                        .await
                        .with_context(|| format!("opening sqlite store '{}'", self.database))?,
                )
            }
            StoreKind::File => {
                let mut store = FileCheckpointer::new(&self.database);
                if let Some(versions) = self.max_history {
                    store = store.with_max_history(versions);
                }
                Arc::new(store)
            }
            StoreKind::Memory => {
                let mut store = InMemoryCheckpointer::new();
                if let Some(versions) = self.max_history {
                    store = store.with_max_history(versions);
                }
                Arc::new(store)
            }
            #[cfg(feature = "postgres")]
            StoreKind::Postgres => Arc::new(
                chatloop_persistence::PostgresCheckpointer::builder()
                    .url(&self.database)
                    .build()
                    .await
                    .context("connecting to postgres store")?,
            ),
        };
        tracing::info!(store = ?self.store, database = %self.database, "checkpoint store ready");
        Ok(store)
    }

    pub async fn build_agent(&self) -> anyhow::Result<ChatAgent> {
        let model = OpenAiChatModel::new(
            OpenAiConfig::new(self.api_key.clone(), self.model.clone())
                .with_api_url(Some(self.api_url.clone())),
        )?;
        let prompt = self
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

        let agent = ConfigurableAgentBuilder::new(prompt)
            .with_model(Arc::new(model))
            .with_builtin_tools(self.search_config()?)
            .with_checkpointer(self.checkpointer().await?)
            .with_max_tool_rounds(self.max_tool_rounds)
            .build()?;
        Ok(agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatloop_toolkit::SearchProvider;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["chatloop-server", "--api-key", "test-key"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_match_the_hosted_setup() {
        let cli = parse(&[]);
        assert_eq!(cli.store, StoreKind::Sqlite);
        assert_eq!(cli.database, "chatbot.db");
        assert_eq!(cli.model, DEFAULT_MODEL);
        assert_eq!(cli.api_url, GROQ_API_URL);
        assert_eq!(cli.max_tool_rounds, DEFAULT_MAX_TOOL_ROUNDS);
        assert_eq!(cli.search, SearchKind::DuckDuckGo);
    }

    #[test]
    fn tavily_requires_a_key() {
        let cli = parse(&["--search", "tavily"]);
        assert!(cli.search_config().is_err());

        let cli = parse(&["--search", "tavily", "--tavily-api-key", "tv-123"]);
        match cli.search_config().unwrap().provider {
            SearchProvider::Tavily { api_key } => assert_eq!(api_key, "tv-123"),
            other => panic!("unexpected provider {other:?}"),
        }
    }

    #[tokio::test]
    async fn file_store_builds_an_agent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_string_lossy().to_string();
        let cli = parse(&["--store", "file", "--database", &path, "--max-tool-rounds", "3"]);
        let agent = cli.build_agent().await.unwrap();
        assert_eq!(agent.config().max_tool_rounds, 3);
        assert!(agent.tools().has("calculator"));
        assert!(agent.list_threads().await.unwrap().is_empty());
    }
}
