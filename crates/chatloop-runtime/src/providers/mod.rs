pub mod openai;

pub use openai::{OpenAiChatModel, OpenAiConfig, DEFAULT_MODEL, GROQ_API_URL, OPENAI_API_URL};
