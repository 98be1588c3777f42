//! # LLM Chain
//!
//! Composable building blocks for chat-model workflows: prompt templates,
//! chat models and output parsers that snap together into sequential,
//! parallel and streaming pipelines.
//!
//! ## Features
//!
//! - **Uniform stages**: every component implements [`Stage`], mapping one
//!   `serde_json::Value` to another or to a lazy fragment stream
//! - **Sequential composition**: [`connect`] / [`StageExt::pipe`] feed each
//!   output into the next stage; failures short-circuit and are tagged with
//!   the stage that raised them
//! - **Parallel fan-out**: [`parallel`] runs labelled branches concurrently
//!   on the same input
//! - **Passthrough**: [`passthrough`] keeps the raw input next to derived
//!   values
//! - **Streaming**: tokens flow from the model through chunk-aware parsers
//!   as the caller pulls them
//! - **Structural checks**: stages declare the fields they read and
//!   produce; mismatches are caught when a pipeline is assembled
//! - **Backends**: Ollama, OpenAI-compatible servers, and an offline mock
//!
//! ## Quick Start
//!
//! ```no_run
//! use llm_chain::{init_chat_model, ChatPromptTemplate, ModelConfig, Stage, StageExt, StrOutputParser};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let model = init_chat_model(ModelConfig::from_env()?)?;
//!     let prompt = ChatPromptTemplate::from_template(
//!         "Suggest a name for a company that makes {product}. Reply with the name only.",
//!     )?;
//!
//!     let chain = prompt.pipe(model)?.pipe(StrOutputParser)?;
//!     let name = chain.invoke(json!({"product": "high-performance GPUs"})).await?;
//!     println!("{}", name);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod fragment;
pub mod graph;
pub mod lambda;
pub mod message;
pub mod parallel;
pub mod parser;
pub mod passthrough;
pub mod pipeline;
pub mod prompt;
pub mod stage;

pub use backend::{MockBackend, OllamaBackend, OpenAiBackend};
pub use client::{init_chat_model, ChatBackend, ChatModel};
pub use config::ModelConfig;
pub use error::{ChainError, Result};
pub use fragment::FragmentStream;
pub use graph::Graph;
pub use lambda::Lambda;
pub use message::{Message, PromptValue, Role, Usage};
pub use parallel::{parallel, Parallel};
pub use parser::{JsonOutputParser, StrOutputParser};
pub use passthrough::{passthrough, Assign, Passthrough};
pub use pipeline::{connect, Pipeline, PipelineBuilder};
pub use prompt::{ChatPromptTemplate, PromptTemplate};
pub use stage::{BoxFut, BoxStage, IntoStage, Stage, StageExt};
