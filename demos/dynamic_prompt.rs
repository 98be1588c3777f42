//! Fill a role-based prompt template from a map of variables, first by hand
//! and then as a `template | model | parser` chain.
//!
//! ```sh
//! cargo run --example dynamic_prompt
//! ```

use llm_chain::{init_chat_model, ChatModel, ChatPromptTemplate, ModelConfig, Stage, StageExt, StrOutputParser};
use serde_json::{json, Value};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn translator_prompt() -> llm_chain::Result<ChatPromptTemplate> {
    ChatPromptTemplate::from_messages([
        (
            "system",
            "You are a translation assistant for the {field} domain. Translate the user's text into Chinese.\n\
             Requirement: use a {style} tone while staying professional.",
        ),
        ("user", "{content}"),
    ])
}

async fn run_by_hand(model: &ChatModel, input: Value) -> llm_chain::Result<()> {
    println!("--- Rendering by hand ---");
    let prompt = translator_prompt()?.render(input)?;
    println!("[Debug] rendered messages:\n{}", prompt);

    let reply = model.chat(serde_json::to_value(&prompt)?).await?;
    println!("Result: {}\n", reply.content);
    Ok(())
}

async fn run_as_chain(model: ChatModel, input: Value) -> llm_chain::Result<()> {
    println!("--- As a chain ---");
    let chain = translator_prompt()?.pipe(model)?.pipe(StrOutputParser)?;
    let result = chain.invoke(input).await?;
    println!("Result: {}", result.as_str().unwrap_or_default());
    Ok(())
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let model = init_chat_model(
        ModelConfig::from_env()?
            .with_temperature(0.5)
            .with_timeout(Duration::from_secs(10))
            .with_max_tokens(1000),
    )?;

    let engineer = json!({
        "field": "software engineering",
        "style": "haughty and slightly sarcastic",
        "content": "Using old-school monolithic architecture for a modern microservice problem is clearly an anti-pattern."
    });
    let historian = json!({
        "field": "historical literature",
        "style": "elegant and philosophical",
        "content": "The long river of time eventually reveals the true measure of a man's character."
    });

    run_by_hand(&model, engineer.clone()).await?;
    run_by_hand(&model, historian).await?;

    println!("{}", "=".repeat(40));
    run_as_chain(model, engineer).await?;

    Ok(())
}
