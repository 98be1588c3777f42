//! Translate one sentence with a system-prompted chat model.
//!
//! Reads `MODEL_NAME`, `MODEL_PROVIDER`, `API_KEY` and `BASE_URL` from the
//! environment (or a `.env` file).
//!
//! ```sh
//! RUST_LOG=llm_chain=debug cargo run --example simple_chat
//! ```

use llm_chain::{init_chat_model, Message, ModelConfig};
use serde_json::json;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = ModelConfig::from_env()?
        .with_temperature(0.5)
        .with_timeout(Duration::from_secs(10))
        .with_max_tokens(1000);
    println!("Initializing model: {} ({})...", config.model, config.provider);

    let model = init_chat_model(config)?.with_system_prompt(
        "You are a translator who follows the faithfulness, expressiveness and elegance \
         standard. Translate the user's input into Chinese and add one short line of commentary.",
    );

    println!("Sending request...");
    let reply = model
        .chat(json!({ "messages": [Message::user("The only way to do great work is to love what you do.")] }))
        .await?;

    println!("\n-------- Translation --------");
    println!("{}", reply.content);
    println!("-----------------------------");

    if let Some(usage) = reply.usage {
        println!(
            "\nTokens: input {} / output {}",
            usage.input_tokens, usage.output_tokens
        );
    }

    Ok(())
}
