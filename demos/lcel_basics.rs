//! Tour of the composition operators: a linear chain, a custom function
//! stage, passthrough context, parallel branches and token streaming.
//!
//! ```sh
//! cargo run --example lcel_basics
//! ```

use futures::StreamExt;
use llm_chain::{
    init_chat_model, parallel, passthrough, ChatModel, ChatPromptTemplate, Lambda, ModelConfig,
    Pipeline, Stage, StageExt, StrOutputParser,
};
use serde_json::{json, Value};
use std::io::Write;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

type DemoResult = std::result::Result<(), Box<dyn std::error::Error>>;

fn text(value: &Value) -> &str {
    value.as_str().unwrap_or_default()
}

async fn linear(model: &ChatModel) -> DemoResult {
    println!("\n--- Linear chain ---");
    let chain = ChatPromptTemplate::from_template(
        "Suggest a good name for a company that makes {product}. Reply with the name only.",
    )?
    .pipe(model.clone())?
    .pipe(StrOutputParser)?;

    let result = chain.invoke(json!({"product": "high-performance GPUs"})).await?;
    println!("Product: high-performance GPUs -> company: {}", text(&result));

    println!("\n[Debug] chain structure:");
    println!("{}", chain.graph().draw_ascii());
    Ok(())
}

async fn custom_function(model: &ChatModel) -> DemoResult {
    println!("\n--- Custom function stage ---");
    let add_prefix = Lambda::new("add_prefix", |v: Value| {
        Ok(json!(format!("* Result: {} *", text(&v).trim())))
    });

    let chain = ChatPromptTemplate::from_template("Translate into English: {text}")?
        .pipe(model.clone())?
        .pipe(StrOutputParser)?
        .pipe(add_prefix)?;

    let result = chain.invoke(json!({"text": "你好，LangChain"})).await?;
    println!("{}", text(&result));
    Ok(())
}

async fn passthrough_context(model: &ChatModel) -> DemoResult {
    println!("\n--- Passthrough ---");
    let name_chain = ChatPromptTemplate::from_template(
        "Suggest a good name for a company that makes {product}. Name only.",
    )?
    .pipe(model.clone())?
    .pipe(StrOutputParser)?;

    let slogan_prompt = ChatPromptTemplate::from_template(
        "The company is {company_name} and the product is {product}. Write a catchy slogan.",
    )?;

    let full_chain = Pipeline::builder("slogan")
        .then(parallel([
            ("product", passthrough().boxed()),
            ("company_name", name_chain.boxed()),
        ]))
        .then(slogan_prompt)
        .then(model.clone())
        .then(StrOutputParser)
        .build()?;

    let result = full_chain.invoke(json!("quantum computer")).await?;
    println!("Result: {}", text(&result));
    Ok(())
}

async fn parallel_branches(model: &ChatModel) -> DemoResult {
    println!("\n--- Parallel ---");
    let point = |kind: &str| -> llm_chain::Result<Pipeline> {
        ChatPromptTemplate::from_template(&format!(
            "Briefly list one key {} of {{product}}",
            kind
        ))?
        .pipe(model.clone())?
        .pipe(StrOutputParser)
    };

    let map_chain = parallel([("pros", point("advantage")?), ("cons", point("drawback")?)]);

    let start = Instant::now();
    println!("Thinking in parallel...");
    let result = map_chain.invoke(json!({"product": "electric cars"})).await?;
    println!("Done in {:.2}s", start.elapsed().as_secs_f64());
    println!("Pros: {}", text(&result["pros"]));
    println!("Cons: {}", text(&result["cons"]));
    Ok(())
}

async fn streaming(model: &ChatModel) -> DemoResult {
    println!("\n--- Streaming ---");
    let chain = ChatPromptTemplate::from_template(
        "The company is {company_name} and the product is {product}. Write a catchy slogan.",
    )?
    .pipe(model.clone())?
    .pipe(StrOutputParser)?;

    let mut stream = chain
        .stream(json!({"company_name": "Xinqing", "product": "high-performance GPUs"}))
        .await?;
    while let Some(fragment) = stream.next().await {
        let fragment = fragment?;
        if !text(&fragment).is_empty() {
            print!("{}|", text(&fragment));
            std::io::stdout().flush()?;
        }
    }
    println!();
    Ok(())
}

#[tokio::main]
async fn main() -> DemoResult {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let model = init_chat_model(ModelConfig::from_env()?.with_temperature(0.7))?;

    linear(&model).await?;
    custom_function(&model).await?;
    passthrough_context(&model).await?;
    parallel_branches(&model).await?;
    streaming(&model).await?;

    Ok(())
}
