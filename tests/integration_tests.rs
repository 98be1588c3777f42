use futures::StreamExt;
use llm_chain::*;
use serde_json::{json, Value};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

fn suffix(name: &'static str, tail: &'static str) -> Lambda {
    Lambda::new(name, move |v: Value| {
        Ok(json!(format!("{}{}", v.as_str().unwrap_or_default(), tail)))
    })
}

fn counted(name: &'static str, counter: Arc<AtomicUsize>) -> Lambda {
    Lambda::new(name, move |v: Value| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(v)
    })
}

async fn stream_to_vec(stage: &dyn Stage, input: Value) -> Vec<Value> {
    stage
        .stream(input)
        .await
        .unwrap()
        .map(|c| c.unwrap())
        .collect()
        .await
}

// --- Composition laws ---

#[tokio::test]
async fn test_connect_is_associative() {
    let left = connect(connect(suffix("a", "1"), suffix("b", "2")).unwrap(), suffix("c", "3")).unwrap();
    let right = connect(suffix("a", "1"), connect(suffix("b", "2"), suffix("c", "3")).unwrap()).unwrap();

    for input in ["", "x", "量子"] {
        assert_eq!(
            left.invoke(json!(input)).await.unwrap(),
            right.invoke(json!(input)).await.unwrap()
        );
    }
    assert_eq!(left.graph(), right.graph());
}

#[tokio::test]
async fn test_associativity_with_streaming_model() {
    let prompt = || PromptTemplate::from_template("Describe {thing}").unwrap();
    let model = || ChatModel::new(MockBackend::echo().with_chunk_size(3));

    let left = prompt().pipe(model()).unwrap().pipe(StrOutputParser).unwrap();
    let right = connect(prompt(), model().pipe(StrOutputParser).unwrap()).unwrap();

    let input = json!({"thing": "a GPU"});
    assert_eq!(
        left.invoke(input.clone()).await.unwrap(),
        right.invoke(input.clone()).await.unwrap()
    );
    assert_eq!(
        stream_to_vec(&left, input.clone()).await,
        stream_to_vec(&right, input).await
    );
}

#[tokio::test]
async fn test_passthrough_identity() {
    for value in [json!("quantum computer"), json!({"nested": {"k": [1, 2]}}), json!(null)] {
        assert_eq!(passthrough().invoke(value.clone()).await.unwrap(), value);
        assert_eq!(stream_to_vec(&passthrough(), value.clone()).await, vec![value]);
    }
}

#[tokio::test]
async fn test_parallel_shape() {
    let s1 = suffix("s1", "-p");
    let s2 = suffix("s2", "-q");
    let expected_p = s1.invoke(json!("x")).await.unwrap();
    let expected_q = s2.invoke(json!("x")).await.unwrap();

    let group = parallel([("p", s1), ("q", s2)]);
    let out = group.invoke(json!("x")).await.unwrap();

    let keys: Vec<&String> = out.as_object().unwrap().keys().collect();
    assert_eq!(keys.len(), 2);
    assert_eq!(out["p"], expected_p);
    assert_eq!(out["q"], expected_q);
}

#[tokio::test]
async fn test_parallel_failure_propagates() {
    let group = parallel([
        ("p", ChatModel::new(MockBackend::new("fine")).boxed()),
        ("q", ChatModel::new(MockBackend::failing("backend down")).with_name("q-model").boxed()),
    ]);
    let err = group.invoke(json!("x")).await.unwrap_err();
    assert_eq!(err.stage(), Some("q-model"));
    assert!(matches!(err.root_cause(), ChainError::Model { status: 500, .. }));
}

#[tokio::test]
async fn test_failure_short_circuits() {
    let counter = Arc::new(AtomicUsize::new(0));
    let failing = Lambda::new("a", |_| Err(ChainError::Other("a exploded".into())));
    let pipeline = connect(failing, counted("b", counter.clone())).unwrap();

    let err = pipeline.invoke(json!("x")).await.unwrap_err();
    assert_eq!(err.stage(), Some("a"));
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    let stream = pipeline.stream(json!("x")).await;
    assert!(stream.is_err());
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_no_caching_between_calls() {
    let counter = Arc::new(AtomicUsize::new(0));
    let pipeline = connect(counted("count", counter.clone()), suffix("s", "!")).unwrap();
    pipeline.invoke(json!("a")).await.unwrap();
    pipeline.invoke(json!("a")).await.unwrap();
    stream_to_vec(&pipeline, json!("a")).await;
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

// --- Streaming ---

#[tokio::test]
async fn test_streaming_completeness() {
    let chain = ChatPromptTemplate::from_template("Write a slogan for {company_name}, maker of {product}.")
        .unwrap()
        .pipe(ChatModel::new(
            MockBackend::new("芯擎科技，算力无限！").with_chunk_size(2),
        ))
        .unwrap()
        .pipe(StrOutputParser)
        .unwrap();

    let input = json!({"company_name": "芯擎", "product": "高性能显卡"});
    let fragments = stream_to_vec(&chain, input.clone()).await;
    assert!(fragments.len() > 1);
    assert!(fragments.iter().all(|f| f.is_string()));

    let joined: String = fragments.iter().map(|f| f.as_str().unwrap()).collect();
    assert_eq!(json!(joined), chain.invoke(input).await.unwrap());
}

#[tokio::test]
async fn test_stream_can_be_abandoned() {
    let backend = MockBackend::new("abcdefghij").with_chunk_size(1);
    let chain = ChatModel::new(backend.clone()).pipe(StrOutputParser).unwrap();

    let mut stream = chain.stream(json!("go")).await.unwrap();
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first, json!("a"));
    drop(stream);

    // A fresh call re-executes from scratch.
    let again = stream_to_vec(&chain, json!("go")).await;
    assert_eq!(again.len(), 10);
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn test_stream_error_from_template_surfaces_before_first_fragment() {
    let chain = PromptTemplate::from_template("{a} and {b}")
        .unwrap()
        .pipe(ChatModel::new(MockBackend::new("unused")))
        .unwrap();
    let err = match chain.stream(json!({"a": 1})).await {
        Err(err) => err,
        Ok(_) => panic!("Expected template failure"),
    };
    assert_eq!(err.stage(), Some("PromptTemplate"));
    assert!(matches!(err.root_cause(), ChainError::UndefinedVariable(v) if v == "b"));
}

// --- Structural checks ---

#[test]
fn test_assembly_rejects_shape_mismatch() {
    let model = ChatModel::new(MockBackend::new("x"));
    let needs_fields = PromptTemplate::from_template("{company_name} makes {product}").unwrap();
    match connect(model, needs_fields).unwrap_err() {
        ChainError::Composition { from, to, .. } => {
            assert_eq!(from, "ChatModel");
            assert_eq!(to, "PromptTemplate");
        }
        other => panic!("Expected Composition error, got {other:?}"),
    }
}

#[test]
fn test_assembly_accepts_parallel_feeding_template() {
    let group = parallel([
        ("product", passthrough().boxed()),
        ("company_name", suffix("namer", " Inc").boxed()),
    ]);
    let slogan = PromptTemplate::from_template("{company_name} sells {product}").unwrap();
    assert!(connect(group, slogan).is_ok());
}

// --- End-to-end scenarios ---

#[tokio::test]
async fn test_scenario_linear_chain() {
    let backend = MockBackend::new("  NovaCore  ");
    let chain = ChatPromptTemplate::from_template(
        "Suggest a name for a company that makes {product}. Reply with the name only.",
    )
    .unwrap()
    .pipe(ChatModel::new(backend.clone()))
    .unwrap()
    .pipe(StrOutputParser)
    .unwrap();

    let out = chain
        .invoke(json!({"product": "high-performance GPU"}))
        .await
        .unwrap();
    assert_eq!(out, json!("  NovaCore  "));

    let sent = backend.last_messages().unwrap();
    assert_eq!(
        sent,
        vec![Message::user(
            "Suggest a name for a company that makes high-performance GPU. Reply with the name only."
        )]
    );
}

#[tokio::test]
async fn test_scenario_custom_function_stage() {
    let add_prefix = Lambda::new("add_prefix", |v: Value| {
        Ok(json!(format!("* {} *", v.as_str().unwrap_or_default().trim())))
    });
    let chain = PromptTemplate::from_template("Translate to English: {text}")
        .unwrap()
        .pipe(ChatModel::new(MockBackend::new(" Hello, LangChain \n")))
        .unwrap()
        .pipe(StrOutputParser)
        .unwrap()
        .pipe(add_prefix)
        .unwrap();

    let out = chain.invoke(json!({"text": "你好"})).await.unwrap();
    assert_eq!(out, json!("* Hello, LangChain *"));
}

#[tokio::test]
async fn test_scenario_passthrough_context() {
    let namer = MockBackend::new("QuantaCore");
    let name_chain = PromptTemplate::from_template("Name a company that makes {product}. Name only.")
        .unwrap()
        .pipe(ChatModel::new(namer.clone()))
        .unwrap()
        .pipe(StrOutputParser)
        .unwrap();

    let gather = parallel([
        ("product", passthrough().boxed()),
        ("company_name", name_chain.boxed()),
    ]);

    let merged = gather.invoke(json!("quantum computer")).await.unwrap();
    assert_eq!(
        merged,
        json!({"product": "quantum computer", "company_name": "QuantaCore"})
    );

    let writer = MockBackend::echo();
    let slogan_prompt =
        PromptTemplate::from_template("Company: {company_name}, product: {product}. Write a slogan.").unwrap();
    let full_chain = Pipeline::builder("slogan")
        .then(gather)
        .then(slogan_prompt)
        .then(ChatModel::new(writer.clone()))
        .then(StrOutputParser)
        .build()
        .unwrap();

    let out = full_chain.invoke(json!("quantum computer")).await.unwrap();
    assert_eq!(
        out,
        json!("Company: QuantaCore, product: quantum computer. Write a slogan.")
    );
    assert_eq!(
        writer.last_messages().unwrap()[0].content,
        "Company: QuantaCore, product: quantum computer. Write a slogan."
    );
    assert_eq!(namer.calls(), 2);
}

#[tokio::test]
async fn test_scenario_parallel_pros_and_cons() {
    let delay = std::time::Duration::from_millis(80);
    let branch = |reply: &str| {
        PromptTemplate::from_template("List one key point about {product}")
            .unwrap()
            .pipe(ChatModel::new(MockBackend::new(reply).with_delay(delay)))
            .unwrap()
            .pipe(StrOutputParser)
            .unwrap()
    };
    let map_chain = parallel([("pros", branch("zero emissions")), ("cons", branch("charging time"))]);

    let start = std::time::Instant::now();
    let out = map_chain
        .invoke(json!({"product": "electric car"}))
        .await
        .unwrap();
    assert!(start.elapsed() < delay * 2);
    assert_eq!(out, json!({"pros": "zero emissions", "cons": "charging time"}));

    let folded = fragment::collect(map_chain.stream(json!({"product": "electric car"})).await.unwrap())
        .await
        .unwrap();
    assert_eq!(folded, out);
}

#[tokio::test]
async fn test_scenario_system_prompt_and_usage() {
    let backend = MockBackend::new("做出卓越成就的唯一途径是热爱你所做的事情。")
        .with_usage(Usage::new(58, 538));
    let model = ChatModel::new(backend.clone())
        .with_system_prompt("You are a translation assistant. Translate the user's input into Chinese.");

    let reply = model
        .invoke(json!({"messages": [{"role": "user", "content": "The only way to do great work is to love what you do."}]}))
        .await
        .unwrap();
    let reply: Message = serde_json::from_value(reply).unwrap();
    assert_eq!(reply.role, Role::Assistant);
    assert_eq!(reply.usage.unwrap().total_tokens, 596);

    let sent = backend.last_messages().unwrap();
    assert_eq!(sent[0].role, Role::System);
    assert_eq!(sent[1].role, Role::User);
}

#[test]
fn test_graph_drawing() {
    let chain = Pipeline::builder("slogan")
        .then(parallel([
            ("product", passthrough().boxed()),
            ("company_name", suffix("namer", "").boxed()),
        ]))
        .then(PromptTemplate::from_template("{company_name} {product}").unwrap())
        .then(StrOutputParser)
        .build()
        .unwrap();
    let drawing = chain.graph().draw_ascii();
    assert_eq!(
        drawing,
        [
            "<parallel>",
            "  product:",
            "    [Passthrough]",
            "  company_name:",
            "    [namer]",
            "</parallel>",
            "   |",
            "   v",
            "[PromptTemplate]",
            "   |",
            "   v",
            "[StrOutputParser]",
        ]
        .join("\n")
    );
}

// --- Error type tests ---

#[test]
fn test_error_display() {
    let err = ChainError::UndefinedVariable("product".to_string()).in_stage("prompt");
    assert_eq!(err.to_string(), "Stage 'prompt' failed: Undefined template variable 'product'");

    let err = ChainError::InvalidConfig("bad config".to_string());
    assert_eq!(err.to_string(), "Invalid configuration: bad config");

    let err = ChainError::Model {
        status: 401,
        body: "unauthorized".to_string(),
    };
    assert_eq!(err.to_string(), "Model returned error 401: unauthorized");
}
