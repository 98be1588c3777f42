use crate::{
    error::Result,
    stage::{BoxFut, Stage},
};
use serde_json::Value;
use std::future::Future;

type SyncFn = dyn Fn(Value) -> Result<Value> + Send + Sync;
type AsyncFn = dyn Fn(Value) -> BoxFut<'static, Result<Value>> + Send + Sync;

enum Func {
    Sync(Box<SyncFn>),
    Async(Box<AsyncFn>),
}

/// A plain function lifted into a [`Stage`].
///
/// ```
/// use llm_chain::{Lambda, Stage};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let shout = Lambda::new("shout", |v| Ok(json!(v.as_str().unwrap_or("").to_uppercase())));
/// assert_eq!(shout.invoke(json!("hi")).await.unwrap(), json!("HI"));
/// # });
/// ```
pub struct Lambda {
    name: String,
    func: Func,
    input_fields: Vec<String>,
    output_fields: Option<Vec<String>>,
}

impl Lambda {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Func::Sync(Box::new(func)),
            input_fields: Vec::new(),
            output_fields: None,
        }
    }

    /// Lift an async function.
    pub fn from_async<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Func::Async(Box::new(move |input| Box::pin(func(input)))),
            input_fields: Vec::new(),
            output_fields: None,
        }
    }

    /// Declare the object fields this function reads.
    pub fn with_input_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Declare the object fields this function produces.
    pub fn with_output_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }
}

impl Stage for Lambda {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_fields(&self) -> Vec<String> {
        self.input_fields.clone()
    }

    fn output_fields(&self) -> Option<Vec<String>> {
        self.output_fields.clone()
    }

    fn invoke(&self, input: Value) -> BoxFut<'_, Result<Value>> {
        match &self.func {
            Func::Sync(f) => {
                let result = f(input);
                Box::pin(async move { result })
            }
            Func::Async(f) => f(input),
        }
    }
}
