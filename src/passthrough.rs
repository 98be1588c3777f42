use crate::{
    error::Result,
    fragment::{self, FragmentStream},
    graph::Graph,
    parallel::Parallel,
    stage::{BoxFut, Stage},
    ChainError,
};
use serde_json::Value;
use std::sync::Arc;

/// Returns its input unchanged.
///
/// Used as a [`Parallel`] branch to carry the raw input forward next to
/// values derived from it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

pub fn passthrough() -> Passthrough {
    Passthrough
}

impl Passthrough {
    /// Keep the input object and add the outputs of `derived` to it.
    pub fn assign(derived: Parallel) -> Assign {
        Assign { derived }
    }
}

impl Stage for Passthrough {
    fn name(&self) -> &str {
        "Passthrough"
    }

    fn invoke(&self, input: Value) -> BoxFut<'_, Result<Value>> {
        Box::pin(async move { Ok(input) })
    }

    fn stream(&self, input: Value) -> BoxFut<'_, Result<FragmentStream>> {
        Box::pin(async move { Ok(fragment::once(input)) })
    }

    fn transform(self: Arc<Self>, upstream: FragmentStream) -> FragmentStream {
        upstream
    }
}

/// Input object merged with the outputs of a [`Parallel`] group.
///
/// Derived values overwrite input fields of the same name; every other
/// input field is preserved.
#[derive(Debug)]
pub struct Assign {
    derived: Parallel,
}

impl Stage for Assign {
    fn name(&self) -> &str {
        "Assign"
    }

    fn input_fields(&self) -> Vec<String> {
        self.derived.input_fields()
    }

    fn graph(&self) -> Graph {
        Graph::Parallel(vec![
            ("passthrough".to_string(), Graph::node("Passthrough")),
            ("assign".to_string(), self.derived.graph()),
        ])
    }

    fn invoke(&self, input: Value) -> BoxFut<'_, Result<Value>> {
        Box::pin(async move {
            let Value::Object(mut fields) = input.clone() else {
                return Err(ChainError::InvalidInput(format!(
                    "assign expects an object, got {}",
                    input
                )));
            };
            if let Value::Object(extra) = self.derived.invoke(input).await? {
                fields.extend(extra);
            }
            Ok(Value::Object(fields))
        })
    }
}
