use crate::{
    error::Result,
    fragment::{self, FragmentStream},
    graph::Graph,
    pipeline::{connect, Pipeline},
};
use futures::StreamExt;
use serde_json::Value;
use std::{future::Future, pin::Pin, sync::Arc};

/// Boxed future returned by [`Stage`] methods.
pub type BoxFut<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A shared, type-erased stage.
pub type BoxStage = Arc<dyn Stage>;

/// A unit of transformation from one [`Value`] to another.
///
/// Stages are immutable once built and may be invoked any number of times.
/// Every call re-executes the stage; nothing is cached between calls.
pub trait Stage: Send + Sync + 'static {
    /// Name used in error tags, logs and graph output.
    fn name(&self) -> &str;

    /// Object fields this stage reads from its input. Empty means no requirement.
    fn input_fields(&self) -> Vec<String> {
        Vec::new()
    }

    /// Object fields this stage produces, or `None` when the shape is not
    /// known ahead of time.
    fn output_fields(&self) -> Option<Vec<String>> {
        None
    }

    /// Structure of this stage for display.
    fn graph(&self) -> Graph {
        Graph::node(self.name())
    }

    /// Run the stage once and return the fully materialised output.
    fn invoke(&self, input: Value) -> BoxFut<'_, Result<Value>>;

    /// Run the stage and return its output as a fragment stream.
    ///
    /// Stages that cannot produce output incrementally yield their
    /// [`invoke`](Stage::invoke) result as a single fragment.
    fn stream(&self, input: Value) -> BoxFut<'_, Result<FragmentStream>> {
        Box::pin(async move {
            let output = self.invoke(input).await?;
            Ok(fragment::once(output))
        })
    }

    /// Consume an upstream fragment stream.
    ///
    /// The default waits for the whole upstream, folds it into one value and
    /// then calls [`stream`](Stage::stream). Stages that can work fragment by
    /// fragment override this.
    fn transform(self: Arc<Self>, upstream: FragmentStream) -> FragmentStream {
        let stage = self;
        futures::stream::once(async move {
            let input = fragment::collect(upstream).await?;
            stage.stream(input).await
        })
        .map(|result| match result {
            Ok(stream) => stream,
            Err(err) => fragment::fail(err),
        })
        .flatten()
        .boxed()
    }
}

/// Conversion into a shareable stage handle.
pub trait IntoStage {
    fn into_stage(self) -> BoxStage;
}

impl<S: Stage> IntoStage for S {
    fn into_stage(self) -> BoxStage {
        Arc::new(self)
    }
}

impl IntoStage for BoxStage {
    fn into_stage(self) -> BoxStage {
        self
    }
}

/// Combinators available on every concrete stage.
pub trait StageExt: Stage + Sized {
    /// Erase the concrete type.
    fn boxed(self) -> BoxStage {
        Arc::new(self)
    }

    /// Connect `self` to `next`, feeding this stage's output into it.
    fn pipe(self, next: impl IntoStage) -> Result<Pipeline> {
        connect(self, next)
    }
}

impl<S: Stage> StageExt for S {}
