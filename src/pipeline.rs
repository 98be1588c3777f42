use crate::{
    error::Result,
    fragment::{self, FragmentStream},
    graph::Graph,
    stage::{BoxFut, BoxStage, IntoStage, Stage},
    ChainError,
};
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;

/// Sequential composition of stages.
///
/// The output of each stage becomes the input of the next. A pipeline is
/// itself a [`Stage`], so pipelines nest freely. If a stage fails, later
/// stages never run and the error is returned tagged with the failing
/// stage's name.
pub struct Pipeline {
    name: String,
    stages: Vec<BoxStage>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field(
                "stages",
                &self.stages.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Connect two stages into a pipeline computing `b(a(input))`.
///
/// Fails if `a` declares its output fields and `b` requires a field that is
/// not among them.
pub fn connect(a: impl IntoStage, b: impl IntoStage) -> Result<Pipeline> {
    Pipeline::builder("Pipeline").then(a).then(b).build()
}

impl Pipeline {
    /// Create a new pipeline builder.
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(name)
    }

    /// Get a reference to the pipeline's stages.
    pub fn stages(&self) -> &[BoxStage] {
        &self.stages
    }

    /// Append another stage, producing a longer pipeline.
    pub fn pipe(self, next: impl IntoStage) -> Result<Pipeline> {
        connect(self, next)
    }
}

/// Check that a stage requiring `required` can read them all from `value`.
///
/// Non-object values are left for the stage itself to judge.
fn check_fields(from: &str, to: &str, required: &[String], value: &Value) -> Result<()> {
    if let Value::Object(map) = value {
        let missing: Vec<&String> = required
            .iter()
            .filter(|field| !map.contains_key(field.as_str()))
            .collect();
        if !missing.is_empty() {
            return Err(ChainError::Composition {
                from: from.to_string(),
                to: to.to_string(),
                message: format!("output is missing field(s) {:?}", missing),
            });
        }
    }
    Ok(())
}

/// Apply the field check to a stream feeding `next`.
///
/// Stages that declare no input fields see the upstream untouched. Otherwise
/// the upstream is aggregated and checked before `next` sees it.
fn guard(upstream: FragmentStream, prev: &dyn Stage, next: &dyn Stage) -> FragmentStream {
    let required = next.input_fields();
    if required.is_empty() {
        return upstream;
    }
    let (from, to) = (prev.name().to_string(), next.name().to_string());
    futures::stream::once(async move {
        let value = fragment::collect(upstream).await?;
        check_fields(&from, &to, &required, &value)?;
        Ok::<_, ChainError>(value)
    })
    .boxed()
}

fn tag(stream: FragmentStream, stage: &str) -> FragmentStream {
    let stage = stage.to_string();
    stream
        .map(move |item| item.map_err(|e| e.in_stage(&stage)))
        .boxed()
}

impl Stage for Pipeline {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_fields(&self) -> Vec<String> {
        self.stages
            .first()
            .map(|s| s.input_fields())
            .unwrap_or_default()
    }

    fn output_fields(&self) -> Option<Vec<String>> {
        self.stages.last().and_then(|s| s.output_fields())
    }

    fn graph(&self) -> Graph {
        Graph::sequence(self.stages.iter().map(|s| s.graph()))
    }

    fn invoke(&self, input: Value) -> BoxFut<'_, Result<Value>> {
        Box::pin(async move {
            let mut current = input;
            for (idx, stage) in self.stages.iter().enumerate() {
                if idx > 0 {
                    let prev = self.stages[idx - 1].name();
                    check_fields(prev, stage.name(), &stage.input_fields(), &current)?;
                }
                tracing::debug!(pipeline = %self.name, stage = stage.name(), idx, "invoking stage");
                current = stage
                    .invoke(current)
                    .await
                    .map_err(|e| e.in_stage(stage.name()))?;
            }
            Ok(current)
        })
    }

    /// The first stage runs to completion before this returns; each later
    /// stage consumes its predecessor's stream lazily as the caller polls.
    fn stream(&self, input: Value) -> BoxFut<'_, Result<FragmentStream>> {
        Box::pin(async move {
            let (first, rest) = self
                .stages
                .split_first()
                .ok_or_else(|| ChainError::InvalidConfig("pipeline has no stages".to_string()))?;

            tracing::debug!(pipeline = %self.name, stage = first.name(), "streaming stage");
            let head = first
                .stream(input)
                .await
                .map_err(|e| e.in_stage(first.name()))?;
            let mut stream = tag(head, first.name());

            let mut prev = first;
            for stage in rest {
                let upstream = guard(stream, prev.as_ref(), stage.as_ref());
                stream = tag(stage.clone().transform(upstream), stage.name());
                prev = stage;
            }
            Ok(stream)
        })
    }

    fn transform(self: Arc<Self>, upstream: FragmentStream) -> FragmentStream {
        let mut stream = upstream;
        for (idx, stage) in self.stages.iter().enumerate() {
            if idx > 0 {
                stream = guard(stream, self.stages[idx - 1].as_ref(), stage.as_ref());
            }
            stream = tag(stage.clone().transform(stream), stage.name());
        }
        stream
    }
}

/// Builder for creating pipelines.
pub struct PipelineBuilder {
    name: String,
    stages: Vec<BoxStage>,
}

impl PipelineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Append a stage to the pipeline.
    pub fn then(mut self, stage: impl IntoStage) -> Self {
        self.stages.push(stage.into_stage());
        self
    }

    /// Build the pipeline, validating that adjacent stages fit together.
    pub fn build(self) -> Result<Pipeline> {
        if self.stages.is_empty() {
            return Err(ChainError::InvalidConfig(
                "Pipeline must have at least one stage".to_string(),
            ));
        }

        for pair in self.stages.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            let Some(produced) = prev.output_fields() else {
                continue;
            };
            let missing: Vec<String> = next
                .input_fields()
                .into_iter()
                .filter(|field| !produced.contains(field))
                .collect();
            if !missing.is_empty() {
                return Err(ChainError::Composition {
                    from: prev.name().to_string(),
                    to: next.name().to_string(),
                    message: format!(
                        "'{}' requires {:?} but '{}' only produces {:?}",
                        next.name(),
                        missing,
                        prev.name(),
                        produced
                    ),
                });
            }
        }

        Ok(Pipeline {
            name: self.name,
            stages: self.stages,
        })
    }
}
