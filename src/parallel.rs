use crate::{
    error::Result,
    fragment::{self, FragmentStream},
    graph::Graph,
    stage::{BoxFut, BoxStage, IntoStage, Stage},
};
use futures::{future::try_join_all, StreamExt};
use serde_json::{Map, Value};

/// Fan-out composition: every branch receives the same input and the
/// results are collected into an object keyed by branch label.
///
/// Branches run concurrently. If any branch fails the whole group fails,
/// the remaining branches are dropped and no partial object is returned.
pub struct Parallel {
    name: String,
    branches: Vec<(String, BoxStage)>,
}

/// Build a [`Parallel`] group from `(label, stage)` pairs.
///
/// A repeated label replaces the earlier branch.
pub fn parallel<I, K, S>(branches: I) -> Parallel
where
    I: IntoIterator<Item = (K, S)>,
    K: Into<String>,
    S: IntoStage,
{
    branches
        .into_iter()
        .fold(Parallel::new(), |group, (label, stage)| group.with(label, stage))
}

impl Parallel {
    pub fn new() -> Self {
        Self {
            name: "Parallel".to_string(),
            branches: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add a labelled branch.
    pub fn with(mut self, label: impl Into<String>, stage: impl IntoStage) -> Self {
        let label = label.into();
        let stage = stage.into_stage();
        match self.branches.iter_mut().find(|(l, _)| *l == label) {
            Some(slot) => slot.1 = stage,
            None => self.branches.push((label, stage)),
        }
        self
    }

    /// Branch labels in insertion order.
    pub fn labels(&self) -> Vec<&str> {
        self.branches.iter().map(|(l, _)| l.as_str()).collect()
    }
}

impl Default for Parallel {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Parallel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parallel")
            .field("name", &self.name)
            .field("branches", &self.labels())
            .finish()
    }
}

impl Stage for Parallel {
    fn name(&self) -> &str {
        &self.name
    }

    /// Union of every branch's requirements.
    fn input_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = Vec::new();
        for (_, stage) in &self.branches {
            for field in stage.input_fields() {
                if !fields.contains(&field) {
                    fields.push(field);
                }
            }
        }
        fields
    }

    fn output_fields(&self) -> Option<Vec<String>> {
        Some(self.branches.iter().map(|(l, _)| l.clone()).collect())
    }

    fn graph(&self) -> Graph {
        Graph::Parallel(
            self.branches
                .iter()
                .map(|(label, stage)| (label.clone(), stage.graph()))
                .collect(),
        )
    }

    fn invoke(&self, input: Value) -> BoxFut<'_, Result<Value>> {
        Box::pin(async move {
            tracing::debug!(group = %self.name, branches = self.branches.len(), "invoking parallel group");
            let runs = self.branches.iter().map(|(label, stage)| {
                let input = input.clone();
                async move {
                    let output = stage
                        .invoke(input)
                        .await
                        .map_err(|e| e.in_stage(stage.name()))?;
                    Ok::<_, crate::ChainError>((label.clone(), output))
                }
            });
            let results = try_join_all(runs).await?;
            Ok(Value::Object(results.into_iter().collect::<Map<_, _>>()))
        })
    }

    /// Merges the branch streams. Each fragment is `{label: branch_fragment}`,
    /// so folding them rebuilds the [`invoke`](Stage::invoke) output.
    ///
    /// A branch that fails before producing its stream fails the call. A
    /// branch that fails mid-stream puts its error into the merged stream;
    /// fragments its siblings yielded earlier have already reached the
    /// caller. Folding with [`fragment::collect`] stops at the error, so no
    /// partial object is produced.
    fn stream(&self, input: Value) -> BoxFut<'_, Result<FragmentStream>> {
        Box::pin(async move {
            if self.branches.is_empty() {
                return Ok(fragment::once(Value::Object(Map::new())));
            }
            let starts = self.branches.iter().map(|(label, stage)| {
                let input = input.clone();
                async move {
                    let branch = stage
                        .stream(input)
                        .await
                        .map_err(|e| e.in_stage(stage.name()))?;
                    let label = label.clone();
                    let name = stage.name().to_string();
                    let keyed = branch
                        .map(move |item| {
                            let fragment = item.map_err(|e| e.in_stage(&name))?;
                            let mut map = Map::new();
                            map.insert(label.clone(), fragment);
                            Ok::<_, crate::ChainError>(Value::Object(map))
                        })
                        .boxed();
                    Ok::<FragmentStream, crate::ChainError>(keyed)
                }
            });
            let streams = try_join_all(starts).await?;
            Ok(futures::stream::select_all(streams).boxed())
        })
    }
}
