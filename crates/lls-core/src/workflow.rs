//! A small task graph that post-processes pipeline output.
//!
//! A [`Workflow`] maps task names to a function plus its arguments. An
//! argument either names another task (or an input that is not defined
//! as a task) or is a literal value. Evaluating a task evaluates exactly
//! the tasks it depends on, in topological order.
//!
//! Names that are referenced but never defined are the graph's *roots*:
//! the places where raw image data is expected. The pipeline grafts its
//! own `deskew_image` task onto the graph and points every root consumer
//! at it (see [`Workflow::inputs`] and [`Workflow::rewire`]).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use ndarray::{Array3, Axis as NdAxis};
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use serde::Deserialize;

use crate::error::{LatticeError, WorkflowError};

/// Tabular task output: named columns of numbers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    /// Column headers.
    pub columns: Vec<String>,
    /// Row-major values; each row has one entry per column.
    pub rows: Vec<Vec<f64>>,
}

/// Anything a task can consume or produce.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowValue {
    /// A `(Z, Y, X)` volume.
    Image(Array3<f32>),
    /// A table of measurements.
    Table(Table),
    /// A scalar.
    Number(f64),
}

impl WorkflowValue {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Image(_) => "image",
            Self::Table(_) => "table",
            Self::Number(_) => "number",
        }
    }
}

/// A task body.
pub type TaskFn = Arc<dyn Fn(&[WorkflowValue]) -> Result<WorkflowValue, WorkflowError> + Send + Sync>;

/// One argument of a task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskArg {
    /// Output of the named task or input.
    Ref(String),
    /// Literal value.
    Value(WorkflowValue),
}

impl TaskArg {
    /// Reference another task by name.
    pub fn reference(name: impl Into<String>) -> Self {
        Self::Ref(name.into())
    }
}

#[derive(Clone)]
struct Task {
    function: String,
    func: TaskFn,
    args: Vec<TaskArg>,
}

/// A directed acyclic graph of named tasks.
#[derive(Clone, Default)]
pub struct Workflow {
    tasks: BTreeMap<String, Task>,
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, task) in &self.tasks {
            map.entry(name, &(&task.function, &task.args));
        }
        map.finish()
    }
}

impl Workflow {
    /// An empty workflow.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Define (or replace) `name` as `func` applied to `args`.
    ///
    /// `function` is only used for display.
    pub fn set(
        &mut self,
        name: impl Into<String>,
        function: impl Into<String>,
        func: TaskFn,
        args: Vec<TaskArg>,
    ) {
        self.tasks.insert(
            name.into(),
            Task {
                function: function.into(),
                func,
                args,
            },
        );
    }

    /// Define `name` as a constant.
    pub fn set_value(&mut self, name: impl Into<String>, value: WorkflowValue) {
        let func: TaskFn = Arc::new(move |_| Ok(value.clone()));
        self.set(name, "value", func, Vec::new());
    }

    /// Returns `true` if `name` is defined as a task.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Task names, sorted.
    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    /// Function label and arguments of a task.
    #[must_use]
    pub fn task(&self, name: &str) -> Option<(&str, &[TaskArg])> {
        self.tasks
            .get(name)
            .map(|t| (t.function.as_str(), t.args.as_slice()))
    }

    /// Every `(consumer, arg_index, producer)` reference in the graph.
    #[must_use]
    pub fn edges(&self) -> Vec<(&str, usize, &str)> {
        self.tasks
            .iter()
            .flat_map(|(name, task)| {
                task.args.iter().enumerate().filter_map(move |(i, arg)| match arg {
                    TaskArg::Ref(r) => Some((name.as_str(), i, r.as_str())),
                    TaskArg::Value(_) => None,
                })
            })
            .collect()
    }

    /// Names referenced as arguments but not defined as tasks.
    #[must_use]
    pub fn roots(&self) -> Vec<&str> {
        let roots: BTreeSet<&str> = self
            .edges()
            .into_iter()
            .map(|(_, _, producer)| producer)
            .filter(|p| !self.tasks.contains_key(*p))
            .collect();
        roots.into_iter().collect()
    }

    /// Tasks whose output no other task consumes.
    #[must_use]
    pub fn leafs(&self) -> Vec<&str> {
        let consumed: BTreeSet<&str> = self.edges().into_iter().map(|(_, _, p)| p).collect();
        self.tasks
            .keys()
            .map(String::as_str)
            .filter(|name| !consumed.contains(name))
            .collect()
    }

    /// Every `(consumer, arg_index, root_name)` edge that reads a root.
    #[must_use]
    pub fn inputs(&self) -> Vec<(String, usize, String)> {
        self.edges()
            .into_iter()
            .filter(|(_, _, producer)| !self.tasks.contains_key(*producer))
            .map(|(c, i, p)| (c.to_owned(), i, p.to_owned()))
            .collect()
    }

    /// Point argument `arg_index` of `task` at `new_ref`.
    ///
    /// # Errors
    ///
    /// Fails if the task does not exist or has no such argument.
    pub fn rewire(&mut self, task: &str, arg_index: usize, new_ref: &str) -> Result<(), WorkflowError> {
        let entry = self
            .tasks
            .get_mut(task)
            .ok_or_else(|| WorkflowError::UnknownTask(task.to_owned()))?;
        let arg = entry
            .args
            .get_mut(arg_index)
            .ok_or_else(|| WorkflowError::BadArguments {
                task: task.to_owned(),
                message: format!("no argument at position {arg_index}"),
            })?;
        *arg = TaskArg::Ref(new_ref.to_owned());
        Ok(())
    }

    fn dependency_graph(&self) -> DiGraphMap<&str, ()> {
        let mut graph = DiGraphMap::new();
        for name in self.tasks.keys() {
            graph.add_node(name.as_str());
        }
        for (consumer, _, producer) in self.edges() {
            graph.add_edge(producer, consumer, ());
        }
        graph
    }

    /// Evaluate `name` and everything it depends on.
    ///
    /// # Errors
    ///
    /// Fails on an unknown task, an unset root input, a cycle, or any
    /// task body error.
    pub fn get(&self, name: &str) -> Result<WorkflowValue, WorkflowError> {
        if !self.tasks.contains_key(name) {
            return Err(WorkflowError::UnknownTask(name.to_owned()));
        }

        let mut needed = BTreeSet::new();
        let mut stack = vec![name];
        while let Some(current) = stack.pop() {
            if !needed.insert(current) {
                continue;
            }
            let task = self
                .tasks
                .get(current)
                .ok_or_else(|| WorkflowError::UnknownTask(current.to_owned()))?;
            for arg in &task.args {
                if let TaskArg::Ref(r) = arg {
                    stack.push(r.as_str());
                }
            }
        }

        let order = toposort(&self.dependency_graph(), None)
            .map_err(|cycle| WorkflowError::Cycle(cycle.node_id().to_owned()))?;

        let mut results: HashMap<&str, WorkflowValue> = HashMap::new();
        for current in order.into_iter().filter(|n| needed.contains(n)) {
            let Some(task) = self.tasks.get(current) else {
                continue;
            };
            let args = task
                .args
                .iter()
                .map(|arg| match arg {
                    TaskArg::Ref(r) => results
                        .get(r.as_str())
                        .cloned()
                        .ok_or_else(|| WorkflowError::UnknownTask(r.clone())),
                    TaskArg::Value(v) => Ok(v.clone()),
                })
                .collect::<Result<Vec<_>, _>>()?;
            log::debug!("Running workflow task {current} ({})", task.function);
            let value = (task.func)(&args)?;
            results.insert(current, value);
        }
        results
            .remove(name)
            .ok_or_else(|| WorkflowError::UnknownTask(name.to_owned()))
    }

    /// Build a workflow from a parsed definition.
    ///
    /// # Errors
    ///
    /// Fails on an empty task entry, a non-string function name, or a
    /// function the registry does not know.
    pub fn from_definition(
        definition: BTreeMap<String, Vec<DefinitionArg>>,
        registry: &FunctionRegistry,
    ) -> Result<Self, WorkflowError> {
        let mut workflow = Self::new();
        for (name, entry) in definition {
            let mut entry = entry.into_iter();
            let function = match entry.next() {
                Some(DefinitionArg::Name(f)) => f,
                Some(DefinitionArg::Number(_)) => {
                    return Err(WorkflowError::Definition(format!(
                        "task `{name}` must start with a function name"
                    )));
                }
                None => {
                    return Err(WorkflowError::Definition(format!("task `{name}` is empty")));
                }
            };
            let func = registry
                .get(&function)
                .ok_or_else(|| WorkflowError::UnknownFunction(function.clone()))?;
            let args = entry
                .map(|arg| match arg {
                    DefinitionArg::Name(r) => TaskArg::Ref(r),
                    DefinitionArg::Number(v) => TaskArg::Value(WorkflowValue::Number(v)),
                })
                .collect();
            workflow.set(name, function, func, args);
        }
        Ok(workflow)
    }

    /// Load a JSON (`.json`) or YAML (anything else) workflow file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or parsed, or names an unknown
    /// function.
    pub fn from_path(path: &Path, registry: &FunctionRegistry) -> Result<Self, LatticeError> {
        let text = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let definition: BTreeMap<String, Vec<DefinitionArg>> = if is_json {
            serde_json::from_str(&text).map_err(|e| WorkflowError::Definition(e.to_string()))?
        } else {
            serde_yaml::from_str(&text).map_err(|e| WorkflowError::Definition(e.to_string()))?
        };
        Ok(Self::from_definition(definition, registry)?)
    }
}

/// One element of a task entry in a workflow file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum DefinitionArg {
    /// A literal number.
    Number(f64),
    /// A function name (first element) or a task reference.
    Name(String),
}

/// Functions that workflow files may refer to by name.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, TaskFn>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry").field("functions", &names).finish()
    }
}

impl FunctionRegistry {
    /// Registry with the built-in functions:
    ///
    /// - `threshold(image, value)`: 1 where `image > value`, else 0
    /// - `max_projection(image)`: maximum along Z, kept as a 1-plane volume
    /// - `scale(image, factor)`: multiply every voxel
    /// - `intensity_summary(image)`: one-row table of min/max/mean/sum
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        registry.register("threshold", Arc::new(threshold));
        registry.register("max_projection", Arc::new(max_projection));
        registry.register("scale", Arc::new(scale));
        registry.register("intensity_summary", Arc::new(intensity_summary));
        registry
    }

    /// Add or replace a function.
    pub fn register(&mut self, name: impl Into<String>, func: TaskFn) {
        self.functions.insert(name.into(), func);
    }

    /// Look up a function.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<TaskFn> {
        self.functions.get(name).cloned()
    }
}

fn image_arg<'a>(task: &str, args: &'a [WorkflowValue], i: usize) -> Result<&'a Array3<f32>, WorkflowError> {
    match args.get(i) {
        Some(WorkflowValue::Image(image)) => Ok(image),
        Some(other) => Err(WorkflowError::BadArguments {
            task: task.to_owned(),
            message: format!("argument {i} must be an image, got a {}", other.kind()),
        }),
        None => Err(WorkflowError::BadArguments {
            task: task.to_owned(),
            message: format!("missing argument {i}"),
        }),
    }
}

fn number_arg(task: &str, args: &[WorkflowValue], i: usize) -> Result<f64, WorkflowError> {
    match args.get(i) {
        Some(WorkflowValue::Number(v)) => Ok(*v),
        Some(other) => Err(WorkflowError::BadArguments {
            task: task.to_owned(),
            message: format!("argument {i} must be a number, got a {}", other.kind()),
        }),
        None => Err(WorkflowError::BadArguments {
            task: task.to_owned(),
            message: format!("missing argument {i}"),
        }),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn threshold(args: &[WorkflowValue]) -> Result<WorkflowValue, WorkflowError> {
    let image = image_arg("threshold", args, 0)?;
    let level = number_arg("threshold", args, 1)? as f32;
    Ok(WorkflowValue::Image(
        image.mapv(|v| if v > level { 1.0 } else { 0.0 }),
    ))
}

fn max_projection(args: &[WorkflowValue]) -> Result<WorkflowValue, WorkflowError> {
    let image = image_arg("max_projection", args, 0)?;
    let projected = image
        .fold_axis(NdAxis(0), f32::NEG_INFINITY, |&acc, &v| acc.max(v))
        .insert_axis(NdAxis(0));
    Ok(WorkflowValue::Image(projected))
}

#[allow(clippy::cast_possible_truncation)]
fn scale(args: &[WorkflowValue]) -> Result<WorkflowValue, WorkflowError> {
    let image = image_arg("scale", args, 0)?;
    let factor = number_arg("scale", args, 1)? as f32;
    Ok(WorkflowValue::Image(image.mapv(|v| v * factor)))
}

fn intensity_summary(args: &[WorkflowValue]) -> Result<WorkflowValue, WorkflowError> {
    let image = image_arg("intensity_summary", args, 0)?;
    let min = image.iter().copied().fold(f32::INFINITY, f32::min);
    let max = image.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let sum: f64 = image.iter().map(|&v| f64::from(v)).sum();
    #[allow(clippy::cast_precision_loss)]
    let mean = if image.is_empty() {
        0.0
    } else {
        sum / image.len() as f64
    };
    Ok(WorkflowValue::Table(Table {
        columns: ["min", "max", "mean", "sum"].map(str::to_owned).to_vec(),
        rows: vec![vec![f64::from(min), f64::from(max), mean, sum]],
    }))
}
