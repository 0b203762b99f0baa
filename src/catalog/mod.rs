mod labels;
mod queries;

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::ArtifactError;
use crate::model::{LabelSet, PromSeries};
use crate::store::RunResults;

pub use labels::{LabelSelector, LabelValue, selector};
pub use queries::{ContainerSelector, role_plots};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Cluster,
    Container,
    Apiserver,
    Auth,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Cluster,
        Category::Container,
        Category::Apiserver,
        Category::Auth,
    ];
}

/// Maps a metric name and a series' labels to `(legend, group)`.
pub type LegendFn = fn(&str, &LabelSet) -> (String, Option<String>);

/// Narrows the series a run captured for a metric.
pub type FilterFn = fn(&RunResults, &[PromSeries]) -> Vec<PromSeries>;

#[derive(Clone)]
pub struct MetricQueryDefinition {
    pub name: String,
    pub query_text: String,
    pub category: Category,
    pub legend_fn: LegendFn,
    pub filter_fn: Option<FilterFn>,
    pub higher_is_better: bool,
    pub is_memory: bool,
    pub as_timestamp: bool,
}

impl fmt::Debug for MetricQueryDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricQueryDefinition")
            .field("name", &self.name)
            .field("query_text", &self.query_text)
            .field("category", &self.category)
            .field("filtered", &self.filter_fn.is_some())
            .field("higher_is_better", &self.higher_is_better)
            .field("is_memory", &self.is_memory)
            .field("as_timestamp", &self.as_timestamp)
            .finish()
    }
}

/// One registration handed to the plotting layer.
#[derive(Debug, Clone)]
pub struct PlotSpec {
    pub title: String,
    pub unit: &'static str,
    pub category: Category,
    pub definitions: Vec<MetricQueryDefinition>,
    pub show_legend: bool,
    pub show_queries_in_title: bool,
    pub is_cluster: bool,
    pub container_name: Option<String>,
}

impl PlotSpec {
    pub fn queries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.definitions
            .iter()
            .map(|definition| (definition.name.as_str(), definition.query_text.as_str()))
    }

    fn summary(&self, role: &str) -> PlotSummary {
        let flag = |get: fn(&MetricQueryDefinition) -> bool| self.definitions.iter().any(get);

        PlotSummary {
            role: role.to_string(),
            title: self.title.clone(),
            unit: self.unit,
            category: self.category,
            queries: self
                .queries()
                .map(|(name, query)| QuerySummary {
                    name: name.to_string(),
                    query: query.to_string(),
                })
                .collect(),
            as_timestamp: flag(|definition| definition.as_timestamp),
            is_memory: flag(|definition| definition.is_memory),
            higher_is_better: flag(|definition| definition.higher_is_better),
            filtered: flag(|definition| definition.filter_fn.is_some()),
            show_legend: self.show_legend,
            show_queries_in_title: self.show_queries_in_title,
            is_cluster: self.is_cluster,
            container_name: self.container_name.clone(),
        }
    }
}

/// Boundary to the plotting/reporting layer.
pub trait PlotRegistrar {
    fn register(&mut self, role: &str, plot: &PlotSpec);
}

#[derive(Debug, Clone, Serialize)]
pub struct QuerySummary {
    pub name: String,
    pub query: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlotSummary {
    pub role: String,
    pub title: String,
    pub unit: &'static str,
    pub category: Category,
    pub queries: Vec<QuerySummary>,
    pub as_timestamp: bool,
    pub is_memory: bool,
    pub higher_is_better: bool,
    pub filtered: bool,
    pub show_legend: bool,
    pub show_queries_in_title: bool,
    pub is_cluster: bool,
    pub container_name: Option<String>,
}

/// Registrar that keeps a serializable record of every plot it receives.
#[derive(Debug, Default)]
pub struct RecordingRegistrar {
    pub plots: Vec<PlotSummary>,
}

impl PlotRegistrar for RecordingRegistrar {
    fn register(&mut self, role: &str, plot: &PlotSpec) {
        debug!(role, title = %plot.title, "plot registered");
        self.plots.push(plot.summary(role));
    }
}

impl RecordingRegistrar {
    /// Summaries of `plans` without going through a catalog.
    pub fn summarize(plans: &[(String, Vec<PlotSpec>)]) -> Vec<PlotSummary> {
        plans
            .iter()
            .flat_map(|(role, plots)| plots.iter().map(move |plot| plot.summary(role)))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct LabelledSeries {
    pub label: String,
    pub group: Option<String>,
    pub series: PromSeries,
}

type RoleIndex = BTreeMap<Category, Vec<MetricQueryDefinition>>;

/// Query definitions per cluster role, filled once by [`MetricCatalog::register`].
#[derive(Debug, Default)]
pub struct MetricCatalog {
    registered: bool,
    roles: BTreeMap<String, RoleIndex>,
}

impl MetricCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds every role's plots, checks name uniqueness, then hands the plots
    /// to `registrar`. Nothing reaches the registrar when the check fails.
    pub fn register(&mut self, registrar: &mut dyn PlotRegistrar) -> Result<(), ArtifactError> {
        if self.registered {
            return Err(ArtifactError::CatalogAlreadyRegistered);
        }

        let plans = role_plots();
        let roles = index_definitions(&plans)?;

        for (role, plots) in &plans {
            for plot in plots {
                registrar.register(role, plot);
            }
        }

        info!(
            roles = roles.len(),
            metrics = roles
                .values()
                .flat_map(|index| index.values())
                .map(Vec::len)
                .sum::<usize>(),
            "metric catalog registered"
        );

        self.roles = roles;
        self.registered = true;
        Ok(())
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }

    pub fn definitions(&self, role: &str, category: Category) -> &[MetricQueryDefinition] {
        self.roles
            .get(role)
            .and_then(|index| index.get(&category))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn find(&self, role: &str, name: &str) -> Option<&MetricQueryDefinition> {
        self.roles
            .get(role)?
            .values()
            .flatten()
            .find(|definition| definition.name == name)
    }

    /// Series a run captured for `name`, filtered and labelled the way the
    /// definition prescribes. Unknown metrics yield nothing.
    pub fn series_for(&self, run: &RunResults, role: &str, name: &str) -> Vec<LabelledSeries> {
        let Some(definition) = self.find(role, name) else {
            debug!(role, metric = name, "metric not in catalog");
            return Vec::new();
        };

        let raw = run.get_metrics(role, name);
        let series = match definition.filter_fn {
            Some(filter) => filter(run, raw),
            None => raw.to_vec(),
        };

        series
            .into_iter()
            .map(|series| {
                let (label, group) = (definition.legend_fn)(name, &series.metric);
                LabelledSeries {
                    label,
                    group,
                    series,
                }
            })
            .collect()
    }
}

/// Validates per-role name uniqueness and indexes definitions by category.
pub fn index_definitions(
    plans: &[(String, Vec<PlotSpec>)],
) -> Result<BTreeMap<String, RoleIndex>, ArtifactError> {
    let mut roles: BTreeMap<String, RoleIndex> = BTreeMap::new();

    for (role, plots) in plans {
        let index = roles.entry(role.clone()).or_default();
        let mut seen: HashSet<&str> = index
            .values()
            .flatten()
            .map(|definition| definition.name.as_str())
            .collect();

        let mut additions: Vec<&MetricQueryDefinition> = Vec::new();
        for definition in plots.iter().flat_map(|plot| plot.definitions.iter()) {
            if !seen.insert(definition.name.as_str()) {
                return Err(ArtifactError::DuplicateMetricName {
                    role: role.clone(),
                    name: definition.name.clone(),
                });
            }
            additions.push(definition);
        }

        for definition in additions {
            index
                .entry(definition.category)
                .or_default()
                .push(definition.clone());
        }
    }

    Ok(roles)
}
