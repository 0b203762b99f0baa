use super::labels::{
    LabelSelector, LabelValue, labels_to_string, selector, selector_metric_name, stringify_labels,
};
use super::{Category, FilterFn, LegendFn, MetricQueryDefinition, PlotSpec};
use crate::model::{LabelSet, PromSeries};
use crate::store::RunResults;

pub const SUTEST_ROLE: &str = "sutest";
pub const DRIVER_ROLE: &str = "driver";

const UNIT_COUNT: &str = "Count";
const UNIT_CPU: &str = "CPU cores";
const UNIT_MEMORY: &str = "Memory";
const UNIT_SECONDS: &str = "Seconds";

const NODE_ROLE_JOIN: &str = r#"max by (node) (kube_node_role{role=~".+"})"#;

/// A named container selection, e.g. "Notebooks" → namespace + container regex.
#[derive(Debug, Clone)]
pub struct ContainerSelector {
    pub plot_name: String,
    pub labels: LabelSelector,
}

impl ContainerSelector {
    pub fn new(plot_name: &str, labels: LabelSelector) -> Self {
        Self {
            plot_name: plot_name.to_string(),
            labels,
        }
    }
}

/// Every role's plots in registration order.
pub fn role_plots() -> Vec<(String, Vec<PlotSpec>)> {
    vec![
        (SUTEST_ROLE.to_string(), sutest_plots()),
        (DRIVER_ROLE.to_string(), driver_plots()),
    ]
}

pub fn sutest_plots() -> Vec<PlotSpec> {
    let role = SUTEST_ROLE;
    let containers = [
        ContainerSelector::new(
            "Notebooks",
            selector([
                ("namespace", LabelValue::one("rhods-notebooks")),
                ("container", LabelValue::one("jupyter-nb-psapuser.*")),
            ]),
        ),
        ContainerSelector::new(
            "OpenLDAP",
            selector([
                ("namespace", LabelValue::one("openldap")),
                ("pod", LabelValue::one("openldap.*")),
            ]),
        ),
        ContainerSelector::new(
            "RHODS Dashboard",
            selector([
                ("namespace", LabelValue::one("redhat-ods-applications")),
                ("pod", LabelValue::one("rhods-dashboard.*")),
                ("container", LabelValue::one("rhods-dashboard")),
            ]),
        ),
        ContainerSelector::new(
            "RHODS Dashboard oauth-proxy",
            selector([
                ("namespace", LabelValue::one("redhat-ods-applications")),
                ("pod", LabelValue::one("rhods-dashboard.*")),
                ("container", LabelValue::one("oauth-proxy")),
            ]),
        ),
        ContainerSelector::new(
            "KF Notebook Controller",
            selector([
                ("namespace", LabelValue::one("redhat-ods-applications")),
                ("pod", LabelValue::one("notebook-controller-deployment.*")),
            ]),
        ),
        ContainerSelector::new(
            "ODH Notebook Controller",
            selector([
                ("namespace", LabelValue::one("redhat-ods-applications")),
                ("pod", LabelValue::one("odh-notebook-controller-manager.*")),
            ]),
        ),
        ContainerSelector::new(
            "OpenShift Authentication",
            selector([
                ("namespace", LabelValue::one("openshift-authentication")),
                ("pod", LabelValue::one("oauth-openshift.*")),
            ]),
        ),
    ];

    let mut plots = Vec::new();
    plots.extend(cluster_plots(role));
    plots.extend(container_plots(role, &containers));
    plots.extend(auth_plots());
    plots.extend(master_plots(role));
    plots.extend(apiserver_plots(role));
    plots.extend(master_node_cpu_plots(role));
    plots
}

pub fn driver_plots() -> Vec<PlotSpec> {
    let role = DRIVER_ROLE;
    let containers = [ContainerSelector::new(
        "Test Pods",
        selector([
            ("namespace", LabelValue::one("notebook-scale-test")),
            ("container", LabelValue::one("main")),
        ]),
    )];

    let mut plots = Vec::new();
    plots.extend(cluster_plots(role));
    plots.extend(container_plots(role, &containers));
    plots.extend(master_plots(role));
    plots
}

fn title_case(role: &str) -> String {
    let mut chars = role.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn definition(name: String, query_text: String, category: Category, legend_fn: LegendFn) -> MetricQueryDefinition {
    MetricQueryDefinition {
        name,
        query_text,
        category,
        legend_fn,
        filter_fn: None,
        higher_is_better: false,
        is_memory: false,
        as_timestamp: true,
    }
}

fn plot(title: String, unit: &'static str, category: Category, definitions: Vec<MetricQueryDefinition>) -> PlotSpec {
    PlotSpec {
        title,
        unit,
        category,
        definitions,
        show_legend: false,
        show_queries_in_title: false,
        is_cluster: false,
        container_name: None,
    }
}

// legends

fn metric_name_legend(metric_name: &str, _labels: &LabelSet) -> (String, Option<String>) {
    (metric_name.to_string(), None)
}

fn pod_legend(_metric_name: &str, labels: &LabelSet) -> (String, Option<String>) {
    match labels.get("pod") {
        Some(pod) => (pod.clone(), labels.get("container").cloned()),
        None => (stringify_labels(labels), None),
    }
}

pub(super) fn apiserver_request_legend(_metric_name: &str, labels: &LabelSet) -> (String, Option<String>) {
    match labels.get("code") {
        Some(code) => (format!("code={code}"), None),
        None => (stringify_labels(labels), None),
    }
}

pub(super) fn apiserver_duration_legend(_metric_name: &str, labels: &LabelSet) -> (String, Option<String>) {
    let Some(resource) = labels.get("resource") else {
        return (stringify_labels(labels), None);
    };

    match labels.get("subresource").filter(|sub| !sub.is_empty()) {
        Some(subresource) => (format!("{resource}/{subresource}"), None),
        None => (resource.clone(), None),
    }
}

fn auth_legend(metric_name: &str, labels: &LabelSet, total_metric: &str, group: &str) -> (String, Option<String>) {
    let name = if metric_name == total_metric {
        "total".to_string()
    } else {
        labels
            .get("result")
            .cloned()
            .unwrap_or_else(|| metric_name.to_string())
    };
    (name, Some(group.to_string()))
}

pub(super) fn basic_auth_legend(metric_name: &str, labels: &LabelSet) -> (String, Option<String>) {
    auth_legend(metric_name, labels, BASIC_AUTH_TOTAL, "Basic Auth Count")
}

fn form_auth_legend(metric_name: &str, labels: &LabelSet) -> (String, Option<String>) {
    auth_legend(metric_name, labels, FORM_AUTH_TOTAL, "Form Auth Count")
}

pub(super) fn master_node_legend(_metric_name: &str, labels: &LabelSet) -> (String, Option<String>) {
    match (labels.get("mode"), labels.get("instance")) {
        (Some(mode), Some(instance)) => (mode.clone(), Some(instance.clone())),
        _ => (stringify_labels(labels), None),
    }
}

// filters

/// Keeps the series scraped from the run's master nodes; node identity only
/// exists in the captured inventory, not in any static label.
pub(super) fn master_nodes_only(run: &RunResults, series: &[PromSeries]) -> Vec<PromSeries> {
    let masters: Vec<&str> = run
        .cluster_info
        .master
        .iter()
        .map(|node| node.name.as_str())
        .collect();

    series
        .iter()
        .filter(|entry| {
            entry
                .metric
                .get("instance")
                .is_some_and(|instance| masters.contains(&instance.as_str()))
        })
        .cloned()
        .collect()
}

// cluster

fn cluster_memory(role: &str) -> Vec<MetricQueryDefinition> {
    let usage = format!(
        r#"sum(
  (node_memory_MemTotal_bytes - node_memory_MemAvailable_bytes)
  *
  on(instance) group_left(role) (
    label_replace({NODE_ROLE_JOIN}, "instance", "$1", "node", "(.*)")
  )
)"#
    );
    let requests = format!(
        r#"sum(
  kube_pod_resource_request{{resource="memory"}}
  *
  on(node) group_left(role) ({NODE_ROLE_JOIN})
)"#
    );

    [
        (format!("{role}__cluster_memory_capacity"), "sum(cluster:capacity_memory_bytes:sum)".to_string()),
        (format!("{role}__cluster_memory_usage"), usage),
        (format!("{role}__cluster_memory_requests"), requests),
    ]
    .into_iter()
    .map(|(name, query)| MetricQueryDefinition {
        is_memory: true,
        ..definition(name, query, Category::Cluster, metric_name_legend)
    })
    .collect()
}

fn cluster_cpu(role: &str) -> Vec<MetricQueryDefinition> {
    let requests = format!(
        r#"sum(
  kube_pod_resource_request{{resource="cpu"}}
  *
  on(node) group_left(role) ({NODE_ROLE_JOIN})
)"#
    );
    let usage = format!(
        r#"sum(
  (
    1 - rate(node_cpu_seconds_total{{mode="idle"}}[2m])
    *
    on(namespace, pod) group_left(node) node_namespace_pod:kube_pod_info:{{pod=~"node-exporter.+"}}
  )
  *
  on(node) group_left(role) ({NODE_ROLE_JOIN})
)"#
    );

    [
        (format!("{role}__cluster_cpu_requests"), requests),
        (format!("{role}__cluster_cpu_usage"), usage),
        (format!("{role}__cluster_cpu_capacity"), "sum(cluster:capacity_cpu_cores:sum)".to_string()),
    ]
    .into_iter()
    .map(|(name, query)| definition(name, query, Category::Cluster, metric_name_legend))
    .collect()
}

pub fn cluster_plots(role: &str) -> Vec<PlotSpec> {
    vec![
        PlotSpec {
            is_cluster: true,
            ..plot(
                format!("{role} cluster memory usage"),
                UNIT_MEMORY,
                Category::Cluster,
                cluster_memory(role),
            )
        },
        PlotSpec {
            is_cluster: true,
            ..plot(
                format!("{role} cluster CPU usage"),
                UNIT_CPU,
                Category::Cluster,
                cluster_cpu(role),
            )
        },
    ]
}

// containers

fn with_resource(labels: &str, resource: &str) -> String {
    if labels.is_empty() {
        format!("resource='{resource}'")
    } else {
        format!("{labels},resource='{resource}'")
    }
}

fn container_cpu(role: &str, labels: &LabelSelector) -> Vec<MetricQueryDefinition> {
    let filters = labels_to_string(labels, &[]);
    let name = selector_metric_name(labels);

    [
        (
            format!("{role}__container_cpu__{name}"),
            format!("sum by (pod)(rate(container_cpu_usage_seconds_total{{{filters}}}[1m]))"),
        ),
        (
            format!("{role}__container_cpu_requests__{name}"),
            format!("kube_pod_container_resource_requests{{{}}}", with_resource(&filters, "cpu")),
        ),
        (
            format!("{role}__container_cpu_limits__{name}"),
            format!("kube_pod_container_resource_limits{{{}}}", with_resource(&filters, "cpu")),
        ),
    ]
    .into_iter()
    .map(|(name, query)| definition(name, query, Category::Container, pod_legend))
    .collect()
}

fn container_memory(role: &str, labels: &LabelSelector) -> Vec<MetricQueryDefinition> {
    let filters = labels_to_string(labels, &[]);
    let name = selector_metric_name(labels);

    [
        (
            format!("{role}__container_memory__{name}"),
            format!("container_memory_rss{{{filters}}}"),
        ),
        (
            format!("{role}__container_memory_requests__{name}"),
            format!("kube_pod_container_resource_requests{{{}}}", with_resource(&filters, "memory")),
        ),
        (
            format!("{role}__container_memory_limits__{name}"),
            format!("kube_pod_container_resource_limits{{{}}}", with_resource(&filters, "memory")),
        ),
    ]
    .into_iter()
    .map(|(name, query)| MetricQueryDefinition {
        is_memory: true,
        ..definition(name, query, Category::Container, pod_legend)
    })
    .collect()
}

/// CPU and memory plots (usage, requests, limits) for each selector.
pub fn container_plots(role: &str, selectors: &[ContainerSelector]) -> Vec<PlotSpec> {
    let mut plots = Vec::with_capacity(selectors.len() * 2);

    for selection in selectors {
        let container = selection
            .labels
            .get("container")
            .map(ToString::to_string)
            .unwrap_or_else(|| "all".to_string());

        plots.push(PlotSpec {
            container_name: Some(container),
            ..plot(
                format!("{}: CPU usage", selection.plot_name),
                UNIT_CPU,
                Category::Container,
                container_cpu(role, &selection.labels),
            )
        });
        plots.push(plot(
            format!("{}: Mem usage", selection.plot_name),
            UNIT_MEMORY,
            Category::Container,
            container_memory(role, &selection.labels),
        ));
    }

    plots
}

/// API server and etcd containers, leaving out their guard pods.
pub fn master_plots(role: &str) -> Vec<PlotSpec> {
    let title = title_case(role);
    let selectors = [
        ContainerSelector::new(
            &format!("{title} ApiServer"),
            selector([
                ("namespace", LabelValue::one("openshift-kube-apiserver")),
                ("pod", LabelValue::many(&["!~kube-apiserver-guard.*", "kube-apiserver-.*"])),
            ]),
        ),
        ContainerSelector::new(
            &format!("{title} ETCD"),
            selector([
                ("namespace", LabelValue::one("openshift-etcd")),
                ("pod", LabelValue::many(&["!~etcd-guard-.*", "etcd-.*"])),
            ]),
        ),
    ];

    container_plots(role, &selectors)
}

// api server

const APISERVER_VERBS: [&str; 4] = ["GET", "PUT", "LIST", "PATCH"];

fn prom_plot(definition: MetricQueryDefinition, unit: &'static str) -> PlotSpec {
    PlotSpec {
        show_legend: true,
        show_queries_in_title: true,
        ..plot(
            format!("Prom: {}", definition.name),
            unit,
            definition.category,
            vec![definition],
        )
    }
}

pub fn apiserver_plots(role: &str) -> Vec<PlotSpec> {
    let title = title_case(role);

    let requests = [
        ("successes", "2.."),
        ("client errors", "4.."),
        ("server errors", "5.."),
    ]
    .into_iter()
    .map(|(label, code)| {
        definition(
            format!("{title} API Server Requests ({label})"),
            format!(r#"sum by (code) (increase(apiserver_request_total{{code=~"{code}"}}[2m]))"#),
            Category::Apiserver,
            apiserver_request_legend,
        )
    });

    let durations = APISERVER_VERBS.into_iter().map(|verb| {
        definition(
            format!("{title} API Server {verb} Requests duration"),
            format!(
                r#"histogram_quantile(0.99, sum(rate(apiserver_request_duration_seconds_bucket{{apiserver="kube-apiserver", verb="{verb}", subresource!="log"}}[2m])) by (resource,subresource,le)) > 0"#
            ),
            Category::Apiserver,
            apiserver_duration_legend,
        )
    });

    requests
        .map(|definition| prom_plot(definition, UNIT_COUNT))
        .chain(durations.map(|definition| prom_plot(definition, UNIT_SECONDS)))
        .collect()
}

// authentication

const BASIC_AUTH_TOTAL: &str = "openshift_auth_basic_password_count";
const BASIC_AUTH_RESULT: &str = "openshift_auth_basic_password_count_result";
const FORM_AUTH_TOTAL: &str = "openshift_auth_form_password_count";
const FORM_AUTH_RESULT: &str = "openshift_auth_form_password_count_result";

fn auth_definitions(total: &str, result: &str, legend_fn: LegendFn) -> Vec<MetricQueryDefinition> {
    vec![
        definition(total.to_string(), format!("sum ({total})"), Category::Auth, legend_fn),
        definition(
            result.to_string(),
            format!("sum by (result) ({result})"),
            Category::Auth,
            legend_fn,
        ),
    ]
}

pub fn auth_plots() -> Vec<PlotSpec> {
    vec![
        plot(
            "OCP: Basic Auth Metrics".to_string(),
            UNIT_COUNT,
            Category::Auth,
            auth_definitions(BASIC_AUTH_TOTAL, BASIC_AUTH_RESULT, basic_auth_legend),
        ),
        plot(
            "OCP: Form Auth Metrics".to_string(),
            UNIT_COUNT,
            Category::Auth,
            auth_definitions(FORM_AUTH_TOTAL, FORM_AUTH_RESULT, form_auth_legend),
        ),
    ]
}

// master nodes

pub fn master_node_cpu_plots(role: &str) -> Vec<PlotSpec> {
    let title = title_case(role);
    let filter: FilterFn = master_nodes_only;

    [
        (
            format!("{title} Master Node CPU usage"),
            "sum(irate(node_cpu_seconds_total[2m])) by (mode, instance)".to_string(),
            false,
        ),
        (
            format!("{title} Master Node CPU idle"),
            r#"sum(irate(node_cpu_seconds_total{mode="idle"}[2m])) by (mode, instance)"#.to_string(),
            true,
        ),
    ]
    .into_iter()
    .map(|(name, query, higher_is_better)| {
        let definition = MetricQueryDefinition {
            filter_fn: Some(filter),
            higher_is_better,
            ..definition(name, query, Category::Cluster, master_node_legend)
        };
        prom_plot(definition, UNIT_CPU)
    })
    .collect()
}
