use std::fmt;

use indexmap::IndexMap;

use crate::model::LabelSet;

const NEGATIVE_MATCH_PREFIX: &str = "!~";

/// One or several regexes a label must (or, with a `!~` prefix, must not) match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelValue {
    One(String),
    Many(Vec<String>),
}

impl LabelValue {
    pub fn one(value: &str) -> Self {
        Self::One(value.to_string())
    }

    pub fn many(values: &[&str]) -> Self {
        Self::Many(values.iter().map(|value| value.to_string()).collect())
    }

    pub fn values(&self) -> &[String] {
        match self {
            Self::One(value) => std::slice::from_ref(value),
            Self::Many(values) => values,
        }
    }
}

impl fmt::Display for LabelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::One(value) => f.write_str(value),
            Self::Many(values) => {
                let quoted: Vec<String> = values.iter().map(|value| quote(value)).collect();
                write!(f, "[{}]", quoted.join(", "))
            }
        }
    }
}

/// Quotes a list item the way captured-series dumps name it: single quotes
/// unless the value itself holds one.
fn quote(value: &str) -> String {
    if value.contains('\'') && !value.contains('"') {
        format!("\"{value}\"")
    } else {
        format!("'{}'", value.replace('\'', "\\'"))
    }
}

/// Label selector in declaration order; the order is part of the derived metric name.
pub type LabelSelector = IndexMap<String, LabelValue>;

pub fn selector<const N: usize>(pairs: [(&str, LabelValue); N]) -> LabelSelector {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// Renders a selector in PromQL filter syntax, e.g. `namespace=~'ns',pod!~'guard.*'`.
pub fn labels_to_string(labels: &LabelSelector, exclude: &[&str]) -> String {
    let mut filters = Vec::new();

    for (key, value) in labels {
        if exclude.contains(&key.as_str()) {
            continue;
        }

        for literal in value.values() {
            match literal.strip_prefix(NEGATIVE_MATCH_PREFIX) {
                Some(negated) => filters.push(format!("{key}!~'{negated}'")),
                None => filters.push(format!("{key}=~'{literal}'")),
            }
        }
    }

    filters.join(",")
}

/// Stable name fragment for a selector: `key=value` pairs joined by `_`.
pub fn selector_metric_name(labels: &LabelSelector) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("_")
}

/// Fallback legend for series without any recognized label.
pub fn stringify_labels(labels: &LabelSet) -> String {
    let pairs = labels
        .iter()
        .map(|(key, value)| format!("{key}=\"{value}\""))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{{pairs}}}")
}

#[cfg(test)]
mod tests {
    use crate::model::LabelSet;

    use super::{LabelValue, labels_to_string, selector, selector_metric_name, stringify_labels};

    #[test]
    fn positive_values_use_regex_match() {
        let labels = selector([
            ("namespace", LabelValue::one("rhods-notebooks")),
            ("container", LabelValue::one("jupyter-nb-psapuser.*")),
        ]);

        let rendered = labels_to_string(&labels, &[]);
        assert_eq!(
            rendered,
            "namespace=~'rhods-notebooks',container=~'jupyter-nb-psapuser.*'"
        );
        assert!(!rendered.contains("!~"));
    }

    #[test]
    fn negative_prefix_is_stripped_and_negated() {
        let labels = selector([
            ("namespace", LabelValue::one("openshift-etcd")),
            ("pod", LabelValue::many(&["!~etcd-guard-.*", "etcd-.*"])),
        ]);

        assert_eq!(
            labels_to_string(&labels, &[]),
            "namespace=~'openshift-etcd',pod!~'etcd-guard-.*',pod=~'etcd-.*'"
        );
        assert_eq!(labels_to_string(&labels, &["pod"]), "namespace=~'openshift-etcd'");
    }

    #[test]
    fn metric_name_follows_declaration_order() {
        let labels = selector([
            ("namespace", LabelValue::one("openshift-etcd")),
            ("pod", LabelValue::many(&["!~etcd-guard-.*", "etcd-.*"])),
        ]);

        assert_eq!(
            selector_metric_name(&labels),
            "namespace=openshift-etcd_pod=['!~etcd-guard-.*', 'etcd-.*']"
        );
    }

    #[test]
    fn list_items_switch_quotes_around_apostrophes() {
        let labels = selector([("pod", LabelValue::many(&["it's", "plain"]))]);
        assert_eq!(selector_metric_name(&labels), r#"pod=["it's", 'plain']"#);
    }

    #[test]
    fn stringified_labels_are_sorted() {
        let mut labels = LabelSet::new();
        labels.insert("verb".to_string(), "GET".to_string());
        labels.insert("le".to_string(), "0.5".to_string());

        assert_eq!(stringify_labels(&labels), r#"{le="0.5", verb="GET"}"#);
        assert_eq!(stringify_labels(&LabelSet::new()), "{}");
    }
}
