// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Link configuration describing one remote cluster to mirror from.

use crate::error::{MirrorError, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::collections::BTreeMap;

/// Read-only description of a remote cluster link. One watcher instance is
/// created per link.
#[derive(Debug, Clone)]
pub struct Link {
    /// Used as a label value and as the suffix of every mirrored name
    pub target_cluster_name: String,
    /// DNS suffix of the remote cluster, used in fully qualified names
    pub target_cluster_domain: String,
    /// Comma-separated list of gateway hosts or IPs
    pub gateway_address: String,
    pub gateway_port: u16,
    /// Identity of the remote gateway; empty means unset
    pub gateway_identity: String,
    pub probe_spec: ProbeSpec,
    /// Selects which remote services are mirrored
    pub selector: LabelSelector,
}

#[derive(Debug, Clone, Default)]
pub struct ProbeSpec {
    pub port: u16,
}

impl Link {
    /// Whether the given labels satisfy the link's export selector.
    ///
    /// An empty selector matches everything. An unknown match expression
    /// operator is an error; callers treat it as "does not match".
    pub fn selector_matches(&self, labels: &BTreeMap<String, String>) -> Result<bool> {
        if let Some(match_labels) = &self.selector.match_labels {
            for (key, value) in match_labels {
                if labels.get(key) != Some(value) {
                    return Ok(false);
                }
            }
        }

        if let Some(expressions) = &self.selector.match_expressions {
            for expr in expressions {
                let values = expr.values.as_deref().unwrap_or_default();
                let matched = match expr.operator.as_str() {
                    "In" => labels
                        .get(&expr.key)
                        .is_some_and(|v| values.contains(v)),
                    "NotIn" => labels
                        .get(&expr.key)
                        .map_or(true, |v| !values.contains(v)),
                    "Exists" => labels.contains_key(&expr.key),
                    "DoesNotExist" => !labels.contains_key(&expr.key),
                    other => {
                        return Err(MirrorError::Selector(format!(
                            "unknown operator '{other}'"
                        )))
                    }
                };
                if !matched {
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;

    fn make_link(selector: LabelSelector) -> Link {
        Link {
            target_cluster_name: "west".to_string(),
            target_cluster_domain: "cluster.local".to_string(),
            gateway_address: "10.0.0.1".to_string(),
            gateway_port: 4143,
            gateway_identity: String::new(),
            probe_spec: ProbeSpec { port: 4191 },
            selector,
        }
    }

    fn make_labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn match_labels_selector(pairs: &[(&str, &str)]) -> LabelSelector {
        LabelSelector {
            match_labels: Some(make_labels(pairs)),
            ..Default::default()
        }
    }

    fn expression_selector(key: &str, operator: &str, values: Option<Vec<&str>>) -> LabelSelector {
        LabelSelector {
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: key.to_string(),
                operator: operator.to_string(),
                values: values.map(|vs| vs.into_iter().map(String::from).collect()),
            }]),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let link = make_link(LabelSelector::default());
        assert!(link.selector_matches(&BTreeMap::new()).unwrap());
        assert!(link
            .selector_matches(&make_labels(&[("app", "web")]))
            .unwrap());
    }

    #[test]
    fn test_match_labels() {
        let link = make_link(match_labels_selector(&[("mirror.linkerd.io/exported", "true")]));

        assert!(link
            .selector_matches(&make_labels(&[("mirror.linkerd.io/exported", "true")]))
            .unwrap());
        assert!(!link
            .selector_matches(&make_labels(&[("mirror.linkerd.io/exported", "false")]))
            .unwrap());
        assert!(!link.selector_matches(&BTreeMap::new()).unwrap());
    }

    #[test]
    fn test_match_expression_in() {
        let link = make_link(expression_selector("env", "In", Some(vec!["prod", "staging"])));

        assert!(link.selector_matches(&make_labels(&[("env", "prod")])).unwrap());
        assert!(!link.selector_matches(&make_labels(&[("env", "dev")])).unwrap());
        assert!(!link.selector_matches(&BTreeMap::new()).unwrap());
    }

    #[test]
    fn test_match_expression_not_in() {
        let link = make_link(expression_selector("env", "NotIn", Some(vec!["dev"])));

        assert!(link.selector_matches(&make_labels(&[("env", "prod")])).unwrap());
        // objects without the key also match NotIn
        assert!(link.selector_matches(&BTreeMap::new()).unwrap());
        assert!(!link.selector_matches(&make_labels(&[("env", "dev")])).unwrap());
    }

    #[test]
    fn test_match_expression_exists() {
        let link = make_link(expression_selector("exported", "Exists", None));

        assert!(link
            .selector_matches(&make_labels(&[("exported", "anything")]))
            .unwrap());
        assert!(!link.selector_matches(&BTreeMap::new()).unwrap());
    }

    #[test]
    fn test_match_expression_does_not_exist() {
        let link = make_link(expression_selector("internal", "DoesNotExist", None));

        assert!(link.selector_matches(&BTreeMap::new()).unwrap());
        assert!(!link
            .selector_matches(&make_labels(&[("internal", "true")]))
            .unwrap());
    }

    #[test]
    fn test_unknown_operator_is_an_error() {
        let link = make_link(expression_selector("env", "GreaterThan", Some(vec!["1"])));

        let err = link
            .selector_matches(&make_labels(&[("env", "2")]))
            .unwrap_err();
        assert!(matches!(err, MirrorError::Selector(_)));
    }
}
