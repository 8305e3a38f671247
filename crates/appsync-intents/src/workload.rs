// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pod template access on workload resource definitions.

use std::collections::BTreeMap;

use serde_yaml::{Mapping, Value};

use crate::error::{IntentError, Result};

/// A workload resource definition parsed from its YAML bytes.
#[derive(Debug, Clone)]
pub struct Workload {
    doc: Value,
}

impl Workload {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let doc: Value = serde_yaml::from_slice(bytes)?;
        if !doc.is_mapping() {
            return Err(IntentError::Invalid("workload is not a mapping".to_string()));
        }
        Ok(Self { doc })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_yaml::to_string(&self.doc)?.into_bytes())
    }

    pub fn kind(&self) -> &str {
        self.doc.get("kind").and_then(Value::as_str).unwrap_or_default()
    }

    /// Path of the metadata mapping that ends up on the pods.
    fn pod_metadata_path(&self) -> Result<&'static [&'static str]> {
        match self.kind() {
            "Pod" => Ok(&["metadata"]),
            "CronJob" => Ok(&["spec", "jobTemplate", "spec", "template", "metadata"]),
            "Deployment" | "StatefulSet" | "DaemonSet" | "ReplicaSet" | "Job" => {
                Ok(&["spec", "template", "metadata"])
            }
            other => Err(IntentError::Invalid(format!(
                "kind {other:?} has no pod template"
            ))),
        }
    }

    fn pod_metadata(&self) -> Result<Option<&Value>> {
        let mut node = &self.doc;
        for key in self.pod_metadata_path()? {
            match node.get(*key) {
                Some(next) => node = next,
                None => return Ok(None),
            }
        }
        Ok(Some(node))
    }

    fn pod_map_mut(&mut self, field: &str) -> Result<&mut Mapping> {
        let path = self.pod_metadata_path()?;
        let mut node = &mut self.doc;
        for key in path.iter().copied().chain(std::iter::once(field)) {
            let map = node
                .as_mapping_mut()
                .ok_or_else(|| IntentError::Invalid(format!("parent of {key} is not a mapping")))?;
            node = map
                .entry(Value::from(key))
                .or_insert_with(|| Value::Mapping(Mapping::new()));
            if node.is_null() {
                *node = Value::Mapping(Mapping::new());
            }
        }
        node.as_mapping_mut()
            .ok_or_else(|| IntentError::Invalid(format!("{field} is not a mapping")))
    }

    /// A pod template annotation.
    pub fn annotation(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .pod_metadata()?
            .and_then(|m| m.get("annotations"))
            .and_then(|a| a.get(key))
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    pub fn set_annotation(&mut self, key: &str, value: String) -> Result<()> {
        self.pod_map_mut("annotations")?
            .insert(Value::from(key), Value::from(value));
        Ok(())
    }

    /// Add labels to the pod template, replacing existing values.
    pub fn add_labels(&mut self, labels: &BTreeMap<String, String>) -> Result<()> {
        let map = self.pod_map_mut("labels")?;
        for (k, v) in labels {
            map.insert(Value::from(k.as_str()), Value::from(v.as_str()));
        }
        Ok(())
    }

    /// A pod template label.
    pub fn label(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .pod_metadata()?
            .and_then(|m| m.get("labels"))
            .and_then(|l| l.get(key))
            .and_then(Value::as_str)
            .map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEPLOYMENT: &str = "apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  template:
    metadata:
      labels:
        app: web
    spec:
      containers: []
";

    #[test]
    fn test_deployment_template_annotation() {
        let mut w = Workload::parse(DEPLOYMENT.as_bytes()).unwrap();
        assert_eq!(w.annotation("x").unwrap(), None);
        w.set_annotation("x", "1".to_string()).unwrap();
        let w = Workload::parse(&w.to_bytes().unwrap()).unwrap();
        assert_eq!(w.annotation("x").unwrap().as_deref(), Some("1"));
        assert_eq!(w.label("app").unwrap().as_deref(), Some("web"));
    }

    #[test]
    fn test_cronjob_and_pod_paths() {
        let mut cron = Workload::parse(b"kind: CronJob\nmetadata:\n  name: c\n").unwrap();
        let labels = BTreeMap::from([("sfc".to_string(), "left".to_string())]);
        cron.add_labels(&labels).unwrap();
        let doc: Value = serde_yaml::from_slice(&cron.to_bytes().unwrap()).unwrap();
        assert_eq!(
            doc["spec"]["jobTemplate"]["spec"]["template"]["metadata"]["labels"]["sfc"].as_str(),
            Some("left")
        );

        let mut pod = Workload::parse(b"kind: Pod\nmetadata:\n  name: p\n").unwrap();
        pod.add_labels(&labels).unwrap();
        assert_eq!(pod.label("sfc").unwrap().as_deref(), Some("left"));
    }

    #[test]
    fn test_kind_without_template_is_rejected() {
        let mut svc = Workload::parse(b"kind: Service\n").unwrap();
        assert!(matches!(
            svc.set_annotation("x", "1".to_string()),
            Err(IntentError::Invalid(_))
        ));
        assert!(Workload::parse(b"- a\n").is_err());
    }
}
