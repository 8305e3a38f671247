// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! OVN network interface annotations for workloads.

use appsync_core::AppContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::model::{WorkloadIntent, WorkloadInterfaceIntent, WorkloadInterfaceSpec};
use crate::store::{IntentKind, IntentScope, IntentStore};
use crate::translator::Translator;
use crate::workload::Workload;

/// Multus network attachment annotation.
pub const NETWORKS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/networks";
/// OVN interface list annotation.
pub const NFN_ANNOTATION: &str = "k8s.plugin.opnfv.org/nfn-network";

const OVN_NETWORK_OBJ: &str = "ovn-networkobj";
const NFN_TYPE: &str = "ovn4nfv";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct NetworkAttachment {
    name: String,
    #[serde(default)]
    namespace: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NfnInterface {
    name: String,
    interface: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    ip_address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    mac_address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    default_gateway: String,
}

impl From<&WorkloadInterfaceSpec> for NfnInterface {
    fn from(spec: &WorkloadInterfaceSpec) -> Self {
        Self {
            name: spec.network.clone(),
            interface: spec.interface.clone(),
            ip_address: spec.ip_address.clone(),
            mac_address: spec.mac_address.clone(),
            default_gateway: spec.default_gateway.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct NfnNetwork {
    #[serde(rename = "type")]
    kind: String,
    interface: Vec<NfnInterface>,
}

/// Ensure the OVN network object is attached.
fn merge_networks(existing: Option<&str>) -> Result<String> {
    let mut networks: Vec<NetworkAttachment> = match existing {
        Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw)?,
        _ => Vec::new(),
    };
    if !networks.iter().any(|n| n.name == OVN_NETWORK_OBJ) {
        networks.push(NetworkAttachment {
            name: OVN_NETWORK_OBJ.to_string(),
            namespace: "default".to_string(),
        });
    }
    Ok(serde_json::to_string(&networks)?)
}

/// Merge interfaces by network and interface name. New entries win.
fn merge_interfaces(existing: Option<&str>, added: &[WorkloadInterfaceSpec]) -> Result<String> {
    let mut interfaces = match existing {
        Some(raw) if !raw.trim().is_empty() => serde_json::from_str::<NfnNetwork>(raw)?.interface,
        _ => Vec::new(),
    };
    for spec in added {
        let new = NfnInterface::from(spec);
        match interfaces
            .iter_mut()
            .find(|i| i.name == new.name && i.interface == new.interface)
        {
            Some(slot) => *slot = new,
            None => interfaces.push(new),
        }
    }
    Ok(serde_json::to_string(&NfnNetwork {
        kind: NFN_TYPE.to_string(),
        interface: interfaces,
    })?)
}

/// Add the interface annotations to a workload definition.
pub fn annotate(definition: &[u8], interfaces: &[WorkloadInterfaceSpec]) -> Result<Vec<u8>> {
    let mut workload = Workload::parse(definition)?;
    let networks = merge_networks(workload.annotation(NETWORKS_ANNOTATION)?.as_deref())?;
    let nfn = merge_interfaces(workload.annotation(NFN_ANNOTATION)?.as_deref(), interfaces)?;
    workload.set_annotation(NETWORKS_ANNOTATION, networks)?;
    workload.set_annotation(NFN_ANNOTATION, nfn)?;
    workload.to_bytes()
}

pub struct OvnNetworking {
    intents: IntentStore,
}

impl OvnNetworking {
    pub fn new(intents: IntentStore) -> Self {
        Self { intents }
    }
}

#[async_trait]
impl Translator for OvnNetworking {
    fn name(&self) -> &'static str {
        "ovn"
    }

    async fn translate(&self, scope: &IntentScope, ac: &AppContext) -> Result<()> {
        let workloads: Vec<WorkloadIntent> = self
            .intents
            .list(scope, IntentKind::WorkloadIntent, None)
            .await?;

        for workload in workloads {
            let interfaces: Vec<WorkloadInterfaceIntent> = self
                .intents
                .list(scope, IntentKind::WorkloadInterface, Some(&workload.metadata.name))
                .await?;
            if interfaces.is_empty() {
                continue;
            }
            let specs: Vec<WorkloadInterfaceSpec> = interfaces.into_iter().map(|i| i.spec).collect();
            let app = &workload.spec.app;
            let resource = workload.spec.resource_name();

            let mut updated = 0;
            for cluster in ac.get_cluster_names(app).await? {
                let handle = match ac.get_resource_handle(app, &cluster, &resource).await {
                    Ok(handle) => handle,
                    Err(appsync_core::Error::NotFound(_)) => {
                        debug!(app = %app, cluster = %cluster, resource = %resource, "Workload not on cluster");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
                let definition = ac.get_resource_bytes(app, &cluster, &resource).await?;
                let annotated = annotate(&definition, &specs)?;
                ac.update_value(&handle, std::str::from_utf8(&annotated).map_err(appsync_core::Error::from)?)
                    .await?;
                updated += 1;
            }
            info!(
                app_context_id = %ac.id(),
                app = %app,
                resource = %resource,
                clusters = updated,
                interfaces = specs.len(),
                "Workload interfaces annotated"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(network: &str, interface: &str, ip: &str) -> WorkloadInterfaceSpec {
        WorkloadInterfaceSpec {
            interface: interface.to_string(),
            network: network.to_string(),
            ip_address: ip.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_networks_adds_ovn_object_once() {
        let merged = merge_networks(Some(r#"[{"name":"other","namespace":"ns"}]"#)).unwrap();
        let parsed: Vec<NetworkAttachment> = serde_json::from_str(&merged).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].name, OVN_NETWORK_OBJ);
        assert_eq!(parsed[1].namespace, "default");
        assert_eq!(merge_networks(Some(&merged)).unwrap(), merged);
    }

    #[test]
    fn test_merge_interfaces_new_entries_override() {
        let existing = r#"{"type":"ovn4nfv","interface":[
            {"name":"net1","interface":"eth1","ipAddress":"10.0.0.1"},
            {"name":"net2","interface":"eth2"}]}"#;
        let merged = merge_interfaces(
            Some(existing),
            &[iface("net1", "eth1", "10.0.0.9"), iface("net3", "eth3", "")],
        )
        .unwrap();
        let parsed: NfnNetwork = serde_json::from_str(&merged).unwrap();
        assert_eq!(parsed.kind, "ovn4nfv");
        let names: Vec<_> = parsed.interface.iter().map(|i| i.interface.as_str()).collect();
        assert_eq!(names, vec!["eth1", "eth2", "eth3"]);
        assert_eq!(parsed.interface[0].ip_address, "10.0.0.9");
    }

    #[test]
    fn test_annotate_deployment() {
        let def = b"kind: Deployment\nmetadata:\n  name: web\nspec:\n  template:\n    metadata: {}\n";
        let out = annotate(def, &[iface("net1", "eth1", "")]).unwrap();
        let w = Workload::parse(&out).unwrap();
        assert!(w.annotation(NETWORKS_ANNOTATION).unwrap().unwrap().contains(OVN_NETWORK_OBJ));
        assert!(w.annotation(NFN_ANNOTATION).unwrap().unwrap().contains("eth1"));
    }
}
