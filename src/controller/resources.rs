//! Kubernetes resource builders for RelayBroker fleets
//!
//! This module creates and manages the underlying Kubernetes resources
//! (StatefulSet, Services, properties Secret, companion scale-down request)
//! for each RelayBroker.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec,
    PodTemplateSpec, Secret, SecretVolumeSource, Service, ServicePort, ServiceSpec, Volume,
    VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::{Client, Resource, ResourceExt};
use tracing::{info, instrument, warn};

use crate::controller::properties;
use crate::controller::selectors::{selector_labels, standard_labels};
use crate::crd::{RelayBroker, RelayBrokerScaleDown, RelayBrokerScaleDownSpec};
use crate::error::{Error, Result};

/// Field manager for server-side apply
pub const FIELD_MANAGER: &str = "relaymq-operator";

/// Web console and management API port on every broker pod
pub const CONSOLE_PORT: i32 = 8161;

/// Port name reserved for the console on Services and containers
pub const CONSOLE_PORT_NAME: &str = "console";

const PROPERTIES_KEY: &str = "broker.properties";
const PROPERTIES_MOUNT_PATH: &str = "/etc/relaymq/props";
const TLS_MOUNT_ROOT: &str = "/etc/relaymq/tls";
const JOURNAL_MOUNT_PATH: &str = "/var/lib/relaymq/journal";

/// Create an OwnerReference for garbage collection
pub fn owner_reference(broker: &RelayBroker) -> OwnerReference {
    OwnerReference {
        api_version: RelayBroker::api_version(&()).to_string(),
        kind: RelayBroker::kind(&()).to_string(),
        name: broker.name_any(),
        uid: broker.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Build the resource name for a given component
fn resource_name(broker: &RelayBroker, suffix: &str) -> String {
    format!("{}-{}", broker.name_any(), suffix)
}

/// Name of the headless Service governing the fleet StatefulSet
pub fn headless_service_name(broker_name: &str) -> String {
    format!("{broker_name}-headless")
}

/// Overlay user-supplied resource templates onto generated metadata.
///
/// Reserved selector keys never reach this point: validation rejects
/// templates that try to set them.
fn apply_templates(broker: &RelayBroker, kind: &str, name: &str, meta: &mut ObjectMeta) {
    for template in &broker.spec.resource_templates {
        if !template.matches(kind, name) {
            continue;
        }
        if !template.labels.is_empty() {
            let labels = meta.labels.get_or_insert_with(BTreeMap::new);
            for (k, v) in &template.labels {
                labels.insert(k.clone(), v.clone());
            }
        }
        if !template.annotations.is_empty() {
            let annotations = meta.annotations.get_or_insert_with(BTreeMap::new);
            for (k, v) in &template.annotations {
                annotations.insert(k.clone(), v.clone());
            }
        }
    }
}

fn base_meta(broker: &RelayBroker, kind: &str, name: &str) -> ObjectMeta {
    let mut meta = ObjectMeta {
        name: Some(name.to_string()),
        namespace: broker.namespace(),
        labels: Some(standard_labels(broker)),
        owner_references: Some(vec![owner_reference(broker)]),
        ..Default::default()
    };
    apply_templates(broker, kind, name, &mut meta);
    meta
}

// ============================================================================
// Broker properties Secret
// ============================================================================

/// Render the merged property payload for the fleet.
///
/// Flat `brokerProperties` lines come first in their declared order,
/// followed by the flattened `brokerConfig` entries in sorted key order.
pub fn rendered_properties(broker: &RelayBroker) -> Result<String> {
    let mut pairs = properties::key_value_pairs(&broker.spec.broker_properties)
        .map_err(|e| Error::ValidationError(e.to_string()))?;

    if let Some(config) = &broker.spec.broker_config {
        pairs.extend(properties::flatten_config(config));
    }

    Ok(properties::render_properties(&pairs))
}

/// Ensure the Secret carrying `broker.properties` exists and is current
#[instrument(skip(client, broker), fields(name = %broker.name_any(), namespace = broker.namespace()))]
pub async fn ensure_properties_secret(client: &Client, broker: &RelayBroker) -> Result<()> {
    let namespace = broker.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Secret> = Api::namespaced(client.clone(), &namespace);
    let name = resource_name(broker, "props");

    let secret = build_properties_secret(broker)?;

    let patch = Patch::Apply(&secret);
    api.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &patch)
        .await?;

    Ok(())
}

pub fn build_properties_secret(broker: &RelayBroker) -> Result<Secret> {
    let name = resource_name(broker, "props");

    let mut string_data = BTreeMap::new();
    string_data.insert(PROPERTIES_KEY.to_string(), rendered_properties(broker)?);

    Ok(Secret {
        metadata: base_meta(broker, "Secret", &name),
        string_data: Some(string_data),
        ..Default::default()
    })
}

#[instrument(skip(client, broker), fields(name = %broker.name_any(), namespace = broker.namespace()))]
pub async fn delete_properties_secret(client: &Client, broker: &RelayBroker) -> Result<()> {
    let namespace = broker.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Secret> = Api::namespaced(client.clone(), &namespace);
    let name = resource_name(broker, "props");

    match api.delete(&name, &DeleteParams::default()).await {
        Ok(_) => info!("Deleted Secret {}", name),
        Err(kube::Error::Api(e)) if e.code == 404 => {
            warn!("Secret {} not found, already deleted", name);
        }
        Err(e) => return Err(Error::KubeError(e)),
    }

    Ok(())
}

// ============================================================================
// Services
// ============================================================================

/// Ensure the headless Service governing the StatefulSet.
///
/// Publishes addresses for not-ready pods so peers and the drain endpoint
/// stay resolvable while a broker shuts down.
#[instrument(skip(client, broker), fields(name = %broker.name_any(), namespace = broker.namespace()))]
pub async fn ensure_headless_service(client: &Client, broker: &RelayBroker) -> Result<()> {
    let namespace = broker.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Service> = Api::namespaced(client.clone(), &namespace);
    let name = headless_service_name(&broker.name_any());

    let service = build_headless_service(broker);

    let patch = Patch::Apply(&service);
    api.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &patch)
        .await?;

    Ok(())
}

pub fn build_headless_service(broker: &RelayBroker) -> Service {
    let name = headless_service_name(&broker.name_any());

    let mut ports: Vec<ServicePort> = broker
        .spec
        .acceptors
        .iter()
        .map(|a| ServicePort {
            name: Some(a.name.clone()),
            port: a.port,
            ..Default::default()
        })
        .collect();
    ports.push(ServicePort {
        name: Some(CONSOLE_PORT_NAME.to_string()),
        port: CONSOLE_PORT,
        ..Default::default()
    });

    Service {
        metadata: base_meta(broker, "Service", &name),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            publish_not_ready_addresses: Some(true),
            selector: Some(selector_labels(&broker.name_any())),
            ports: Some(ports),
            ..Default::default()
        }),
        status: None,
    }
}

/// Ensure the client-facing Service for exposed acceptors and the console
#[instrument(skip(client, broker), fields(name = %broker.name_any(), namespace = broker.namespace()))]
pub async fn ensure_client_service(client: &Client, broker: &RelayBroker) -> Result<()> {
    let namespace = broker.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Service> = Api::namespaced(client.clone(), &namespace);
    let name = broker.name_any();

    let service = build_client_service(broker);

    let patch = Patch::Apply(&service);
    api.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &patch)
        .await?;

    Ok(())
}

pub fn build_client_service(broker: &RelayBroker) -> Service {
    let name = broker.name_any();

    let mut ports: Vec<ServicePort> = broker
        .spec
        .acceptors
        .iter()
        .filter(|a| a.expose)
        .map(|a| ServicePort {
            name: Some(a.name.clone()),
            port: a.port,
            ..Default::default()
        })
        .collect();

    // No explicit exposure: keep every acceptor reachable inside the cluster
    if ports.is_empty() {
        ports = broker
            .spec
            .acceptors
            .iter()
            .map(|a| ServicePort {
                name: Some(a.name.clone()),
                port: a.port,
                ..Default::default()
            })
            .collect();
    }

    if broker.spec.console.as_ref().map(|c| c.expose).unwrap_or(false) {
        ports.push(ServicePort {
            name: Some(CONSOLE_PORT_NAME.to_string()),
            port: CONSOLE_PORT,
            ..Default::default()
        });
    }

    Service {
        metadata: base_meta(broker, "Service", &name),
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(&broker.name_any())),
            ports: Some(ports),
            ..Default::default()
        }),
        status: None,
    }
}

#[instrument(skip(client, broker), fields(name = %broker.name_any(), namespace = broker.namespace()))]
pub async fn delete_services(client: &Client, broker: &RelayBroker) -> Result<()> {
    let namespace = broker.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Service> = Api::namespaced(client.clone(), &namespace);

    for name in [
        broker.name_any(),
        headless_service_name(&broker.name_any()),
    ] {
        match api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => info!("Deleted Service {}", name),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                warn!("Service {} not found, already deleted", name);
            }
            Err(e) => return Err(Error::KubeError(e)),
        }
    }

    Ok(())
}

// ============================================================================
// StatefulSet
// ============================================================================

/// Ensure the fleet StatefulSet matches the deployment plan
#[instrument(skip(client, broker), fields(name = %broker.name_any(), namespace = broker.namespace()))]
pub async fn ensure_statefulset(client: &Client, broker: &RelayBroker) -> Result<()> {
    let namespace = broker.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<StatefulSet> = Api::namespaced(client.clone(), &namespace);
    let name = broker.name_any();

    let statefulset = build_statefulset(broker);

    let patch = Patch::Apply(&statefulset);
    api.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &patch)
        .await?;

    Ok(())
}

pub fn build_statefulset(broker: &RelayBroker) -> StatefulSet {
    let name = broker.name_any();
    let fleet_selector = selector_labels(&name);

    let mut pod_labels = standard_labels(broker);
    let mut pod_meta = ObjectMeta {
        labels: Some(pod_labels.clone()),
        ..Default::default()
    };
    apply_templates(broker, "Pod", &name, &mut pod_meta);
    pod_labels = pod_meta.labels.clone().unwrap_or(pod_labels);

    let (volumes, mounts) = build_volumes(broker);

    let container = Container {
        name: "broker".to_string(),
        image: Some(broker.spec.image()),
        ports: Some(container_ports(broker)),
        env: Some(vec![EnvVar {
            name: "BROKER_PROPERTIES".to_string(),
            value: Some(format!("{PROPERTIES_MOUNT_PATH}/{PROPERTIES_KEY}")),
            ..Default::default()
        }]),
        volume_mounts: Some(mounts),
        ..Default::default()
    };

    StatefulSet {
        metadata: base_meta(broker, "StatefulSet", &name),
        spec: Some(StatefulSetSpec {
            replicas: Some(broker.spec.deployment_plan.size),
            selector: LabelSelector {
                match_labels: Some(fleet_selector),
                ..Default::default()
            },
            service_name: headless_service_name(&name),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    annotations: pod_meta.annotations,
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(volumes),
                    ..Default::default()
                }),
            },
            volume_claim_templates: journal_claim(broker),
            ..Default::default()
        }),
        status: None,
    }
}

fn container_ports(broker: &RelayBroker) -> Vec<ContainerPort> {
    let mut ports: Vec<ContainerPort> = broker
        .spec
        .acceptors
        .iter()
        .map(|a| ContainerPort {
            name: Some(a.name.clone()),
            container_port: a.port,
            ..Default::default()
        })
        .collect();
    ports.push(ContainerPort {
        name: Some(CONSOLE_PORT_NAME.to_string()),
        container_port: CONSOLE_PORT,
        ..Default::default()
    });
    ports
}

fn build_volumes(broker: &RelayBroker) -> (Vec<Volume>, Vec<VolumeMount>) {
    let mut volumes = vec![Volume {
        name: "broker-props".to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(resource_name(broker, "props")),
            ..Default::default()
        }),
        ..Default::default()
    }];
    let mut mounts = vec![VolumeMount {
        name: "broker-props".to_string(),
        mount_path: PROPERTIES_MOUNT_PATH.to_string(),
        read_only: Some(true),
        ..Default::default()
    }];

    // TLS secrets are referenced by name only; one mount per distinct secret
    let mut seen: Vec<&str> = Vec::new();
    let acceptor_secrets = broker.spec.acceptors.iter().filter_map(|a| a.ssl_secret.as_deref());
    let connector_secrets = broker.spec.connectors.iter().filter_map(|c| c.ssl_secret.as_deref());
    let console_secret = broker.spec.console.iter().filter_map(|c| c.ssl_secret.as_deref());

    for secret in acceptor_secrets.chain(connector_secrets).chain(console_secret) {
        if seen.contains(&secret) {
            continue;
        }
        seen.push(secret);

        let volume_name = format!("tls-{secret}");
        volumes.push(Volume {
            name: volume_name.clone(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name: volume_name,
            mount_path: format!("{TLS_MOUNT_ROOT}/{secret}"),
            read_only: Some(true),
            ..Default::default()
        });
    }

    if broker.spec.deployment_plan.persistence_enabled {
        mounts.push(VolumeMount {
            name: "journal".to_string(),
            mount_path: JOURNAL_MOUNT_PATH.to_string(),
            ..Default::default()
        });
    }

    (volumes, mounts)
}

fn journal_claim(broker: &RelayBroker) -> Option<Vec<PersistentVolumeClaim>> {
    if !broker.spec.deployment_plan.persistence_enabled {
        return None;
    }

    let storage = broker.spec.deployment_plan.storage.as_ref();
    let size = storage.map(|s| s.size.clone()).unwrap_or_else(|| "2Gi".to_string());
    let storage_class = storage.and_then(|s| s.storage_class.clone());

    let mut requests = BTreeMap::new();
    requests.insert("storage".to_string(), Quantity(size));

    Some(vec![PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some("journal".to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: storage_class,
            resources: Some(VolumeResourceRequirements {
                requests: Some(requests),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: None,
    }])
}

#[instrument(skip(client, broker), fields(name = %broker.name_any(), namespace = broker.namespace()))]
pub async fn delete_statefulset(client: &Client, broker: &RelayBroker) -> Result<()> {
    let namespace = broker.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<StatefulSet> = Api::namespaced(client.clone(), &namespace);
    let name = broker.name_any();

    match api.delete(&name, &DeleteParams::default()).await {
        Ok(_) => info!("Deleted StatefulSet {}", name),
        Err(kube::Error::Api(e)) if e.code == 404 => {
            warn!("StatefulSet {} not found, already deleted", name);
        }
        Err(e) => return Err(Error::KubeError(e)),
    }

    Ok(())
}

// ============================================================================
// Companion scale-down request
// ============================================================================

/// Ensure the scale-down request that drain-protects this fleet.
///
/// Created only when the deployment plan enables message migration. The
/// request carries the fleet selector labels and is namespace-local.
#[instrument(skip(client, broker), fields(name = %broker.name_any(), namespace = broker.namespace()))]
pub async fn ensure_scale_down(client: &Client, broker: &RelayBroker) -> Result<()> {
    let namespace = broker.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<RelayBrokerScaleDown> = Api::namespaced(client.clone(), &namespace);
    let name = resource_name(broker, "drain");

    let scale_down = build_scale_down(broker);

    let patch = Patch::Apply(&scale_down);
    api.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &patch)
        .await?;

    info!("Scale-down request {} ensured", name);
    Ok(())
}

pub fn build_scale_down(broker: &RelayBroker) -> RelayBrokerScaleDown {
    let name = resource_name(broker, "drain");

    RelayBrokerScaleDown {
        metadata: base_meta(broker, "RelayBrokerScaleDown", &name),
        spec: RelayBrokerScaleDownSpec {
            namespace: None,
            local_only: true,
            labels: selector_labels(&broker.name_any()),
        },
    }
}

#[instrument(skip(client, broker), fields(name = %broker.name_any(), namespace = broker.namespace()))]
pub async fn delete_scale_down(client: &Client, broker: &RelayBroker) -> Result<()> {
    let namespace = broker.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<RelayBrokerScaleDown> = Api::namespaced(client.clone(), &namespace);
    let name = resource_name(broker, "drain");

    match api.delete(&name, &DeleteParams::default()).await {
        Ok(_) => info!("Deleted scale-down request {}", name),
        Err(kube::Error::Api(e)) if e.code == 404 => {
            warn!("Scale-down request {} not found, already deleted", name);
        }
        Err(e) => return Err(Error::KubeError(e)),
    }

    Ok(())
}
