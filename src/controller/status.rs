//! Fleet status derivation and write-back
//!
//! Translates observed StatefulSet state into Deployed/Ready conditions and
//! persists the status subresource with optimistic concurrency.

use k8s_openapi::api::apps::v1::StatefulSet;
use kube::api::{Api, PostParams};
use kube::{Client, ResourceExt};
use tracing::{debug, instrument, warn};

use crate::controller::conditions::{
    set_condition, CONDITION_STATUS_FALSE, CONDITION_STATUS_TRUE, CONDITION_TYPE_DEPLOYED,
    CONDITION_TYPE_READY,
};
use crate::crd::{RelayBroker, RelayBrokerStatus};
use crate::error::{Error, Result};

/// Attempts for a conflicted status write before giving up
const MAX_WRITE_ATTEMPTS: u32 = 3;

/// Fetch the fleet StatefulSet if it exists
pub async fn observed_statefulset(
    client: &Client,
    broker: &RelayBroker,
) -> Result<Option<StatefulSet>> {
    let namespace = broker.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<StatefulSet> = Api::namespaced(client.clone(), &namespace);

    match api.get(&broker.name_any()).await {
        Ok(sts) => Ok(Some(sts)),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
        Err(e) => Err(Error::KubeError(e)),
    }
}

/// Derive Deployed/Ready conditions and replica counts from the workload
pub fn apply_workload_conditions(
    status: &mut RelayBrokerStatus,
    broker: &RelayBroker,
    statefulset: Option<&StatefulSet>,
) {
    let size = broker.spec.deployment_plan.size;
    status.deployment_plan_size = size;
    status.observed_generation = broker.metadata.generation;

    let Some(sts) = statefulset else {
        status.ready_replicas = 0;
        set_condition(
            &mut status.conditions,
            CONDITION_TYPE_DEPLOYED,
            CONDITION_STATUS_FALSE,
            "StatefulSetMissing",
            "Fleet StatefulSet has not been created",
        );
        set_condition(
            &mut status.conditions,
            CONDITION_TYPE_READY,
            CONDITION_STATUS_FALSE,
            "ReplicasNotReady",
            &format!("0/{size} replicas ready"),
        );
        return;
    };

    let ready = sts
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    status.ready_replicas = ready;

    set_condition(
        &mut status.conditions,
        CONDITION_TYPE_DEPLOYED,
        CONDITION_STATUS_TRUE,
        "WorkloadDeployed",
        &format!("StatefulSet {} is deployed", sts.name_any()),
    );

    if ready == size {
        set_condition(
            &mut status.conditions,
            CONDITION_TYPE_READY,
            CONDITION_STATUS_TRUE,
            "AllReplicasReady",
            &format!("{ready}/{size} replicas ready"),
        );
    } else {
        set_condition(
            &mut status.conditions,
            CONDITION_TYPE_READY,
            CONDITION_STATUS_FALSE,
            "ReplicasNotReady",
            &format!("{ready}/{size} replicas ready"),
        );
    }
}

/// Persist the status subresource, re-fetching and retrying on conflict
#[instrument(skip(client, broker, status), fields(name = %broker.name_any(), namespace = broker.namespace()))]
pub async fn write_status(
    client: &Client,
    broker: &RelayBroker,
    status: RelayBrokerStatus,
) -> Result<RelayBroker> {
    let namespace = broker.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<RelayBroker> = Api::namespaced(client.clone(), &namespace);
    let name = broker.name_any();

    for attempt in 1..=MAX_WRITE_ATTEMPTS {
        let mut latest = api.get(&name).await?;
        latest.status = Some(status.clone());

        let body = serde_json::to_vec(&latest)?;
        match api
            .replace_status(&name, &PostParams::default(), body)
            .await
        {
            Ok(updated) => {
                debug!("Status written on attempt {}", attempt);
                return Ok(updated);
            }
            Err(kube::Error::Api(e)) if e.code == 409 && attempt < MAX_WRITE_ATTEMPTS => {
                warn!(
                    "Status write conflict for {} (attempt {}), retrying",
                    name, attempt
                );
            }
            Err(e) => return Err(Error::KubeError(e)),
        }
    }

    Err(Error::ConfigError(format!(
        "status write for {name} kept conflicting after {MAX_WRITE_ATTEMPTS} attempts"
    )))
}
