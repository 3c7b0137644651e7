//! Unit tests for Kubernetes resource builders.
//!
//! Run with: `cargo test -p relaymq-k8s resources_test`

#[cfg(test)]
mod tests {
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    use crate::controller::resources::{
        build_client_service, build_headless_service, build_properties_secret, build_scale_down,
        build_statefulset, rendered_properties, CONSOLE_PORT,
    };
    use crate::controller::selectors::selector_labels;
    use crate::crd::RelayBroker;

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn broker(spec: serde_json::Value) -> RelayBroker {
        let mut broker = RelayBroker::new("fleet-a", serde_json::from_value(spec).unwrap());
        broker.metadata.namespace = Some("messaging".to_string());
        broker.metadata.uid = Some("0000-1111".to_string());
        broker
    }

    // -----------------------------------------------------------------------
    // StatefulSet
    // -----------------------------------------------------------------------

    #[test]
    fn test_statefulset_replicas_follow_plan_size() {
        let broker = broker(serde_json::json!({ "deploymentPlan": { "size": 3 } }));
        let sts = build_statefulset(&broker);

        assert_eq!(sts.spec.as_ref().unwrap().replicas, Some(3));
    }

    #[test]
    fn test_statefulset_governed_by_headless_service() {
        let broker = broker(serde_json::json!({}));
        let sts = build_statefulset(&broker);

        assert_eq!(sts.spec.as_ref().unwrap().service_name, "fleet-a-headless");
    }

    #[test]
    fn test_statefulset_selector_uses_fleet_labels_only() {
        let broker = broker(serde_json::json!({}));
        let sts = build_statefulset(&broker);
        let spec = sts.spec.as_ref().unwrap();

        assert_eq!(
            spec.selector.match_labels.as_ref().unwrap(),
            &selector_labels("fleet-a"),
            "selector must stay restricted to the immutable fleet labels"
        );

        let pod_labels = spec
            .template
            .metadata
            .as_ref()
            .unwrap()
            .labels
            .as_ref()
            .unwrap();
        for (k, v) in selector_labels("fleet-a") {
            assert_eq!(pod_labels.get(&k), Some(&v));
        }
        assert!(pod_labels.contains_key("app.kubernetes.io/managed-by"));
    }

    #[test]
    fn test_image_defaults_to_version_tag() {
        let broker = broker(serde_json::json!({ "version": "2.1.0" }));
        let sts = build_statefulset(&broker);

        let image = sts.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
            .image
            .clone();
        assert_eq!(image, Some("relaymq/broker:2.1.0".to_string()));
    }

    #[test]
    fn test_image_override_wins_over_version() {
        let broker = broker(serde_json::json!({
            "deploymentPlan": { "image": "registry.local/broker:nightly" },
            "version": "2.1.0"
        }));
        let sts = build_statefulset(&broker);

        let image = sts.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
            .image
            .clone();
        assert_eq!(image, Some("registry.local/broker:nightly".to_string()));
    }

    #[test]
    fn test_container_ports_cover_acceptors_and_console() {
        let broker = broker(serde_json::json!({
            "acceptors": [
                { "name": "core", "port": 61616 },
                { "name": "amqp", "port": 5672 }
            ]
        }));
        let sts = build_statefulset(&broker);

        let ports = sts.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
            .ports
            .clone()
            .unwrap();
        let numbers: Vec<i32> = ports.iter().map(|p| p.container_port).collect();
        assert_eq!(numbers, vec![61616, 5672, CONSOLE_PORT]);
    }

    #[test]
    fn test_tls_secret_mounted_once_per_distinct_secret() {
        let broker = broker(serde_json::json!({
            "acceptors": [
                { "name": "core", "port": 61616, "sslSecret": "fleet-tls" },
                { "name": "amqps", "port": 5671, "sslSecret": "fleet-tls" }
            ],
            "console": { "expose": true, "sslSecret": "fleet-tls" }
        }));
        let sts = build_statefulset(&broker);

        let volumes = sts
            .spec
            .as_ref()
            .unwrap()
            .template
            .spec
            .as_ref()
            .unwrap()
            .volumes
            .clone()
            .unwrap();
        let tls_volumes: Vec<_> = volumes.iter().filter(|v| v.name == "tls-fleet-tls").collect();
        assert_eq!(tls_volumes.len(), 1, "shared secret must be mounted once");
        assert_eq!(volumes.len(), 2, "expected props volume plus one tls volume");
    }

    #[test]
    fn test_journal_claim_only_when_persistent() {
        let persistent = broker(serde_json::json!({
            "deploymentPlan": {
                "persistenceEnabled": true,
                "storage": { "size": "10Gi", "storageClass": "fast" }
            }
        }));
        let sts = build_statefulset(&persistent);
        let claims = sts
            .spec
            .as_ref()
            .unwrap()
            .volume_claim_templates
            .clone()
            .unwrap();
        assert_eq!(claims.len(), 1);
        let claim_spec = claims[0].spec.as_ref().unwrap();
        assert_eq!(claim_spec.storage_class_name, Some("fast".to_string()));
        let requests = claim_spec
            .resources
            .as_ref()
            .unwrap()
            .requests
            .as_ref()
            .unwrap();
        assert_eq!(requests.get("storage"), Some(&Quantity("10Gi".to_string())));

        let ephemeral = broker(serde_json::json!({}));
        let sts = build_statefulset(&ephemeral);
        assert!(sts.spec.as_ref().unwrap().volume_claim_templates.is_none());
    }

    // -----------------------------------------------------------------------
    // Properties Secret
    // -----------------------------------------------------------------------

    #[test]
    fn test_properties_secret_merges_flat_and_nested_config() {
        let broker = broker(serde_json::json!({
            "brokerProperties": ["maxDiskUsage=85"],
            "brokerConfig": { "criticalAnalyzer": { "enabled": true } }
        }));

        let rendered = rendered_properties(&broker).unwrap();
        assert_eq!(rendered, "maxDiskUsage=85\ncriticalAnalyzer.enabled=true\n");

        let secret = build_properties_secret(&broker).unwrap();
        assert_eq!(secret.metadata.name, Some("fleet-a-props".to_string()));
        let data = secret.string_data.unwrap();
        assert_eq!(data.get("broker.properties"), Some(&rendered));
    }

    // -----------------------------------------------------------------------
    // Services
    // -----------------------------------------------------------------------

    #[test]
    fn test_headless_service_publishes_not_ready_addresses() {
        let broker = broker(serde_json::json!({
            "acceptors": [{ "name": "core", "port": 61616 }]
        }));
        let svc = build_headless_service(&broker);
        let spec = svc.spec.as_ref().unwrap();

        assert_eq!(svc.metadata.name, Some("fleet-a-headless".to_string()));
        assert_eq!(spec.cluster_ip, Some("None".to_string()));
        assert_eq!(spec.publish_not_ready_addresses, Some(true));
        assert_eq!(spec.ports.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_client_service_exposes_only_marked_acceptors() {
        let broker = broker(serde_json::json!({
            "acceptors": [
                { "name": "core", "port": 61616, "expose": true },
                { "name": "internal", "port": 61617 }
            ],
            "console": { "expose": true }
        }));
        let svc = build_client_service(&broker);
        let ports = svc.spec.as_ref().unwrap().ports.clone().unwrap();

        let names: Vec<_> = ports.iter().filter_map(|p| p.name.clone()).collect();
        assert_eq!(names, vec!["core".to_string(), "console".to_string()]);
    }

    #[test]
    fn test_client_service_defaults_to_all_acceptors() {
        let broker = broker(serde_json::json!({
            "acceptors": [
                { "name": "core", "port": 61616 },
                { "name": "amqp", "port": 5672 }
            ]
        }));
        let svc = build_client_service(&broker);
        let ports = svc.spec.as_ref().unwrap().ports.clone().unwrap();

        assert_eq!(ports.len(), 2, "unexposed fleets keep cluster-internal access");
    }

    // -----------------------------------------------------------------------
    // Resource template overlays
    // -----------------------------------------------------------------------

    #[test]
    fn test_template_overlay_scoped_by_kind() {
        let broker = broker(serde_json::json!({
            "resourceTemplates": [{
                "selector": { "kind": "StatefulSet" },
                "annotations": { "team": "mq" }
            }]
        }));

        let sts = build_statefulset(&broker);
        let annotations = sts.metadata.annotations.unwrap();
        assert_eq!(annotations.get("team"), Some(&"mq".to_string()));

        let secret = build_properties_secret(&broker).unwrap();
        assert!(secret.metadata.annotations.is_none());
    }

    #[test]
    fn test_unselective_template_applies_everywhere() {
        let broker = broker(serde_json::json!({
            "resourceTemplates": [{ "labels": { "env": "prod" } }]
        }));

        let sts = build_statefulset(&broker);
        let svc = build_headless_service(&broker);

        assert_eq!(
            sts.metadata.labels.unwrap().get("env"),
            Some(&"prod".to_string())
        );
        assert_eq!(
            svc.metadata.labels.unwrap().get("env"),
            Some(&"prod".to_string())
        );
    }

    // -----------------------------------------------------------------------
    // Companion scale-down request
    // -----------------------------------------------------------------------

    #[test]
    fn test_scale_down_carries_fleet_selector() {
        let broker = broker(serde_json::json!({
            "deploymentPlan": { "size": 2, "messageMigration": true }
        }));
        let scale_down = build_scale_down(&broker);

        assert_eq!(scale_down.metadata.name, Some("fleet-a-drain".to_string()));
        assert!(scale_down.spec.local_only);
        assert_eq!(scale_down.spec.labels, selector_labels("fleet-a"));

        let owners = scale_down.metadata.owner_references.unwrap();
        assert_eq!(owners[0].kind, "RelayBroker");
        assert_eq!(owners[0].name, "fleet-a");
    }
}
