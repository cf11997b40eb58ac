//! The smoke scenario: create an application, a network load balancer and a
//! server group, then tear all three down again.
//!
//! Each step posts one task to the gateway and verifies its effect on
//! Compute Engine through the configured observer.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use verdict_agent::gate::{create_app_operation, delete_app_operation, make_payload};
use verdict_core::{
    Bindings, Contract, ContractBuilder, Operation, OperationContract, Predicate,
    ResourceObserver, Result, RunStamp, StepOverrides, TestCase, TestStep,
};

pub const SUITE_NAME: &str = "smoke";
pub const DEFAULT_EMAIL: &str = "test-spinnaker@google.com";

/// Fill in the scenario's defaults underneath whatever the caller supplied.
pub fn with_defaults(bindings: Bindings, stamp: &RunStamp) -> Bindings {
    bindings
        .with_default("TEST_STACK", "smoke")
        .with_default("TEST_COMPONENT_DETAIL", "fe")
        .with_default("TEST_APP_NAME", format!("smoketestapp{}", stamp.as_str()))
        .with_default("TEST_EMAIL", DEFAULT_EMAIL)
}

pub struct SmokeScenario {
    bindings: Bindings,
    observer: Arc<dyn ResourceObserver>,
}

impl SmokeScenario {
    /// Derives `TEST_APP_COMPONENT_NAME` as `{app}-{stack}-{detail}`.
    pub fn new(bindings: Bindings, observer: Arc<dyn ResourceObserver>) -> Result<Self> {
        let component = format!(
            "{}-{}-{}",
            bindings.get("TEST_APP_NAME")?,
            bindings.get("TEST_STACK")?,
            bindings.get("TEST_COMPONENT_DETAIL")?
        );
        Ok(Self {
            bindings: bindings.with("TEST_APP_COMPONENT_NAME", component),
            observer,
        })
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    fn app(&self) -> Result<&str> {
        self.bindings.get("TEST_APP_NAME")
    }

    fn load_balancer(&self) -> Result<&str> {
        self.bindings.get("TEST_APP_COMPONENT_NAME")
    }

    fn group_name(&self) -> Result<String> {
        Ok(format!("{}-{}-v000", self.app()?, self.bindings.get("TEST_STACK")?))
    }

    fn post(&self, title: &str, job: Value, description: String) -> Result<Operation> {
        let app = self.app()?;
        Ok(Operation::new(
            title,
            format!("applications/{app}/tasks"),
            make_payload(vec![job], &description, app),
        ))
    }

    fn contract(&self) -> ContractBuilder {
        ContractBuilder::new(Arc::clone(&self.observer))
    }

    // ----- Steps -----

    pub fn create_app(&self) -> Result<OperationContract> {
        let operation = create_app_operation(&self.bindings, self.app()?)?;
        Ok(OperationContract::new(operation, Contract::empty()))
    }

    pub fn delete_app(&self) -> Result<OperationContract> {
        let operation = delete_app_operation(&self.bindings, self.app()?)?;
        Ok(OperationContract::new(operation, Contract::empty()))
    }

    pub fn create_network_load_balancer(&self) -> Result<OperationContract> {
        let b = &self.bindings;
        let lb = self.load_balancer()?;
        let region = b.get("GCE_REGION")?;
        let target_pool = format!("{region}/targetPools/{lb}-tp");

        let health = json!({
            "checkIntervalSec": 9,
            "healthyThreshold": 3,
            "unhealthyThreshold": 5,
            "timeoutSec": 2,
            "port": 80,
        });
        let job = json!({
            "provider": "gce",
            "stack": b.get("TEST_STACK")?,
            "detail": b.get("TEST_COMPONENT_DETAIL")?,
            "credentials": b.get("GCE_CREDENTIALS")?,
            "region": region,
            "healthCheckPort": health["port"],
            "healthTimeout": health["timeoutSec"],
            "healthInterval": health["checkIntervalSec"],
            "healthyThreshold": health["healthyThreshold"],
            "unhealthyThreshold": health["unhealthyThreshold"],
            "listeners": [{ "protocol": "TCP", "portRange": health["port"], "healthCheck": true }],
            "name": lb,
            "providerType": "gce",
            "healthCheck": format!("HTTP:{}/", health["port"]),
            "type": "upsertAmazonLoadBalancer",
            "availabilityZones": { region: [] },
            "user": "[anonymous]",
        });
        let operation = self.post(
            "create_network_load_balancer",
            job,
            format!("Create Load Balancer: {lb}"),
        )?;

        let health_check = vec![
            Predicate::field_contains("name", format!("{lb}-hc"))?,
            Predicate::subset(health.as_object().cloned().unwrap_or_default()),
        ];
        let forwarding_rule = vec![
            Predicate::field_contains("name", lb)?,
            Predicate::field_contains("target", target_pool)?,
        ];
        let contract = self
            .contract()
            .clause("Health Check Added", |c| {
                c.retryable_for_secs(30)
                    .list_resources("http-health-checks")
                    .contains_group(health_check)
            })
            .clause("Target Pool Added", |c| {
                c.list_resources("target-pools").contains("name", format!("{lb}-tp"))
            })
            .clause("Forwarding Rules Added", |c| {
                c.retryable_for_secs(30)
                    .list_resources("forwarding-rules")
                    .contains_group(forwarding_rule)
            })
            .build()?;
        Ok(OperationContract::new(operation, contract))
    }

    pub fn delete_network_load_balancer(&self) -> Result<OperationContract> {
        let b = &self.bindings;
        let lb = self.load_balancer()?;
        let region = b.get("GCE_REGION")?;
        let credentials = b.get("GCE_CREDENTIALS")?;
        let job = json!({
            "type": "deleteLoadBalancer",
            "loadBalancerName": lb,
            "regions": [region],
            "credentials": credentials,
            "providerType": "gce",
            "user": "[anonymous]",
        });
        let operation = self.post(
            "delete_network_load_balancer",
            job,
            format!("Delete Load Balancer: {lb} in {credentials}:{region}"),
        )?;

        let contract = self
            .contract()
            .clause("Health Check Removed", |c| {
                c.retryable_for_secs(30)
                    .list_resources("http-health-checks")
                    .excludes("name", format!("{lb}-hc"))
            })
            .clause("Target Pool Removed", |c| {
                c.list_resources("target-pools").excludes("name", format!("{lb}-tp"))
            })
            .clause("Forwarding Rule Removed", |c| {
                c.list_resources("forwarding-rules").excludes("name", lb)
            })
            .build()?;
        Ok(OperationContract::new(operation, contract))
    }

    pub fn create_server_group(&self) -> Result<OperationContract> {
        let b = &self.bindings;
        let group = self.group_name()?;
        let lb = self.load_balancer()?;
        let job = json!({
            "application": self.app()?,
            "strategy": "",
            "capacity": { "desired": 2 },
            "providerType": "gce",
            "image": "ubuntu-1404-trusty-v20150316",
            "zone": b.get("GCE_ZONE")?,
            "stack": b.get("TEST_STACK")?,
            "instanceType": "f1-micro",
            "type": "linearDeploy",
            "loadBalancers": [lb],
            "instanceMetadata": {
                "startup-script": "sudo apt-get update && sudo apt-get install apache2 -y",
                "load-balancer-names": lb,
            },
            "account": b.get("GCE_CREDENTIALS")?,
            "user": "[anonymous]",
        });
        let operation = self.post(
            "create_server_group",
            job,
            format!("Create Server Group in {group}"),
        )?;

        let contract = self
            .contract()
            .clause("Managed Instance Group Added", |c| {
                c.retryable_for_secs(30)
                    .inspect_resource("managed-instance-groups", group.as_str())
                    .contains_eq("targetSize", 2)
            })
            .build()?;
        Ok(OperationContract::new(operation, contract))
    }

    pub fn delete_server_group(&self) -> Result<OperationContract> {
        let b = &self.bindings;
        let group = self.group_name()?;
        let job = json!({
            "asgName": group,
            "type": "destroyAsg",
            "regions": [b.get("GCE_REGION")?],
            "zones": [b.get("GCE_ZONE")?],
            "credentials": b.get("GCE_CREDENTIALS")?,
            "providerType": "gce",
            "user": "[anonymous]",
        });
        let operation = self.post(
            "delete_server_group",
            job,
            format!("DestroyServerGroup: {group}"),
        )?;

        let contract = self
            .contract()
            .clause("Managed Instance Group Removed", |c| {
                c.inspect_resource("managed-instance-groups", group.as_str())
                    .no_resource_ok(true)
                    .contains_eq("targetSize", 0)
            })
            .clause("Instances Are Removed", |c| {
                c.retryable_for_secs(30)
                    .list_resources("instances")
                    .excludes_containing("name", group.as_str())
            })
            .build()?;
        Ok(OperationContract::new(operation, contract))
    }

    /// The full suite, teardown steps carrying their re-verification budgets.
    pub fn test_case(&self) -> Result<TestCase> {
        let retries = |n: u32| StepOverrides {
            verify_retries: Some(n),
            ..StepOverrides::default()
        };
        Ok(TestCase::new(SUITE_NAME)
            .step(TestStep::new("a_create_app", self.create_app()?))
            .step(TestStep::new(
                "b_create_network_load_balancer",
                self.create_network_load_balancer()?,
            ))
            .step(
                TestStep::new("c_create_server_group", self.create_server_group()?)
                    .with_overrides(StepOverrides {
                        timeout_ok: true,
                        ..StepOverrides::default()
                    }),
            )
            .step(
                TestStep::new("x_delete_server_group", self.delete_server_group()?)
                    .with_overrides(retries(5)),
            )
            .step(
                TestStep::new(
                    "y_delete_network_load_balancer",
                    self.delete_network_load_balancer()?,
                )
                .with_overrides(retries(5)),
            )
            .step(
                TestStep::new("z_delete_app", self.delete_app()?).with_overrides(StepOverrides {
                    verify_interval: Some(Duration::from_secs(8)),
                    ..retries(8)
                }),
            ))
    }
}
