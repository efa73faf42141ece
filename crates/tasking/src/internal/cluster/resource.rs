use k8s_openapi::api::core::v1::Container;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

pub const GROUP: &str = "tackle.konveyor.io";
pub const VERSION: &str = "v1alpha1";

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    pub reason: String,
    pub message: String,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceStatus {
    pub observed_generation: i64,
    pub conditions: Vec<ResourceCondition>,
}

impl ResourceStatus {
    fn condition(&self, type_: &str) -> Option<&ResourceCondition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}

fn name_of(metadata: &ObjectMeta) -> &str {
    metadata.name.as_deref().unwrap_or_default()
}

fn reconciled(metadata: &ObjectMeta, status: &ResourceStatus) -> bool {
    metadata.generation.unwrap_or_default() == status.observed_generation
}

/// Root object of the installation; owns every task pod.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Tackle {
    pub metadata: ObjectMeta,
}

impl Tackle {
    pub const KIND: &'static str = "Tackle";

    pub fn name(&self) -> &str {
        name_of(&self.metadata)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AddonSpec {
    /// Task kind reference; literal or regex.
    pub task: String,
    pub selector: String,
    pub container: Container,
    pub init_containers: Vec<Container>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Addon {
    pub metadata: ObjectMeta,
    pub spec: AddonSpec,
    pub status: ResourceStatus,
}

impl Addon {
    pub const KIND: &'static str = "Addon";

    pub fn name(&self) -> &str {
        name_of(&self.metadata)
    }

    pub fn reconciled(&self) -> bool {
        reconciled(&self.metadata, &self.status)
    }

    pub fn ready(&self) -> bool {
        self.status
            .condition("Ready")
            .is_some_and(|c| c.status == "True")
    }

    /// Why the addon is not ready.
    pub fn not_ready_reason(&self) -> String {
        match self.status.condition("Ready") {
            Some(c) if !c.message.is_empty() => c.message.clone(),
            Some(c) => c.reason.clone(),
            None => "condition (Ready) not found".to_string(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtensionSpec {
    /// Addon reference; literal or regex.
    pub addon: String,
    pub selector: String,
    pub container: Container,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Extension {
    pub metadata: ObjectMeta,
    pub spec: ExtensionSpec,
    pub status: ResourceStatus,
}

impl Extension {
    pub const KIND: &'static str = "Extension";

    pub fn name(&self) -> &str {
        name_of(&self.metadata)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskKindSpec {
    pub priority: i32,
    pub dependencies: Vec<String>,
    pub data: serde_json::Value,
}

/// Declarative task type (the `Task` custom resource).
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskKind {
    pub metadata: ObjectMeta,
    pub spec: TaskKindSpec,
    pub status: ResourceStatus,
}

impl TaskKind {
    pub const KIND: &'static str = "Task";

    pub fn name(&self) -> &str {
        name_of(&self.metadata)
    }

    pub fn has_dependency(&self, kind: &str) -> bool {
        self.spec.dependencies.iter().any(|d| d == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addon_conditions() {
        let addon: Addon = serde_yaml::from_str(
            r#"
metadata:
  name: analyzer
  generation: 2
spec:
  task: analyzer
  container:
    name: addon
    image: quay.io/konveyor/tackle2-addon-analyzer
status:
  observedGeneration: 2
  conditions:
    - type: Ready
      status: "True"
"#,
        )
        .unwrap();
        assert_eq!(addon.name(), "analyzer");
        assert!(addon.reconciled());
        assert!(addon.ready());
        assert_eq!(addon.spec.container.name, "addon");
    }

    #[test]
    fn test_addon_not_reconciled() {
        let addon = Addon {
            metadata: ObjectMeta {
                generation: Some(3),
                ..Default::default()
            },
            status: ResourceStatus {
                observed_generation: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(!addon.reconciled());
        assert!(!addon.ready());
        assert_eq!(addon.not_ready_reason(), "condition (Ready) not found");
    }

    #[test]
    fn test_kind_dependencies() {
        let kind: TaskKind = serde_yaml::from_str(
            r#"
metadata:
  name: analyzer
spec:
  priority: 10
  dependencies: [language-discovery]
  data:
    mode: source
"#,
        )
        .unwrap();
        assert!(kind.has_dependency("language-discovery"));
        assert!(!kind.has_dependency("tech-discovery"));
        assert_eq!(kind.spec.priority, 10);
    }
}
