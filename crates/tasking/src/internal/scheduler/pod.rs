use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, EnvVarSource, PersistentVolumeClaimVolumeSource,
    Pod, PodSpec, Secret, SecretKeySelector, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

use crate::internal::cluster::{
    APP_LABEL, Addon, Extension, GROUP, ROLE_LABEL, TASK_LABEL, Tackle, VERSION,
};
use crate::internal::configuration::TaskingConfiguration;
use crate::internal::model::task::Task;

pub const ADDON_VOLUME: &str = "addon";
pub const SHARED_VOLUME: &str = "shared";
pub const CACHE_VOLUME: &str = "cache";

/// Name of the addon container; always the first container.
pub const ADDON_CONTAINER: &str = "addon";

pub const ENV_ADDON_HOME: &str = "ADDON_HOME";
pub const ENV_SHARED_PATH: &str = "SHARED_PATH";
pub const ENV_CACHE_PATH: &str = "CACHE_PATH";
pub const ENV_HUB_BASE_URL: &str = "HUB_BASE_URL";
pub const ENV_TASK: &str = "TASK";
pub const ENV_TOKEN: &str = "TOKEN";

/// Extension variable as seen by the addon container: `_EXT_<EXTENSION>_<VAR>`.
pub fn ext_env(extension: &str, var: &str) -> String {
    format!("_EXT_{}_{var}", extension.to_uppercase())
}

fn generate_name(task: &Task) -> String {
    format!("task-{}-", task.id)
}

fn labels(task: &Task) -> BTreeMap<String, String> {
    BTreeMap::from([
        (TASK_LABEL.to_string(), task.id.to_string()),
        (APP_LABEL.to_string(), "tackle".to_string()),
        (ROLE_LABEL.to_string(), "task".to_string()),
    ])
}

/// Secret holding the task token.
pub fn build_secret(task: &Task, namespace: &str, token: String) -> Secret {
    Secret {
        metadata: ObjectMeta {
            namespace: Some(namespace.to_string()),
            generate_name: Some(generate_name(task)),
            labels: Some(labels(task)),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            ENV_TOKEN.to_string(),
            ByteString(token.into_bytes()),
        )])),
        ..Default::default()
    }
}

/// Makes the pod an owner of the secret so it is collected with the pod.
pub fn add_secret_owner(secret: &mut Secret, pod: &Pod) {
    secret
        .metadata
        .owner_references
        .get_or_insert_with(Vec::new)
        .push(OwnerReference {
            api_version: "v1".to_string(),
            kind: "Pod".to_string(),
            name: pod.metadata.name.clone().unwrap_or_default(),
            uid: pod.metadata.uid.clone().unwrap_or_default(),
            ..Default::default()
        });
}

/// Pod running the addon with its extensions as sidecars.
pub fn build_pod(
    task: &Task,
    addon: &Addon,
    extensions: &[&Extension],
    owner: &Tackle,
    secret: &Secret,
    namespace: &str,
    config: &TaskingConfiguration,
) -> Pod {
    let (init_containers, containers) = containers(task, addon, extensions, secret, config);
    let cache = if config.cache.rwx {
        Volume {
            name: CACHE_VOLUME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: config.cache.pvc.clone(),
                ..Default::default()
            }),
            ..Default::default()
        }
    } else {
        empty_dir(CACHE_VOLUME)
    };
    Pod {
        metadata: ObjectMeta {
            namespace: Some(namespace.to_string()),
            generate_name: Some(generate_name(task)),
            labels: Some(labels(task)),
            owner_references: Some(vec![OwnerReference {
                api_version: format!("{GROUP}/{VERSION}"),
                kind: Tackle::KIND.to_string(),
                name: owner.name().to_string(),
                uid: owner.metadata.uid.clone().unwrap_or_default(),
                ..Default::default()
            }]),
            ..Default::default()
        },
        spec: Some(PodSpec {
            service_account_name: Some(config.service_account.clone()),
            restart_policy: Some("Never".to_string()),
            init_containers: (!init_containers.is_empty()).then_some(init_containers),
            containers,
            volumes: Some(vec![empty_dir(ADDON_VOLUME), empty_dir(SHARED_VOLUME), cache]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn empty_dir(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}

/// Init containers come from the addon untouched.
fn containers(
    task: &Task,
    addon: &Addon,
    extensions: &[&Extension],
    secret: &Secret,
    config: &TaskingConfiguration,
) -> (Vec<Container>, Vec<Container>) {
    let init = addon.spec.init_containers.clone();
    let mut plain = Vec::with_capacity(extensions.len() + 1);
    plain.push(Container {
        name: ADDON_CONTAINER.to_string(),
        ..addon.spec.container.clone()
    });
    for extension in extensions {
        plain.push(Container {
            name: extension.name().to_string(),
            ..extension.spec.container.clone()
        });
    }

    let propagated: Vec<EnvVar> = plain[1..]
        .iter()
        .flat_map(|container| {
            container
                .env
                .iter()
                .flatten()
                .map(|var| EnvVar {
                    name: ext_env(&container.name, &var.name),
                    value: var.value.clone(),
                    ..Default::default()
                })
        })
        .collect();
    plain[0]
        .env
        .get_or_insert_with(Vec::new)
        .extend(propagated);

    let token = EnvVarSource {
        secret_key_ref: Some(SecretKeySelector {
            key: ENV_TOKEN.to_string(),
            name: secret.metadata.name.clone().unwrap_or_default(),
            ..Default::default()
        }),
        ..Default::default()
    };
    let addon_config = &config.addon;
    for container in &mut plain {
        container.security_context = Some(SecurityContext {
            run_as_user: Some(config.uid),
            ..Default::default()
        });
        container.volume_mounts.get_or_insert_with(Vec::new).extend([
            mount(ADDON_VOLUME, &addon_config.home_dir),
            mount(SHARED_VOLUME, &addon_config.shared_dir),
            mount(CACHE_VOLUME, &addon_config.cache_dir),
        ]);
        container.env.get_or_insert_with(Vec::new).extend([
            env(ENV_ADDON_HOME, addon_config.home_dir.as_str()),
            env(ENV_SHARED_PATH, addon_config.shared_dir.as_str()),
            env(ENV_CACHE_PATH, addon_config.cache_dir.as_str()),
            env(ENV_HUB_BASE_URL, addon_config.hub_url.as_str()),
            env(ENV_TASK, task.id.to_string()),
            EnvVar {
                name: ENV_TOKEN.to_string(),
                value_from: Some(token.clone()),
                ..Default::default()
            },
        ]);
    }
    (init, plain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::cluster::{AddonSpec, ExtensionSpec};

    fn addon() -> Addon {
        Addon {
            metadata: ObjectMeta {
                name: Some("analyzer".into()),
                ..Default::default()
            },
            spec: AddonSpec {
                task: "analyzer".into(),
                container: Container {
                    name: "main".into(),
                    image: Some("quay.io/konveyor/analyzer".into()),
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn extension(name: &str, vars: &[(&str, &str)]) -> Extension {
        Extension {
            metadata: ObjectMeta {
                name: Some(name.into()),
                ..Default::default()
            },
            spec: ExtensionSpec {
                addon: "analyzer".into(),
                container: Container {
                    name: "ignored".into(),
                    env: Some(vars.iter().map(|(n, v)| env(n, *v)).collect()),
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn env_names(container: &Container) -> Vec<&str> {
        container
            .env
            .iter()
            .flatten()
            .map(|e| e.name.as_str())
            .collect()
    }

    #[test]
    fn test_ext_env() {
        assert_eq!(ext_env("java", "PORT"), "_EXT_JAVA_PORT");
    }

    #[test]
    fn test_build_pod() {
        let task = Task {
            id: 7.into(),
            ..Default::default()
        };
        let config = TaskingConfiguration::default();
        let mut secret = build_secret(&task, "konveyor-tackle", "token".into());
        secret.metadata.name = Some("task-7-abcde".into());
        let owner = Tackle {
            metadata: ObjectMeta {
                name: Some("tackle".into()),
                uid: Some("uid-1".into()),
                ..Default::default()
            },
        };
        let java = extension("java", &[("PORT", "8000")]);
        let dotnet = extension("dotnet", &[]);
        let pod = build_pod(
            &task,
            &addon(),
            &[&java, &dotnet],
            &owner,
            &secret,
            "konveyor-tackle",
            &config,
        );

        assert_eq!(pod.metadata.generate_name.as_deref(), Some("task-7-"));
        let labels = pod.metadata.labels.as_ref().unwrap();
        assert_eq!(labels[TASK_LABEL], "7");
        assert_eq!(labels[APP_LABEL], "tackle");
        assert_eq!(labels[ROLE_LABEL], "task");
        assert_eq!(pod.metadata.owner_references.as_ref().unwrap()[0].uid, "uid-1");

        let spec = pod.spec.unwrap();
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        assert_eq!(spec.service_account_name.as_deref(), Some("tackle-hub"));
        let names: Vec<&str> = spec.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["addon", "java", "dotnet"]);
        let volumes = spec.volumes.unwrap();
        assert!(volumes[2].empty_dir.is_some());

        let addon = &spec.containers[0];
        assert!(env_names(addon).contains(&"_EXT_JAVA_PORT"));
        for container in &spec.containers {
            let names = env_names(container);
            for name in [ENV_ADDON_HOME, ENV_SHARED_PATH, ENV_CACHE_PATH, ENV_HUB_BASE_URL, ENV_TASK, ENV_TOKEN] {
                assert!(names.contains(&name), "{name} missing in {}", container.name);
            }
            assert_eq!(container.volume_mounts.as_ref().unwrap().len(), 3);
            assert_eq!(
                container.security_context.as_ref().unwrap().run_as_user,
                Some(1001)
            );
            let token = container.env.iter().flatten().find(|e| e.name == ENV_TOKEN).unwrap();
            let selector = token.value_from.as_ref().unwrap().secret_key_ref.as_ref().unwrap();
            assert_eq!(selector.name, "task-7-abcde");
        }
        assert!(!env_names(&spec.containers[1]).contains(&"_EXT_JAVA_PORT"));
    }

    #[test]
    fn test_cache_pvc_when_rwx() {
        let task = Task::default();
        let mut config = TaskingConfiguration::default();
        config.cache.rwx = true;
        let secret = build_secret(&task, "ns", String::new());
        let pod = build_pod(&task, &addon(), &[], &Tackle::default(), &secret, "ns", &config);
        let volumes = pod.spec.unwrap().volumes.unwrap();
        let cache = volumes.iter().find(|v| v.name == CACHE_VOLUME).unwrap();
        assert_eq!(
            cache.persistent_volume_claim.as_ref().unwrap().claim_name,
            "cache"
        );
    }
}
