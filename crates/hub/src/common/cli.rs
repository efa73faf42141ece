use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};

use tasking::{
    AddonConfiguration, CacheConfiguration, PodRetention, ReaperConfiguration,
    TaskingConfiguration,
};

// Common CLI options
#[derive(Parser, Debug)]
pub struct CommonOpts {
    /// Enables more detailed log output
    #[arg(
        long,
        env = "HUB_DEBUG",
        global = true,
        help_heading("GLOBAL OPTIONS"),
        hide_short_help(true)
    )]
    pub debug: bool,
}

// Root CLI options
#[derive(Parser, Debug)]
#[command(
    author,
    about,
    version(crate::HUB_VERSION),
    disable_help_subcommand(true),
    help_expected(true)
)]
pub struct RootOptions {
    #[clap(flatten)]
    pub common: CommonOpts,

    #[clap(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Parser, Debug)]
pub enum SubCommand {
    /// Run the task manager, the capacity monitor and the reaper
    Serve(ServeOpts),
}

#[derive(Parser, Debug)]
pub struct ServeOpts {
    /// Namespace the hub runs in and creates task pods in
    #[arg(long, env = "NAMESPACE", default_value = "konveyor-tackle")]
    pub namespace: String,

    /// Directory holding buckets and files
    ///
    /// A temporary directory is used when not set.
    #[arg(long, env = "HUB_DATA_DIR", value_hint = clap::ValueHint::DirPath)]
    pub data_dir: Option<PathBuf>,

    #[clap(flatten)]
    pub task: TaskOpts,

    #[clap(flatten)]
    pub reaper: ReaperOpts,

    #[clap(flatten)]
    pub addon: AddonOpts,

    /// Key used to sign addon tokens
    #[arg(long, env = "AUTH_TOKEN_KEY", default_value = "tackle", hide_env_values = true)]
    pub token_key: String,
}

#[derive(Parser, Debug)]
pub struct TaskOpts {
    /// Enables task scheduling
    ///
    /// When disabled, every ready task fails.
    #[arg(
        long = "task-enabled",
        env = "TASK_ENABLED",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub enabled: bool,

    /// Runs tasks against a simulated cluster
    #[arg(long = "task-simulated", env = "TASK_SIMULATED")]
    pub simulated: bool,

    /// Service account of task pods
    #[arg(long = "task-sa", env = "TASK_SA", default_value = "tackle-hub")]
    pub service_account: String,

    /// User id task pods run as
    #[arg(long = "task-uid", env = "TASK_UID", default_value_t = 1001)]
    pub uid: i64,

    /// Restarts allowed after an addon container is OOM killed
    #[arg(long = "task-retries", env = "TASK_RETRIES", default_value_t = 1)]
    pub retries: u32,

    /// Interval of the task manager loop
    #[arg(
        id = "task-frequency",
        long = "task-frequency",
        env = "FREQUENCY_TASK",
        default_value = "1s",
        value_parser = humantime::parse_duration
    )]
    pub frequency: Duration,

    /// Seconds the pod of a succeeded task is kept
    #[arg(
        long = "task-pod-retain-succeeded",
        env = "TASK_POD_RETAIN_SUCCEEDED",
        default_value_t = 1
    )]
    pub pod_retain_succeeded: i64,

    /// Seconds the pod of a failed task is kept
    #[arg(
        long = "task-pod-retain-failed",
        env = "TASK_POD_RETAIN_FAILED",
        default_value_t = 4320
    )]
    pub pod_retain_failed: i64,

    /// Extra container waiting reasons that fail a pending task
    ///
    /// Matched as lower-case substrings, in addition to the built-in ones.
    #[arg(
        long = "task-waiting-terminal",
        env = "TASK_WAITING_TERMINAL",
        value_delimiter = ','
    )]
    pub waiting_terminal: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct ReaperOpts {
    /// Minutes before a created task is released
    #[arg(long = "reap-created", env = "TASK_REAP_CREATED", default_value_t = 4320)]
    pub created: i64,

    /// Minutes before a succeeded task is released
    #[arg(long = "reap-succeeded", env = "TASK_REAP_SUCCEEDED", default_value_t = 4320)]
    pub succeeded: i64,

    /// Minutes before a failed task is released
    #[arg(long = "reap-failed", env = "TASK_REAP_FAILED", default_value_t = 43200)]
    pub failed: i64,

    /// Minutes an orphaned bucket is kept
    #[arg(long = "bucket-ttl", env = "BUCKET_TTL", default_value_t = 1)]
    pub bucket_ttl: i64,

    /// Minutes an orphaned file is kept
    #[arg(long = "file-ttl", env = "FILE_TTL", default_value_t = 720)]
    pub file_ttl: i64,

    /// Interval of the reaper loop
    #[arg(
        id = "reaper-frequency",
        long = "reaper-frequency",
        env = "FREQUENCY_REAPER",
        default_value = "1m",
        value_parser = humantime::parse_duration
    )]
    pub frequency: Duration,
}

#[derive(Parser, Debug)]
pub struct AddonOpts {
    /// Home directory mounted into addon containers
    #[arg(long = "addon-home", env = "ADDON_HOME", default_value = "/addon")]
    pub home_dir: String,

    /// Directory shared between the containers of a task pod
    #[arg(long = "addon-shared", env = "SHARED_PATH", default_value = "/shared")]
    pub shared_dir: String,

    /// Cache directory mounted into task pods
    #[arg(long = "addon-cache", env = "CACHE_PATH", default_value = "/cache")]
    pub cache_dir: String,

    /// Hub URL handed to addons
    #[arg(long = "addon-hub-url", env = "ADDON_HUB_URL", default_value = "http://localhost:8080")]
    pub hub_url: String,

    /// The cluster supports ReadWriteMany volumes
    ///
    /// When set, the cache is the shared PVC named by `--cache-pvc`.
    #[arg(long = "rwx-supported", env = "RWX_SUPPORTED")]
    pub rwx: bool,

    /// Name of the cache PVC
    #[arg(long = "cache-pvc", env = "CACHE_PVC", default_value = "cache")]
    pub cache_pvc: String,
}

impl ServeOpts {
    pub fn tasking_configuration(&self) -> TaskingConfiguration {
        let task = &self.task;
        let reaper = &self.reaper;
        let addon = &self.addon;
        TaskingConfiguration {
            enabled: task.enabled,
            service_account: task.service_account.clone(),
            uid: task.uid,
            retries: task.retries,
            interval: task.frequency,
            pod_retention: PodRetention {
                succeeded: task.pod_retain_succeeded,
                failed: task.pod_retain_failed,
            },
            reaper: ReaperConfiguration {
                created: reaper.created,
                succeeded: reaper.succeeded,
                failed: reaper.failed,
                bucket_ttl: reaper.bucket_ttl,
                file_ttl: reaper.file_ttl,
                interval: reaper.frequency,
            },
            addon: AddonConfiguration {
                home_dir: addon.home_dir.clone(),
                shared_dir: addon.shared_dir.clone(),
                cache_dir: addon.cache_dir.clone(),
                hub_url: addon.hub_url.clone(),
            },
            cache: CacheConfiguration {
                rwx: addon.rwx,
                pvc: addon.cache_pvc.clone(),
            },
            ..TaskingConfiguration::default()
        }
        .with_waiting_terminal(&task.waiting_terminal)
    }
}
