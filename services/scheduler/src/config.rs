//! Configuration for the scheduler.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tierd_reconcile::{DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_NODE_TIMEOUT, DEFAULT_RECONCILE_INTERVAL};

use crate::kind::TaskKind;

/// Sizing and placement of one tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierSpec {
    /// Desired number of instances.
    pub count: u32,

    /// CPU shares per instance.
    pub cpu: f64,

    /// Memory in MB per instance.
    pub mem: f64,

    /// Disk in MB per instance.
    pub disk: f64,

    /// Required offer hostname (lowercase), if constrained.
    #[serde(default)]
    pub hostname_constraint: Option<String>,
}

impl TierSpec {
    /// Returns true if an offer from `hostname` may host this tier.
    pub fn allows_host(&self, hostname: &str) -> bool {
        match &self.hostname_constraint {
            Some(required) => required.eq_ignore_ascii_case(hostname),
            None => true,
        }
    }
}

/// Storage engine run by the datastore tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DatastoreBackend {
    #[default]
    Mysql,

    /// MySQL with TLS between the servers and the datastore.
    MysqlTls,

    Etcd,
}

impl DatastoreBackend {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Some(Self::Mysql),
            "mysql-ssl" | "mysql-tls" => Some(Self::MysqlTls),
            "etcd" => Some(Self::Etcd),
            _ => None,
        }
    }

    pub fn default_image(&self) -> &'static str {
        match self {
            Self::Mysql | Self::MysqlTls => "docker.io/mariadb:10.8.3",
            Self::Etcd => "quay.io/coreos/etcd:v3.5.1",
        }
    }

    pub fn default_port(&self) -> u32 {
        match self {
            Self::Mysql | Self::MysqlTls => 3306,
            Self::Etcd => 2379,
        }
    }
}

/// Inputs of the per-tier task templates.
#[derive(Debug, Clone)]
pub struct TemplateConfig {
    /// DNS domain appended to container hostnames.
    pub domain: String,

    /// Image for server and agent containers.
    pub image_k3s: String,

    /// Storage engine of the datastore tier.
    pub datastore_backend: DatastoreBackend,

    /// Image for the datastore container.
    pub image_datastore: String,

    /// Container port of the datastore.
    pub datastore_port: u32,

    /// Root password handed to the datastore.
    pub datastore_password: String,

    /// Join token shared by server and agents.
    pub k3s_token: String,

    /// Extra arguments for the server process.
    pub server_args: String,

    /// Extra arguments for the agent processes.
    pub agent_args: String,

    /// Fixed host port for the server API, 0 to allocate one.
    pub server_port: u32,

    /// URL of the bootstrap script fetched into server and agent sandboxes.
    pub bootstrap_url: String,

    /// Docker volume driver.
    pub volume_driver: String,

    /// Docker volume for the datastore data directory.
    pub volume_datastore: String,

    /// Docker volume for the server state directory.
    pub volume_server: String,

    /// Time zone passed to containers.
    pub time_zone: String,
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Framework name, also the store key prefix.
    pub framework_name: String,

    /// Cluster-manager role.
    pub framework_role: String,

    /// User tasks run as.
    pub framework_user: String,

    /// Hostname announced in the framework info.
    pub framework_hostname: String,

    /// Principal for authentication.
    pub principal: Option<String>,

    /// Link shown in the cluster manager UI.
    pub webui_url: Option<String>,

    /// Master address (`host:port`).
    pub master: String,

    /// Talk to the master over https.
    pub master_ssl: bool,

    /// Basic-auth user.
    pub username: Option<String>,

    /// Basic-auth password.
    pub password: Option<String>,

    /// Accept invalid TLS certificates from the master.
    pub skip_ssl_verify: bool,

    /// First port of the dynamic host-port range.
    pub port_range_from: u32,

    /// End of the dynamic host-port range (exclusive).
    pub port_range_to: u32,

    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,

    /// CheckState interval in seconds.
    pub check_state_interval_secs: u64,

    /// Explicit/implicit reconciliation interval in seconds.
    pub reconcile_interval_secs: u64,

    /// Seconds a task may stay unready before it is killed or purged.
    pub node_timeout_secs: u64,

    /// Refuse window for declined offers in seconds.
    pub refuse_offer_secs: f64,

    /// Failover timeout announced in the framework info, in seconds.
    pub failover_timeout_secs: f64,

    /// Task store location (`redis://...` or `memory://`).
    pub store_url: String,

    /// Datastore tier.
    pub datastore: TierSpec,

    /// Server tier.
    pub server: TierSpec,

    /// Agent tier.
    pub agent: TierSpec,

    /// Task template inputs.
    pub template: TemplateConfig,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let framework_name = env_or("TIERD_FRAMEWORK_NAME", "tierd");
        let heartbeat_interval_secs = env_parse(
            "TIERD_HEARTBEAT_INTERVAL_SECS",
            DEFAULT_HEARTBEAT_INTERVAL.as_secs(),
        );
        let port_range_from = env_parse("TIERD_PORT_RANGE_FROM", 31000);
        let port_range_to = env_parse("TIERD_PORT_RANGE_TO", 32000);

        if port_range_from >= port_range_to {
            anyhow::bail!(
                "invalid port range: {} must be below {}",
                port_range_from,
                port_range_to
            );
        }

        let datastore_backend = match env_opt("TIERD_DS_BACKEND") {
            Some(raw) => DatastoreBackend::parse(&raw)
                .ok_or_else(|| anyhow::anyhow!("unknown datastore backend: {}", raw))?,
            None => DatastoreBackend::default(),
        };

        let template = TemplateConfig {
            domain: env_or("TIERD_DOMAIN", ".local"),
            image_k3s: env_or("TIERD_IMAGE_K3S", "avhost/ubuntu-m3s:22.04-3"),
            datastore_backend,
            image_datastore: env_or("TIERD_IMAGE_DATASTORE", datastore_backend.default_image()),
            datastore_port: env_parse("TIERD_DS_PORT", datastore_backend.default_port()),
            datastore_password: env_or("TIERD_DS_PASSWORD", "password"),
            k3s_token: env_or("TIERD_K3S_TOKEN", "123456789"),
            server_args: env_or("TIERD_SERVER_ARGS", "/usr/local/bin/k3s server"),
            agent_args: env_or("TIERD_AGENT_ARGS", "/usr/local/bin/k3s agent"),
            server_port: env_parse("TIERD_SERVER_PORT", 0),
            bootstrap_url: env_or(
                "TIERD_BOOTSTRAP_URL",
                "https://raw.githubusercontent.com/AVENTER-UG/mesos-m3s/master/bootstrap/bootstrap.sh",
            ),
            volume_driver: env_or("TIERD_VOLUME_DRIVER", "local"),
            volume_datastore: env_or("TIERD_VOLUME_DS", format!("{}_datastore", framework_name)),
            volume_server: env_or("TIERD_VOLUME_SERVER", format!("{}_server", framework_name)),
            time_zone: env_or("TZ", "UTC"),
        };

        Ok(Self {
            framework_role: env_or("TIERD_FRAMEWORK_ROLE", "tierd"),
            framework_user: env_or("TIERD_FRAMEWORK_USER", "root"),
            framework_hostname: env_or("TIERD_FRAMEWORK_HOSTNAME", "localhost"),
            principal: env_opt("TIERD_PRINCIPAL"),
            webui_url: env_opt("TIERD_WEBUI_URL"),
            master: env_or("TIERD_MESOS_MASTER", "127.0.0.1:5050"),
            master_ssl: env_parse("TIERD_MESOS_SSL", false),
            username: env_opt("TIERD_MESOS_USERNAME"),
            password: env_opt("TIERD_MESOS_PASSWORD"),
            skip_ssl_verify: env_parse("TIERD_SKIP_SSL_VERIFY", false),
            port_range_from,
            port_range_to,
            heartbeat_interval_secs,
            check_state_interval_secs: env_parse(
                "TIERD_CHECK_STATE_INTERVAL_SECS",
                heartbeat_interval_secs,
            ),
            reconcile_interval_secs: env_parse(
                "TIERD_RECONCILE_INTERVAL_SECS",
                DEFAULT_RECONCILE_INTERVAL.as_secs(),
            ),
            node_timeout_secs: env_parse("TIERD_NODE_TIMEOUT_SECS", DEFAULT_NODE_TIMEOUT.as_secs()),
            refuse_offer_secs: env_parse("TIERD_REFUSE_OFFER_SECS", 60.0),
            failover_timeout_secs: env_parse("TIERD_FAILOVER_TIMEOUT_SECS", 5000.0),
            store_url: env_or("TIERD_STORE_URL", "memory://"),
            datastore: tier_from_env("DS", 1, 0.1, 1000.0, 10000.0),
            server: tier_from_env("SERVER", 1, 1.0, 2000.0, 1000.0),
            agent: tier_from_env("AGENT", 1, 2.0, 2000.0, 10000.0),
            template,
            log_level: env_or("TIERD_LOG_LEVEL", "info"),
            framework_name,
        })
    }

    /// Tier spec for `kind` as configured at startup.
    pub fn tier(&self, kind: TaskKind) -> &TierSpec {
        match kind {
            TaskKind::Datastore => &self.datastore,
            TaskKind::Server => &self.server,
            TaskKind::Agent => &self.agent,
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_secs(self.node_timeout_secs)
    }
}

/// Parse a `hostname:<name>` constraint. Other attributes are ignored.
pub fn parse_constraint(raw: &str) -> Option<String> {
    let (attribute, value) = raw.split_once(':')?;
    if !attribute.trim().eq_ignore_ascii_case("hostname") {
        return None;
    }
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    Some(value.to_lowercase())
}

fn tier_from_env(prefix: &str, count: u32, cpu: f64, mem: f64, disk: f64) -> TierSpec {
    TierSpec {
        count: env_parse(&format!("TIERD_{}_COUNT", prefix), count),
        cpu: env_parse(&format!("TIERD_{}_CPU", prefix), cpu),
        mem: env_parse(&format!("TIERD_{}_MEM", prefix), mem),
        disk: env_parse(&format!("TIERD_{}_DISK", prefix), disk),
        hostname_constraint: std::env::var(format!("TIERD_{}_CONSTRAINT", prefix))
            .ok()
            .and_then(|raw| parse_constraint(&raw)),
    }
}

fn env_or(name: &str, default: impl Into<String>) -> String {
    std::env::var(name).unwrap_or_else(|_| default.into())
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}
