//! Launch templates for the three tiers.
//!
//! A template fixes everything about a task except where it runs: image,
//! command, environment, volumes and the port mappings that still need host
//! ports. Placement fills in the agent once an offer is accepted, and
//! [`build_task_info`] turns the finished record into the launch payload.

use tierd_id::TaskId;
use tierd_mesos::{
    CommandInfo, CommandUri, ContainerInfo, ContainerType, DiscoveryInfo, DockerInfo,
    DockerNetwork, Environment, Label, Labels, Offer, Parameter, Port, PortMapping, Ports,
    Resource, TaskInfo, Variable, Volume, CPUS, MEM, PORTS,
};

use crate::config::{Config, DatastoreBackend, TierSpec};
use crate::kind::TaskKind;
use crate::nodes::TASK_ID_LABEL;
use crate::task::{LaunchSpec, TaskPhase, TaskRecord};

/// Container port of the server's API.
pub const SERVER_API_PORT: u32 = 6443;

/// Container port of the server's bootstrap HTTP endpoint.
pub const SERVER_BOOTSTRAP_PORT: u32 = 8080;

/// Sandbox path of the fetched bootstrap script.
const BOOTSTRAP_PATH: &str = "/mnt/mesos/sandbox/bootstrap";

const MYSQL_DATA_DIR: &str = "/var/lib/mysql";
const ETCD_DATA_DIR: &str = "/default.etcd";

/// A fresh, unscheduled record for one instance of `kind`.
///
/// A new task ID is generated unless one is supplied.
pub fn new_record(config: &Config, tier: &TierSpec, kind: TaskKind, task_id: Option<TaskId>) -> TaskRecord {
    let framework = &config.framework_name;
    let task_id =
        task_id.unwrap_or_else(|| TaskId::generate(&format!("{}.{}", framework, kind)));
    let task_name = format!("{}:{}", framework, kind);

    let (launch, port_mappings, port_names) = match kind {
        TaskKind::Datastore => datastore(config, &task_id, &task_name),
        TaskKind::Server => server(config, &task_id, &task_name),
        TaskKind::Agent => agent(config, &task_id, &task_name),
    };

    let discovery_ports = port_mappings
        .iter()
        .zip(port_names)
        .map(|(mapping, name)| Port {
            number: mapping.host_port,
            name: Some(name.to_string()),
            protocol: mapping.protocol.clone(),
        })
        .collect();

    TaskRecord {
        task_id,
        kind,
        task_name,
        agent_id: None,
        hostname: String::new(),
        cpu: tier.cpu,
        mem: tier.mem,
        disk: tier.disk,
        port_mappings,
        discovery_ports,
        launch,
        state: TaskPhase::Unscheduled,
        state_time: None,
        desired_instances: tier.count,
        agent_info: None,
        network_infos: Vec::new(),
    }
}

/// Bind `record` to the agent behind `offer`.
pub fn apply_placement(record: &mut TaskRecord, offer: &Offer) {
    record.agent_id = Some(offer.agent_id.clone());
    record.hostname = offer.hostname.clone();

    if record.kind == TaskKind::Server {
        let san = format!("--tls-san={}", offer.hostname);
        if !record.launch.arguments.contains(&san) {
            record.launch.arguments.push(san);
        }
    }
}

/// Launch payload for a placed record. `None` until an agent is assigned.
pub fn build_task_info(record: &TaskRecord) -> Option<TaskInfo> {
    let agent_id = record.agent_id.clone()?;
    let launch = &record.launch;

    let mut resources = vec![
        Resource::scalar(CPUS, record.cpu),
        Resource::scalar(MEM, record.mem),
    ];
    let ports = record.required_ports();
    if !ports.is_empty() {
        resources.push(Resource::ranges(
            PORTS,
            ports.iter().map(|port| (u64::from(*port), u64::from(*port))),
        ));
    }

    let command = CommandInfo {
        shell: launch.shell,
        value: launch.command.clone(),
        arguments: launch.arguments.clone(),
        uris: launch.uris.clone(),
        environment: Some(Environment {
            variables: launch.environment.clone(),
        }),
    };

    let container = ContainerInfo {
        kind: ContainerType::Docker,
        docker: Some(DockerInfo {
            image: launch.image.clone(),
            network: Some(launch.network),
            port_mappings: record.port_mappings.clone(),
            privileged: launch.privileged,
            parameters: launch.parameters.clone(),
            force_pull_image: false,
        }),
        hostname: Some(launch.container_hostname.clone()),
        volumes: launch.volumes.clone(),
        network_infos: Vec::new(),
    };

    let discovery = DiscoveryInfo {
        visibility: "EXTERNAL".to_string(),
        name: Some(record.task_name.clone()),
        ports: Some(Ports {
            ports: record.discovery_ports.clone(),
        }),
    };

    Some(TaskInfo {
        name: record.task_name.clone(),
        task_id: record.task_id.clone(),
        agent_id,
        resources,
        command: Some(command),
        container: Some(container),
        discovery: Some(discovery),
        labels: (!launch.labels.is_empty()).then(|| Labels {
            labels: launch.labels.clone(),
        }),
    })
}

type Template = (LaunchSpec, Vec<PortMapping>, Vec<&'static str>);

fn datastore(config: &Config, task_id: &TaskId, task_name: &str) -> Template {
    let t = &config.template;
    let hostname = container_hostname(config, TaskKind::Datastore);

    let (shell, command, arguments, environment, data_dir) = match t.datastore_backend {
        DatastoreBackend::Mysql | DatastoreBackend::MysqlTls => {
            let arguments = if t.datastore_backend == DatastoreBackend::MysqlTls {
                vec![
                    format!("--ssl-ca={}/ca.pem", MYSQL_DATA_DIR),
                    format!("--ssl-cert={}/server-cert.pem", MYSQL_DATA_DIR),
                    format!("--ssl-key={}/server-key.pem", MYSQL_DATA_DIR),
                ]
            } else {
                Vec::new()
            };
            let environment = vec![
                var("SERVICE_NAME", task_name),
                var("MYSQL_ROOT_PASSWORD", &t.datastore_password),
                var("MYSQL_DATABASE", "k3s"),
                var("TZ", &t.time_zone),
                var("MESOS_TASK_ID", task_id.as_str()),
            ];
            (false, None, arguments, environment, MYSQL_DATA_DIR)
        }
        DatastoreBackend::Etcd => {
            let command = format!(
                "/usr/local/bin/etcd --listen-client-urls http://0.0.0.0:{} \
                 --election-timeout 50000 --heartbeat-interval 5000",
                t.datastore_port
            );
            let environment = vec![
                var("SERVICE_NAME", task_name),
                var("ALLOW_NONE_AUTHENTICATION", "yes"),
                var(
                    "ETCD_ADVERTISE_CLIENT_URLS",
                    &format!("http://{}:{}", hostname, t.datastore_port),
                ),
                var("MESOS_TASK_ID", task_id.as_str()),
                var("TZ", &t.time_zone),
            ];
            (true, Some(command), Vec::new(), environment, ETCD_DATA_DIR)
        }
    };

    let launch = LaunchSpec {
        image: t.image_datastore.clone(),
        shell,
        command,
        arguments,
        environment,
        volumes: vec![Volume::docker(
            data_dir,
            &t.volume_driver,
            t.volume_datastore.clone(),
        )],
        parameters: vec![param("cap-add", "NET_ADMIN")],
        privileged: false,
        network: DockerNetwork::Bridge,
        uris: Vec::new(),
        container_hostname: hostname,
        labels: task_labels(config, TaskKind::Datastore),
    };
    (
        launch,
        vec![PortMapping::tcp(0, t.datastore_port)],
        vec!["datastore"],
    )
}

fn server(config: &Config, task_id: &TaskId, task_name: &str) -> Template {
    let t = &config.template;
    let mut arguments = split_args(&t.server_args);
    arguments.push(format!("--tls-san={}server", config.framework_name));
    arguments.extend(node_label_args(task_id));

    let mut environment = k3s_environment(config, task_id, task_name, TaskKind::Server);
    environment.push(var("K3S_KUBECONFIG_MODE", "666"));

    let launch = LaunchSpec {
        image: t.image_k3s.clone(),
        shell: false,
        command: Some(BOOTSTRAP_PATH.to_string()),
        arguments,
        environment,
        volumes: vec![Volume::docker(
            "/var/lib/rancher/k3s",
            &t.volume_driver,
            t.volume_server.clone(),
        )],
        parameters: k3s_parameters(),
        privileged: true,
        network: DockerNetwork::Bridge,
        uris: vec![bootstrap_uri(config)],
        container_hostname: container_hostname(config, TaskKind::Server),
        labels: task_labels(config, TaskKind::Server),
    };
    (
        launch,
        vec![
            PortMapping::tcp(t.server_port, SERVER_API_PORT),
            PortMapping::tcp(0, SERVER_BOOTSTRAP_PORT),
        ],
        vec!["kubernetes", "http"],
    )
}

fn agent(config: &Config, task_id: &TaskId, task_name: &str) -> Template {
    let t = &config.template;
    let mut arguments = split_args(&t.agent_args);
    arguments.extend(node_label_args(task_id));

    let launch = LaunchSpec {
        image: t.image_k3s.clone(),
        shell: false,
        command: Some(BOOTSTRAP_PATH.to_string()),
        arguments,
        environment: k3s_environment(config, task_id, task_name, TaskKind::Agent),
        volumes: Vec::new(),
        parameters: k3s_parameters(),
        privileged: true,
        network: DockerNetwork::Bridge,
        uris: vec![bootstrap_uri(config)],
        container_hostname: container_hostname(config, TaskKind::Agent),
        labels: task_labels(config, TaskKind::Agent),
    };
    (
        launch,
        vec![PortMapping::tcp(0, 80), PortMapping::tcp(0, 443)],
        vec!["http", "https"],
    )
}

/// In-cluster URL agents and additional servers join through.
fn server_url(config: &Config) -> String {
    format!(
        "https://{}:{}",
        container_hostname(config, TaskKind::Server),
        SERVER_API_PORT
    )
}

fn container_hostname(config: &Config, kind: TaskKind) -> String {
    format!("{}{}{}", config.framework_name, kind, config.template.domain)
}

fn k3s_environment(config: &Config, task_id: &TaskId, task_name: &str, kind: TaskKind) -> Vec<Variable> {
    let t = &config.template;
    let mut environment = vec![
        var("SERVICE_NAME", task_name),
        var("K3SFRAMEWORK_TYPE", kind.as_str()),
        var("K3S_URL", &server_url(config)),
        var("K3S_TOKEN", &t.k3s_token),
    ];
    environment.extend(datastore_environment(config));
    environment.push(var("TZ", &t.time_zone));
    environment.push(var("MESOS_TASK_ID", task_id.as_str()));
    environment
}

/// How k3s reaches the datastore tier.
fn datastore_environment(config: &Config) -> Vec<Variable> {
    let t = &config.template;
    let host = container_hostname(config, TaskKind::Datastore);
    match t.datastore_backend {
        DatastoreBackend::Etcd => vec![var(
            "K3S_DATASTORE_ENDPOINT",
            &format!("http://{}:{}", host, t.datastore_port),
        )],
        DatastoreBackend::Mysql | DatastoreBackend::MysqlTls => {
            let mut environment = vec![var(
                "K3S_DATASTORE_ENDPOINT",
                &format!(
                    "mysql://root:{}@tcp({}:{})/k3s",
                    t.datastore_password, host, t.datastore_port
                ),
            )];
            if t.datastore_backend == DatastoreBackend::MysqlTls {
                environment.extend([
                    var("K3S_DATASTORE_CAFILE", "/var/lib/rancher/k3s/ca.pem"),
                    var("K3S_DATASTORE_CERTFILE", "/var/lib/rancher/k3s/client-cert.pem"),
                    var("K3S_DATASTORE_KEYFILE", "/var/lib/rancher/k3s/client-key.pem"),
                ]);
            }
            environment
        }
    }
}

fn k3s_parameters() -> Vec<Parameter> {
    vec![
        param("cap-add", "NET_ADMIN"),
        param("cap-add", "SYS_ADMIN"),
        param("ulimit", "nofile=1048576"),
    ]
}

fn bootstrap_uri(config: &Config) -> CommandUri {
    CommandUri {
        value: config.template.bootstrap_url.clone(),
        executable: true,
        extract: false,
        cache: false,
        output_file: Some("bootstrap".to_string()),
    }
}

fn node_label_args(task_id: &TaskId) -> [String; 2] {
    [
        "--node-label".to_string(),
        format!("{}={}", TASK_ID_LABEL, task_id),
    ]
}

fn task_labels(config: &Config, kind: TaskKind) -> Vec<Label> {
    vec![
        Label {
            key: "framework".to_string(),
            value: Some(config.framework_name.clone()),
        },
        Label {
            key: "tier".to_string(),
            value: Some(kind.to_string()),
        },
    ]
}

fn split_args(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

fn var(name: &str, value: &str) -> Variable {
    Variable {
        name: name.to_string(),
        value: value.to_string(),
    }
}

fn param(key: &str, value: &str) -> Parameter {
    Parameter {
        key: key.to_string(),
        value: value.to_string(),
    }
}
