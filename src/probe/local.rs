//! Probe bindings against the local machine

use std::io::ErrorKind;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sysinfo::{Disks, Pid, ProcessesToUpdate, System};
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::{debug, trace};

use super::{Probe, ProbeError, ProbeResult, ProcessMetrics, ResourceMetrics, SystemMetrics};
use crate::model::{Status, SystemResource, TargetIdentity, WatchTarget};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

// ============================================================================
// Processes and system resources
// ============================================================================

/// Process and system probe backed by a persistent `sysinfo` snapshot
///
/// The snapshot is kept between calls so CPU usage is measured over the time
/// since the previous probe.
#[derive(Debug, Clone)]
pub struct SysinfoProbe {
    system: Arc<Mutex<System>>,
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
        }
    }

    async fn with_system<T, F>(&self, f: F) -> Result<T, ProbeError>
    where
        T: Send + 'static,
        F: FnOnce(&mut System) -> Result<T, ProbeError> + Send + 'static,
    {
        let system = self.system.clone();
        tokio::task::spawn_blocking(move || {
            let mut system = system
                .lock()
                .map_err(|_| ProbeError::Other("system snapshot lock poisoned".to_string()))?;
            f(&mut system)
        })
        .await
        .map_err(|e| ProbeError::Other(e.to_string()))?
    }

    /// Current metrics of the given processes; vanished pids are skipped
    pub async fn process_metrics(&self, pids: Vec<u32>) -> Result<Vec<ProcessMetrics>, ProbeError> {
        self.with_system(move |system| {
            let to_update: Vec<Pid> = pids.iter().copied().map(Pid::from_u32).collect();
            system.refresh_memory();
            system.refresh_processes(ProcessesToUpdate::Some(&to_update), true);
            Ok(collect_process_metrics(system, &pids))
        })
        .await
    }

    async fn probe_process(
        &self,
        pid: Option<u32>,
        name: Option<String>,
    ) -> Result<ProbeResult, ProbeError> {
        self.with_system(move |system| {
            system.refresh_memory();
            system.refresh_processes(ProcessesToUpdate::All, true);

            let pids = match (pid, name.as_deref()) {
                (Some(pid), name) => system
                    .process(Pid::from_u32(pid))
                    .filter(|process| {
                        name.is_none_or(|name| {
                            process_name_matches(&process.name().to_string_lossy(), name)
                        })
                    })
                    .map(|_| vec![pid])
                    .unwrap_or_default(),
                (None, Some(name)) => {
                    let mut pids: Vec<u32> = system
                        .processes()
                        .iter()
                        .filter(|(_, process)| {
                            process_name_matches(&process.name().to_string_lossy(), name)
                        })
                        .map(|(pid, _)| pid.as_u32())
                        .collect();
                    pids.sort_unstable();
                    pids
                }
                (None, None) => {
                    return Err(ProbeError::Other(
                        "process target without pid or name".to_string(),
                    ));
                }
            };

            if pids.is_empty() {
                return Ok(ProbeResult::status(Status::Stopped));
            }

            let metrics = collect_process_metrics(system, &pids);
            Ok(ProbeResult {
                status: Status::Running,
                owning_pids: pids,
                metrics: Some(ResourceMetrics::Processes(metrics)),
            })
        })
        .await
    }

    async fn probe_system(
        &self,
        resource: SystemResource,
        drive: Option<String>,
    ) -> Result<ProbeResult, ProbeError> {
        self.with_system(move |system| {
            system.refresh_cpu_usage();
            system.refresh_memory();

            let total = system.total_memory();
            let used = system.used_memory();
            let ram_percent = if total == 0 {
                0.0
            } else {
                (used as f64 / total as f64 * 100.0) as f32
            };

            let disk_percent = match drive.as_deref() {
                Some(drive) => Some(disk_usage(drive).ok_or_else(|| {
                    ProbeError::NotFound(format!("drive {drive}"))
                })?),
                None if resource == SystemResource::Disk => {
                    return Err(ProbeError::NotFound("disk target without drive".to_string()));
                }
                None => None,
            };

            Ok(ProbeResult {
                status: Status::Running,
                owning_pids: Vec::new(),
                metrics: Some(ResourceMetrics::System(SystemMetrics {
                    cpu_percent: system.global_cpu_usage(),
                    ram_percent,
                    ram_used_mb: used as f64 / BYTES_PER_MB,
                    disk_percent,
                })),
            })
        })
        .await
    }
}

#[async_trait]
impl Probe for SysinfoProbe {
    async fn probe(&self, target: &WatchTarget) -> Result<ProbeResult, ProbeError> {
        match &target.identity {
            TargetIdentity::Process { pid, name } => self.probe_process(*pid, name.clone()).await,
            TargetIdentity::System { resource, drive } => {
                self.probe_system(*resource, drive.clone()).await
            }
            other => Err(ProbeError::Other(format!(
                "sysinfo probe cannot handle {other}"
            ))),
        }
    }
}

fn collect_process_metrics(system: &System, pids: &[u32]) -> Vec<ProcessMetrics> {
    let total_memory = system.total_memory();

    pids.iter()
        .filter_map(|pid| {
            let process = system.process(Pid::from_u32(*pid))?;
            let memory = process.memory();
            Some(ProcessMetrics {
                pid: *pid,
                cpu_percent: process.cpu_usage(),
                ram_mb: memory as f64 / BYTES_PER_MB,
                ram_percent: if total_memory == 0 {
                    0.0
                } else {
                    (memory as f64 / total_memory as f64 * 100.0) as f32
                },
            })
        })
        .collect()
}

/// Case-insensitive match that ignores a trailing `.exe`
fn process_name_matches(actual: &str, wanted: &str) -> bool {
    fn stem(name: &str) -> String {
        let lower = name.to_lowercase();
        lower.strip_suffix(".exe").map(str::to_string).unwrap_or(lower)
    }
    stem(actual) == stem(wanted)
}

fn disk_usage(drive: &str) -> Option<f32> {
    let wanted = drive.trim_end_matches(['\\', '/']).to_lowercase();
    let disks = Disks::new_with_refreshed_list();

    disks
        .list()
        .iter()
        .find(|disk| mount_matches(disk.mount_point(), &wanted))
        .map(|disk| {
            let total = disk.total_space();
            if total == 0 {
                return 0.0;
            }
            let used = total.saturating_sub(disk.available_space());
            (used as f64 / total as f64 * 100.0) as f32
        })
}

fn mount_matches(mount_point: &Path, wanted: &str) -> bool {
    let mount = mount_point.to_string_lossy().to_lowercase();
    let mount = mount.trim_end_matches(['\\', '/']);
    mount == wanted
}

// ============================================================================
// Ports
// ============================================================================

/// Port probe: a TCP connect to localhost decides liveness
#[derive(Debug, Clone)]
pub struct TcpPortProbe {
    sysinfo: Arc<SysinfoProbe>,
    connect_timeout: Duration,
}

impl TcpPortProbe {
    pub fn new(sysinfo: Arc<SysinfoProbe>) -> Self {
        Self {
            sysinfo,
            connect_timeout: Duration::from_secs(1),
        }
    }

    async fn listening_pids(&self, port: u16) -> Vec<u32> {
        if !cfg!(windows) {
            return Vec::new();
        }

        match Command::new("netstat")
            .args(["-ano", "-p", "TCP"])
            .kill_on_drop(true)
            .output()
            .await
        {
            Ok(output) => parse_netstat_listeners(&String::from_utf8_lossy(&output.stdout), port),
            Err(e) => {
                debug!("netstat unavailable: {e}");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl Probe for TcpPortProbe {
    async fn probe(&self, target: &WatchTarget) -> Result<ProbeResult, ProbeError> {
        let TargetIdentity::Port { port } = target.identity else {
            return Err(ProbeError::Other(format!(
                "port probe cannot handle {}",
                target.identity
            )));
        };

        let connect = TcpStream::connect(("127.0.0.1", port));
        let status = match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(_)) => Status::Running,
            Ok(Err(e)) if e.kind() == ErrorKind::PermissionDenied => {
                return Err(ProbeError::PermissionDenied(e.to_string()));
            }
            Ok(Err(e)) => {
                trace!("port {port} not accepting connections: {e}");
                Status::Stopped
            }
            Err(_) => return Err(ProbeError::Timeout),
        };

        if status != Status::Running {
            return Ok(ProbeResult::status(status));
        }

        let owning_pids = self.listening_pids(port).await;
        let metrics = if owning_pids.is_empty() {
            None
        } else {
            Some(ResourceMetrics::Processes(
                self.sysinfo.process_metrics(owning_pids.clone()).await?,
            ))
        };

        Ok(ProbeResult {
            status,
            owning_pids,
            metrics,
        })
    }
}

/// Pids of processes listening on `port` in `netstat -ano` output
pub fn parse_netstat_listeners(output: &str, port: u16) -> Vec<u32> {
    let suffix = format!(":{port}");
    let mut pids: Vec<u32> = output
        .lines()
        .filter_map(|line| {
            let columns: Vec<&str> = line.split_whitespace().collect();
            match columns.as_slice() {
                [proto, local, _remote, state, pid]
                    if proto.eq_ignore_ascii_case("tcp")
                        && local.ends_with(&suffix)
                        && state.eq_ignore_ascii_case("listening") =>
                {
                    pid.parse().ok()
                }
                _ => None,
            }
        })
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

// ============================================================================
// Services
// ============================================================================

/// Service probe through the platform service manager CLI
///
/// `sc queryex` on Windows, `systemctl show` elsewhere.
#[derive(Debug, Clone)]
pub struct ServiceManagerProbe {
    sysinfo: Arc<SysinfoProbe>,
}

/// Parsed service manager answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceState {
    pub status: Status,
    pub pid: Option<u32>,
}

impl ServiceManagerProbe {
    pub fn new(sysinfo: Arc<SysinfoProbe>) -> Self {
        Self { sysinfo }
    }

    async fn query(&self, service_name: &str) -> Result<ServiceState, ProbeError> {
        let mut command = if cfg!(windows) {
            let mut command = Command::new("sc");
            command.args(["queryex", service_name]);
            command
        } else {
            let mut command = Command::new("systemctl");
            command.args([
                "show",
                service_name,
                "--property=LoadState,ActiveState,MainPID",
            ]);
            command
        };

        let output = command
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::PermissionDenied => ProbeError::PermissionDenied(e.to_string()),
                _ => ProbeError::Other(e.to_string()),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if cfg!(windows) {
            parse_sc_query(&stdout, service_name)
        } else {
            parse_systemctl_show(&stdout, service_name)
        }
    }
}

#[async_trait]
impl Probe for ServiceManagerProbe {
    async fn probe(&self, target: &WatchTarget) -> Result<ProbeResult, ProbeError> {
        let TargetIdentity::Service { service_name } = &target.identity else {
            return Err(ProbeError::Other(format!(
                "service probe cannot handle {}",
                target.identity
            )));
        };

        let state = self.query(service_name).await?;
        let owning_pids: Vec<u32> = state.pid.into_iter().collect();
        let metrics = match state.status {
            Status::Running if !owning_pids.is_empty() => Some(ResourceMetrics::Processes(
                self.sysinfo.process_metrics(owning_pids.clone()).await?,
            )),
            _ => None,
        };

        Ok(ProbeResult {
            status: state.status,
            owning_pids,
            metrics,
        })
    }
}

/// Parse `sc queryex <name>` output
pub fn parse_sc_query(output: &str, service_name: &str) -> Result<ServiceState, ProbeError> {
    if output.contains("1060") {
        return Err(ProbeError::NotFound(format!("service {service_name}")));
    }
    if output.contains("Access is denied") || output.contains("FAILED 5") {
        return Err(ProbeError::PermissionDenied(format!("service {service_name}")));
    }

    let value_of = |key: &str| {
        output.lines().find_map(|line| {
            let (name, value) = line.split_once(':')?;
            (name.trim() == key).then(|| value.trim().to_string())
        })
    };

    let state = value_of("STATE").ok_or_else(|| {
        ProbeError::Other(format!("unexpected sc output for {service_name}"))
    })?;
    let status = if state.contains("RUNNING") {
        Status::Running
    } else {
        Status::Stopped
    };
    let pid = value_of("PID")
        .and_then(|pid| pid.parse::<u32>().ok())
        .filter(|pid| *pid != 0);

    Ok(ServiceState { status, pid })
}

/// Parse `systemctl show --property=LoadState,ActiveState,MainPID` output
pub fn parse_systemctl_show(output: &str, service_name: &str) -> Result<ServiceState, ProbeError> {
    let value_of = |key: &str| {
        output.lines().find_map(|line| {
            let (name, value) = line.split_once('=')?;
            (name.trim() == key).then(|| value.trim().to_string())
        })
    };

    if value_of("LoadState").as_deref() == Some("not-found") {
        return Err(ProbeError::NotFound(format!("service {service_name}")));
    }

    let state = value_of("ActiveState").ok_or_else(|| {
        ProbeError::Other(format!("unexpected systemctl output for {service_name}"))
    })?;
    let status = if state == "active" {
        Status::Running
    } else {
        Status::Stopped
    };
    let pid = value_of("MainPID")
        .and_then(|pid| pid.parse::<u32>().ok())
        .filter(|pid| *pid != 0);

    Ok(ServiceState { status, pid })
}
