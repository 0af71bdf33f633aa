//! Probe capability
//!
//! A probe answers one question about the live system: is this target up,
//! which processes own it, and what do they consume. The engine only talks to
//! the [`Probe`] trait; [`ProbeSet`] routes each target kind to its own
//! implementation so platform bindings can be swapped per kind.
//!
//! The default bindings in [`local`] use a TCP connect for ports, `sysinfo`
//! for processes and system resources and the platform service manager for
//! services.

use std::sync::Arc;

use async_trait::async_trait;

use crate::model::{Status, TargetKind, WatchTarget};

pub mod local;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProbeError {
    #[error("target not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("probe timed out")]
    Timeout,

    #[error("probe failed: {0}")]
    Other(String),
}

/// Resource usage of one owning process
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessMetrics {
    pub pid: u32,
    pub cpu_percent: f32,
    pub ram_mb: f64,
    /// Share of total physical memory
    pub ram_percent: f32,
}

/// Machine-wide resource usage
#[derive(Debug, Clone, PartialEq)]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub ram_percent: f32,
    pub ram_used_mb: f64,
    pub disk_percent: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResourceMetrics {
    Processes(Vec<ProcessMetrics>),
    System(SystemMetrics),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub status: Status,
    pub owning_pids: Vec<u32>,
    pub metrics: Option<ResourceMetrics>,
}

impl ProbeResult {
    pub fn status(status: Status) -> Self {
        Self {
            status,
            owning_pids: Vec::new(),
            metrics: None,
        }
    }
}

#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, target: &WatchTarget) -> Result<ProbeResult, ProbeError>;
}

pub type SharedProbe = Arc<dyn Probe>;

/// One probe per target kind
#[derive(Clone)]
pub struct ProbeSet {
    pub port: SharedProbe,
    pub process: SharedProbe,
    pub service: SharedProbe,
    pub system: SharedProbe,
}

impl ProbeSet {
    /// Bindings against the local machine
    pub fn local() -> Self {
        let sysinfo = Arc::new(local::SysinfoProbe::new());
        Self {
            port: Arc::new(local::TcpPortProbe::new(sysinfo.clone())),
            process: sysinfo.clone(),
            service: Arc::new(local::ServiceManagerProbe::new(sysinfo.clone())),
            system: sysinfo,
        }
    }

    /// The same probe for every kind
    pub fn uniform(probe: SharedProbe) -> Self {
        Self {
            port: probe.clone(),
            process: probe.clone(),
            service: probe.clone(),
            system: probe,
        }
    }

    pub fn for_kind(&self, kind: TargetKind) -> &SharedProbe {
        match kind {
            TargetKind::Port => &self.port,
            TargetKind::Process => &self.process,
            TargetKind::Service => &self.service,
            TargetKind::System => &self.system,
        }
    }
}

#[async_trait]
impl Probe for ProbeSet {
    async fn probe(&self, target: &WatchTarget) -> Result<ProbeResult, ProbeError> {
        self.for_kind(target.kind()).probe(target).await
    }
}
