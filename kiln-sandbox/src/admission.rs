//! Admission control
//!
//! A request is admitted only while a concurrency slot is free and the host
//! is under its CPU and memory thresholds. Slots are semaphore permits, so a
//! slot is returned exactly once, when the permit guard drops.

use crate::config::AdmissionConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use sysinfo::{MemoryRefreshKind, RefreshKind, System};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

const MIB: u64 = 1024 * 1024;

/// Point-in-time host load
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HostSnapshot {
    /// One-minute load average relative to the CPU count, in percent
    pub cpu_percent: f64,
    pub memory_used_percent: f64,
    pub memory_available_bytes: u64,
}

impl HostSnapshot {
    /// A host with no load at all
    pub fn idle() -> Self {
        Self {
            cpu_percent: 0.0,
            memory_used_percent: 0.0,
            memory_available_bytes: u64::MAX,
        }
    }

    pub fn memory_available_mb(&self) -> u64 {
        self.memory_available_bytes / MIB
    }
}

/// Source of host load readings
#[async_trait]
pub trait HostProbe: Send + Sync {
    async fn snapshot(&self) -> HostSnapshot;
}

/// Reads load average and memory through sysinfo
pub struct SysinfoProbe {
    system: Mutex<System>,
    cpus: usize,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let system = System::new_with_specifics(
            RefreshKind::nothing().with_memory(MemoryRefreshKind::everything()),
        );
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            system: Mutex::new(system),
            cpus,
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostProbe for SysinfoProbe {
    async fn snapshot(&self) -> HostSnapshot {
        let load = System::load_average();
        let cpu_percent = load.one / self.cpus as f64 * 100.0;

        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        system.refresh_memory();
        let total = system.total_memory();
        let available = system.available_memory();
        let memory_used_percent = if total == 0 {
            0.0
        } else {
            total.saturating_sub(available) as f64 / total as f64 * 100.0
        };

        HostSnapshot {
            cpu_percent,
            memory_used_percent,
            memory_available_bytes: available,
        }
    }
}

/// Probe that always reports the same reading
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe(pub HostSnapshot);

#[async_trait]
impl HostProbe for FixedProbe {
    async fn snapshot(&self) -> HostSnapshot {
        self.0
    }
}

/// Why a request was not admitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdmissionRejection {
    Capacity {
        in_flight: usize,
        capacity: usize,
    },
    Cpu {
        percent: f64,
        threshold: f64,
    },
    Memory {
        used_percent: f64,
        available_mb: u64,
        threshold: f64,
        min_free_mb: u64,
    },
}

impl fmt::Display for AdmissionRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionRejection::Capacity {
                in_flight,
                capacity,
            } => write!(f, "at capacity ({in_flight}/{capacity} in flight)"),
            AdmissionRejection::Cpu { percent, threshold } => {
                write!(f, "cpu load {percent:.1}% above {threshold:.0}%")
            }
            AdmissionRejection::Memory {
                used_percent,
                available_mb,
                threshold,
                min_free_mb,
            } => write!(
                f,
                "memory pressure ({used_percent:.1}% used, {available_mb}MB free; \
                 limits {threshold:.0}% / {min_free_mb}MB)"
            ),
        }
    }
}

/// Held for the lifetime of an admitted execution. Dropping it frees the
/// slot, including on panic unwind.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

/// Bounds concurrent executions and refuses work on a loaded host
pub struct AdmissionController {
    slots: Arc<Semaphore>,
    capacity: usize,
    cpu_threshold: f64,
    memory_threshold: f64,
    min_free_mb: u64,
    probe: Arc<dyn HostProbe>,
}

impl AdmissionController {
    pub fn new(config: &AdmissionConfig, probe: Arc<dyn HostProbe>) -> Self {
        let capacity = config.effective_capacity();
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            cpu_threshold: config.max_cpu_percent,
            memory_threshold: config.max_memory_percent,
            min_free_mb: config.min_free_memory_mb,
            probe,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }

    /// Take a slot, then check host load. Never waits.
    pub async fn admit(&self) -> Result<AdmissionPermit, AdmissionRejection> {
        let permit = self.slots.clone().try_acquire_owned().map_err(|_| {
            AdmissionRejection::Capacity {
                in_flight: self.in_flight(),
                capacity: self.capacity,
            }
        })?;

        let host = self.probe.snapshot().await;

        if host.cpu_percent > self.cpu_threshold {
            return Err(AdmissionRejection::Cpu {
                percent: host.cpu_percent,
                threshold: self.cpu_threshold,
            });
        }

        if host.memory_used_percent > self.memory_threshold
            || host.memory_available_mb() < self.min_free_mb
        {
            return Err(AdmissionRejection::Memory {
                used_percent: host.memory_used_percent,
                available_mb: host.memory_available_mb(),
                threshold: self.memory_threshold,
                min_free_mb: self.min_free_mb,
            });
        }

        Ok(AdmissionPermit { _permit: permit })
    }
}
