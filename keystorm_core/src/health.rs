use crate::profile::EditorProfile;
use serde::Serialize;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::thread;
use sysinfo::{Disks, MINIMUM_CPU_UPDATE_INTERVAL, System};
use tracing::{debug, warn};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthThresholds {
    pub max_cpu_percent: f32,
    pub max_memory_percent: f32,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            max_cpu_percent: 90.0,
            max_memory_percent: 90.0,
        }
    }
}

impl HealthThresholds {
    pub fn allows(&self, cpu_percent: f32, memory_percent: f32) -> bool {
        cpu_percent < self.max_cpu_percent && memory_percent < self.max_memory_percent
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceSnapshot {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub disk_percent: f32,
    pub available_memory_gb: f64,
    pub healthy: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub editor: String,
    pub binary_ok: bool,
    pub resources: ResourceSnapshot,
}

impl HealthReport {
    pub fn healthy(&self) -> bool {
        self.binary_ok && self.resources.healthy
    }
}

/// True if `path` names an existing regular file with an execute bit set.
/// Bare program names are resolved through `PATH`.
pub fn check_binary(path: &Path) -> bool {
    let resolved = if path.components().count() == 1 && !path.is_absolute() {
        match which::which(path) {
            Ok(p) => p,
            Err(_) => return false,
        }
    } else {
        path.to_path_buf()
    };

    match std::fs::metadata(&resolved) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[derive(Debug, Clone, Default)]
pub struct HealthChecker {
    thresholds: HealthThresholds,
}

impl HealthChecker {
    pub fn new(thresholds: HealthThresholds) -> Self {
        Self { thresholds }
    }

    pub fn check_editor(&self, profile: &dyn EditorProfile) -> bool {
        let ok = check_binary(profile.binary());
        if !ok {
            warn!(
                editor = profile.name(),
                binary = ?profile.binary(),
                "Editor binary missing or not executable"
            );
        }
        ok
    }

    /// Samples CPU, memory and disk usage. CPU usage needs two samples, so
    /// this blocks for the minimum update interval.
    pub fn check_system_resources(&self) -> ResourceSnapshot {
        let mut sys = System::new();
        sys.refresh_cpu();
        thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL);
        sys.refresh_cpu();
        sys.refresh_memory();

        let cpu_percent = sys.global_cpu_info().cpu_usage();
        let total = sys.total_memory();
        let memory_percent = if total == 0 {
            0.0
        } else {
            (sys.used_memory() as f64 / total as f64 * 100.0) as f32
        };
        let available_memory_gb = sys.available_memory() as f64 / GIB;

        let disks = Disks::new_with_refreshed_list();
        let disk_percent = disks
            .list()
            .iter()
            .find(|d| d.mount_point() == Path::new("/"))
            .filter(|d| d.total_space() > 0)
            .map(|d| {
                let used = d.total_space().saturating_sub(d.available_space());
                (used as f64 / d.total_space() as f64 * 100.0) as f32
            })
            .unwrap_or(0.0);

        let healthy = self.thresholds.allows(cpu_percent, memory_percent);
        debug!(cpu_percent, memory_percent, disk_percent, healthy, "Sampled system resources");
        if !healthy {
            warn!(
                cpu_percent,
                memory_percent,
                max_cpu = self.thresholds.max_cpu_percent,
                max_memory = self.thresholds.max_memory_percent,
                "System resources above threshold"
            );
        }

        ResourceSnapshot {
            cpu_percent,
            memory_percent,
            disk_percent,
            available_memory_gb,
            healthy,
        }
    }

    pub fn run(&self, profile: &dyn EditorProfile) -> HealthReport {
        HealthReport {
            editor: profile.name().to_string(),
            binary_ok: self.check_editor(profile),
            resources: self.check_system_resources(),
        }
    }
}
