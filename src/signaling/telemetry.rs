//! Host telemetry for the camstatus frame
//!
//! Temperatures come from the kernel thermal zones (millidegrees); storage
//! pressure is the percent used of the root volume.

use std::path::Path;
use sysinfo::Disks;

const CPU_THERMAL_ZONE: &str = "/sys/devices/virtual/thermal/thermal_zone0/temp";
const GPU_THERMAL_ZONE: &str = "/sys/devices/virtual/thermal/thermal_zone1/temp";

/// One telemetry sample
#[derive(Debug, Clone, Copy, Default)]
pub struct HostTelemetry {
    pub cpu_temperature: f64,
    pub gpu_temperature: f64,
    pub disk_used_percent: i64,
}

/// Sample the host; missing sources read as zero
pub fn read_host_telemetry() -> HostTelemetry {
    HostTelemetry {
        cpu_temperature: read_thermal_zone(CPU_THERMAL_ZONE),
        gpu_temperature: read_thermal_zone(GPU_THERMAL_ZONE),
        disk_used_percent: root_disk_used_percent(),
    }
}

fn read_thermal_zone(path: &str) -> f64 {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .map(|millidegrees| millidegrees as f64 / 1000.0)
        .unwrap_or(0.0)
}

fn root_disk_used_percent() -> i64 {
    let disks = Disks::new_with_refreshed_list();
    for disk in disks.list() {
        if disk.mount_point() == Path::new("/") {
            let total = disk.total_space();
            if total == 0 {
                return 0;
            }
            let used = total.saturating_sub(disk.available_space());
            return ((used * 100) / total) as i64;
        }
    }
    0
}
