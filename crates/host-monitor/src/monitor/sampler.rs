use std::time::Duration;

use sysinfo::{System, Users, MINIMUM_CPU_UPDATE_INTERVAL};

use crate::core::types::{Dimension, MeasureValueType, Record};

/// Window over which CPU load is measured.
pub const CPU_SAMPLE_WINDOW: Duration = Duration::from_millis(500);

const THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";
const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessIdentity {
    pub pid: u32,
    pub name: String,
    pub user: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub process: ProcessIdentity,
    pub cpu_usage_pct: f64,
    pub cpu_freq_mhz: u64,
    pub cpu_temp_c: f64,
    pub ram_used_bytes: u64,
    pub ram_total_bytes: u64,
}

impl Snapshot {
    pub fn ram_used_mib(&self) -> u64 {
        self.ram_used_bytes / MIB
    }

    pub fn ram_total_mib(&self) -> u64 {
        self.ram_total_bytes / MIB
    }

    pub fn ram_usage_pct(&self) -> f64 {
        if self.ram_total_bytes == 0 {
            return 0.0;
        }
        round1(self.ram_used_bytes as f64 * 100.0 / self.ram_total_bytes as f64)
    }

    pub fn records(&self) -> Vec<Record> {
        vec![
            Record::new("cpu_usage", None, self.cpu_usage_pct),
            Record::new("cpu_freq", Some(MeasureValueType::Bigint), self.cpu_freq_mhz),
            Record::new("cpu_temp", Some(MeasureValueType::Double), self.cpu_temp_c),
            Record::new("ram_usage", None, self.ram_used_mib()),
            Record::new("ram_total", None, self.ram_total_mib()),
        ]
    }

    pub fn dimensions(&self, device: &str) -> Vec<Dimension> {
        vec![
            Dimension::new("script", &self.process.name),
            Dimension::new("device_id", device),
            Dimension::new("user", &self.process.user),
            Dimension::new("process_id", self.process.pid.to_string()),
        ]
    }
}

pub struct Sampler {
    sys: System,
    process: ProcessIdentity,
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler {
    pub fn new() -> Self {
        let sys = System::new_all();
        let process = identify_process(&sys);
        tracing::debug!(pid = process.pid, name = %process.name, user = %process.user, "sampler ready");
        Self { sys, process }
    }

    /// Takes one snapshot. Blocks the task for the CPU sampling window.
    pub async fn sample(&mut self) -> Snapshot {
        self.sys.refresh_cpu_usage();
        tokio::time::sleep(CPU_SAMPLE_WINDOW.max(MINIMUM_CPU_UPDATE_INTERVAL)).await;
        self.sys.refresh_cpu_usage();
        self.sys.refresh_cpu_frequency();
        self.sys.refresh_memory();

        let total = self.sys.total_memory();
        Snapshot {
            process: self.process.clone(),
            cpu_usage_pct: round1(f64::from(self.sys.global_cpu_usage())),
            cpu_freq_mhz: self.sys.cpus().first().map(|c| c.frequency()).unwrap_or(0),
            cpu_temp_c: read_cpu_temp(),
            ram_used_bytes: total.saturating_sub(self.sys.available_memory()),
            ram_total_bytes: total,
        }
    }
}

fn identify_process(sys: &System) -> ProcessIdentity {
    let unknown = || "unknown".to_string();
    let Ok(pid) = sysinfo::get_current_pid() else {
        return ProcessIdentity {
            pid: std::process::id(),
            name: unknown(),
            user: unknown(),
        };
    };

    let process = sys.process(pid);
    let name = process
        .map(|p| p.name().to_string_lossy().into_owned())
        .unwrap_or_else(unknown);
    let users = Users::new_with_refreshed_list();
    let user = process
        .and_then(|p| p.user_id())
        .and_then(|uid| users.get_user_by_id(uid))
        .map(|u| u.name().to_string())
        .unwrap_or_else(unknown);

    ProcessIdentity {
        pid: pid.as_u32(),
        name,
        user,
    }
}

/// CPU temperature in °C, 0.0 when the thermal zone is missing or unreadable.
pub fn read_cpu_temp() -> f64 {
    std::fs::read_to_string(THERMAL_ZONE)
        .ok()
        .and_then(|s| parse_millidegrees(&s))
        .unwrap_or(0.0)
}

/// The thermal zone holds degrees times 1000 on its first line.
pub fn parse_millidegrees(raw: &str) -> Option<f64> {
    let line = raw.lines().next()?.trim();
    if line.is_empty() || !line.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    line.parse::<f64>().ok().map(|v| v / 1000.0)
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}
