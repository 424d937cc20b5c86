use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// How a metric renders its values for humans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueStyle {
    /// SI-prefixed value (`1.2340k`) with the display unit appended.
    Si,
    /// Percentage with a fixed number of decimals.
    Percent,
}

/// A metric known to the dashboard.
///
/// `scale` converts backend units into `unit`: the backend accounts CPU
/// time in seconds per bucket, memory in bytes, disk in bytes. Scaling is
/// applied once, by the series transform, never by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Backend metric name (e.g. "cpu", "vm.memory.usage").
    pub name: String,

    /// Human label. May be empty for metrics never shown standalone.
    pub label: String,

    /// Display unit after scaling (e.g. "hours", "GB").
    pub unit: String,

    /// Constant conversion factor from backend units to `unit`.
    pub scale: f64,

    /// Value rendering style.
    pub style: ValueStyle,
}

impl Metric {
    pub fn new(
        name: impl Into<String>,
        label: impl Into<String>,
        unit: impl Into<String>,
        scale: f64,
    ) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            unit: unit.into(),
            scale,
            style: ValueStyle::Si,
        }
    }

    /// An unscaled pass-through metric.
    ///
    /// Used where values must stay in backend units, e.g. accounting
    /// reports that do their own seconds-to-hours conversion.
    pub fn raw(name: impl Into<String>) -> Self {
        Self::new(name, "", "", 1.0)
    }

    fn percent(mut self) -> Self {
        self.style = ValueStyle::Percent;
        self
    }

    /// Label if present, metric name otherwise.
    pub fn display_label(&self) -> &str {
        if self.label.is_empty() {
            &self.name
        } else {
            &self.label
        }
    }

    /// Full value rendering, e.g. `1.2340k hours` or `85.00%`.
    pub fn format_value(&self, value: f64) -> String {
        match self.style {
            ValueStyle::Si => {
                let formatted = si_format(value, 5);
                if self.unit.is_empty() {
                    formatted
                } else {
                    format!("{} {}", formatted, self.unit)
                }
            }
            ValueStyle::Percent => format!("{:.2}%", value),
        }
    }

    /// Compact rendering for axis ticks.
    pub fn format_tick(&self, value: f64) -> String {
        match self.style {
            ValueStyle::Si => si_format(value, 2),
            ValueStyle::Percent => format!("{:.1}%", value),
        }
    }
}

/// Formats with an SI prefix and the given number of significant digits.
fn si_format(value: f64, significant: usize) -> String {
    if value == 0.0 || !value.is_finite() {
        return format!("{}", value);
    }

    const PREFIXES: [(i32, &str); 11] = [
        (-12, "p"),
        (-9, "n"),
        (-6, "µ"),
        (-3, "m"),
        (0, ""),
        (3, "k"),
        (6, "M"),
        (9, "G"),
        (12, "T"),
        (15, "P"),
        (18, "E"),
    ];

    let exponent = value.abs().log10().floor() as i32;
    let prefix_exponent = (exponent.div_euclid(3) * 3).clamp(-12, 18);
    let prefix = PREFIXES
        .iter()
        .find(|(e, _)| *e == prefix_exponent)
        .map(|(_, p)| *p)
        .unwrap_or("");

    let scaled = value / 10f64.powi(prefix_exponent);
    let integer_digits = scaled.abs().log10().floor().max(0.0) as usize + 1;
    let decimals = significant.saturating_sub(integer_digits);
    format!("{:.*}{}", decimals, scaled, prefix)
}

pub static VM_CPU_TIME_USAGE: Lazy<Metric> =
    Lazy::new(|| Metric::new("cpu", "CPU Time", "hours", 1.0 / 3600.0));

pub static VM_WALLCLOCK_TIME_USAGE: Lazy<Metric> =
    Lazy::new(|| Metric::new("wallclocktime", "Wall Clock Time", "hours", 1.0 / 3600.0));

pub static VM_CPU_EFFICIENCY: Lazy<Metric> =
    Lazy::new(|| Metric::new("cpu.efficiency", "CPU Efficiency", "%", 1.0).percent());

pub static VM_VCPUS_USAGE: Lazy<Metric> =
    Lazy::new(|| Metric::new("vm.vcpus.usage", "", "hours", 1.0 / 3600.0));

pub static VM_DISK_USAGE: Lazy<Metric> =
    Lazy::new(|| Metric::new("vm.disk.usage", "", "TB", 1e-12));

pub static VM_MEMORY_USAGE: Lazy<Metric> =
    Lazy::new(|| Metric::new("vm.memory.usage", "", "GB", 1e-9));

pub static VM_COUNT_ACTIVE: Lazy<Metric> = Lazy::new(|| Metric::new("vms.active", "", "", 1.0));

pub static VM_COUNT_DELETED: Lazy<Metric> = Lazy::new(|| Metric::new("vms.deleted", "", "", 1.0));

pub static QUOTA_MEMORY: Lazy<Metric> = Lazy::new(|| Metric::new("quota.memory", "", "GB", 1e-9));

pub static QUOTA_VCPUS: Lazy<Metric> =
    Lazy::new(|| Metric::new("quota.vcpus", "VCPUs quota", "vcpus", 1.0));

pub static QUOTA_CPUS: Lazy<Metric> = Lazy::new(|| Metric::new("quota.cpus", "", "cpus", 1.0));

pub static QUOTA_INSTANCES: Lazy<Metric> =
    Lazy::new(|| Metric::new("quota.instances", "", "", 1.0));

pub static HYPERVISOR_STATUS: Lazy<Metric> =
    Lazy::new(|| Metric::new("hypervisor.status", "", "", 1.0));

pub static HYPERVISOR_STATE: Lazy<Metric> =
    Lazy::new(|| Metric::new("hypervisor.state", "", "", 1.0));

pub static HYPERVISOR_CPUS_TOTAL: Lazy<Metric> =
    Lazy::new(|| Metric::new("hypervisor.cpus.total", "", "cpus", 1.0));

pub static HYPERVISOR_VCPUS_TOTAL: Lazy<Metric> =
    Lazy::new(|| Metric::new("hypervisor.vcpus.total", "", "vcpus", 1.0));

pub static HYPERVISOR_VCPUS_USED: Lazy<Metric> =
    Lazy::new(|| Metric::new("hypervisor.vcpus.used", "", "vcpus", 1.0));

pub static HYPERVISOR_RAM_TOTAL: Lazy<Metric> =
    Lazy::new(|| Metric::new("hypervisor.ram.total", "", "GB", 1e-9));

pub static HYPERVISOR_MEMORY_TOTAL: Lazy<Metric> =
    Lazy::new(|| Metric::new("hypervisor.memory.total", "", "GB", 1e-9));

pub static HYPERVISOR_MEMORY_USED: Lazy<Metric> =
    Lazy::new(|| Metric::new("hypervisor.memory.used", "", "GB", 1e-9));

pub static HYPERVISOR_RUNNING_VMS: Lazy<Metric> =
    Lazy::new(|| Metric::new("hypervisor.vms.running", "", "vms", 1.0));

pub static HYPERVISOR_WORKLOAD: Lazy<Metric> =
    Lazy::new(|| Metric::new("hypervisor.workload", "", "", 1.0));

pub static HYPERVISOR_LOAD_5M: Lazy<Metric> =
    Lazy::new(|| Metric::new("hypervisor.load.5m", "", "%", 1.0));

pub static HYPERVISOR_LOAD_10M: Lazy<Metric> =
    Lazy::new(|| Metric::new("hypervisor.load.10m", "", "%", 1.0));

pub static HYPERVISOR_LOAD_15M: Lazy<Metric> =
    Lazy::new(|| Metric::new("hypervisor.load.15m", "", "%", 1.0));

pub static HYPERVISOR_DISK_TOTAL: Lazy<Metric> =
    Lazy::new(|| Metric::new("hypervisor.disk.total", "", "TB", 1e-12));

pub static HYPERVISOR_DISK_USED: Lazy<Metric> =
    Lazy::new(|| Metric::new("hypervisor.disk.used", "", "TB", 1e-12));

pub static HYPERVISOR_DISK_FREE: Lazy<Metric> =
    Lazy::new(|| Metric::new("hypervisor.disk.free", "", "TB", 1e-12));

pub static HYPERVISOR_DISK_FREE_LEAST: Lazy<Metric> =
    Lazy::new(|| Metric::new("hypervisor.disk.free.least", "", "TB", 1e-12));

static CATALOG: Lazy<Vec<&'static Metric>> = Lazy::new(|| {
    vec![
        &*VM_CPU_TIME_USAGE,
        &*VM_WALLCLOCK_TIME_USAGE,
        &*VM_CPU_EFFICIENCY,
        &*VM_VCPUS_USAGE,
        &*VM_DISK_USAGE,
        &*VM_MEMORY_USAGE,
        &*VM_COUNT_ACTIVE,
        &*VM_COUNT_DELETED,
        &*QUOTA_MEMORY,
        &*QUOTA_VCPUS,
        &*QUOTA_CPUS,
        &*QUOTA_INSTANCES,
        &*HYPERVISOR_STATUS,
        &*HYPERVISOR_STATE,
        &*HYPERVISOR_CPUS_TOTAL,
        &*HYPERVISOR_VCPUS_TOTAL,
        &*HYPERVISOR_VCPUS_USED,
        &*HYPERVISOR_RAM_TOTAL,
        &*HYPERVISOR_MEMORY_TOTAL,
        &*HYPERVISOR_MEMORY_USED,
        &*HYPERVISOR_RUNNING_VMS,
        &*HYPERVISOR_WORKLOAD,
        &*HYPERVISOR_LOAD_5M,
        &*HYPERVISOR_LOAD_10M,
        &*HYPERVISOR_LOAD_15M,
        &*HYPERVISOR_DISK_TOTAL,
        &*HYPERVISOR_DISK_USED,
        &*HYPERVISOR_DISK_FREE,
        &*HYPERVISOR_DISK_FREE_LEAST,
    ]
});

/// Looks up a catalog metric by backend name.
///
/// A miss is a caller configuration error: the catalog is the closed set
/// of metrics the dashboard knows how to display.
pub fn lookup(name: &str) -> Option<&'static Metric> {
    CATALOG.iter().copied().find(|m| m.name == name)
}

/// All catalog metrics, in registration order.
pub fn all() -> impl Iterator<Item = &'static Metric> {
    CATALOG.iter().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let metric = lookup("cpu").unwrap();
        assert_eq!(metric.label, "CPU Time");
        assert_eq!(metric.unit, "hours");
        assert!((metric.scale - 1.0 / 3600.0).abs() < 1e-12);

        assert!(lookup("no.such.metric").is_none());
    }

    #[test]
    fn test_catalog_names_are_unique() {
        let mut names: Vec<&str> = all().map(|m| m.name.as_str()).collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }

    #[test]
    fn test_raw_metric_is_identity() {
        let metric = Metric::raw("cpu");
        assert_eq!(metric.scale, 1.0);
        assert_eq!(metric.label, "");
        assert_eq!(metric.display_label(), "cpu");
    }

    #[test]
    fn test_si_format() {
        assert_eq!(si_format(1234.0, 5), "1.2340k");
        assert_eq!(si_format(1234.0, 2), "1.2k");
        assert_eq!(si_format(0.0421, 2), "42m");
        assert_eq!(si_format(2.5e9, 2), "2.5G");
        assert_eq!(si_format(0.0, 5), "0");
        assert_eq!(si_format(-1500.0, 2), "-1.5k");
    }

    #[test]
    fn test_format_value() {
        let cpu = lookup("cpu").unwrap();
        assert_eq!(cpu.format_value(1234.0), "1.2340k hours");
        assert_eq!(cpu.format_tick(1234.0), "1.2k");

        let efficiency = lookup("cpu.efficiency").unwrap();
        assert_eq!(efficiency.format_value(85.0), "85.00%");
        assert_eq!(efficiency.format_tick(85.0), "85.0%");

        let count = lookup("vms.active").unwrap();
        assert_eq!(count.format_value(12.0), "12.000");
    }
}
