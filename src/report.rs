//! Per-VM outcome collection and console reporting.

use crate::models::{Vm, VmSize};
use std::time::Duration;

/// Outcome of one per-VM step within a fan-out pass.
#[derive(Debug, Clone)]
pub struct VmOutcome {
    pub vm: String,
    pub ok: bool,
    pub error: Option<String>,
}

impl VmOutcome {
    pub fn ok(vm: impl Into<String>) -> Self {
        Self {
            vm: vm.into(),
            ok: true,
            error: None,
        }
    }

    pub fn failed(vm: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            vm: vm.into(),
            ok: false,
            error: Some(error.into()),
        }
    }
}

/// Aggregated result of a fan-out pass. Contains exactly one entry per VM
/// the pass was applied to, whether that entry succeeded or not.
#[derive(Debug, Clone)]
pub struct FanoutReport {
    pub operation: String,
    pub outcomes: Vec<VmOutcome>,
}

impl FanoutReport {
    pub fn new(operation: impl Into<String>, outcomes: Vec<VmOutcome>) -> Self {
        Self {
            operation: operation.into(),
            outcomes,
        }
    }

    pub fn empty(operation: impl Into<String>) -> Self {
        Self::new(operation, Vec::new())
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.ok).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn all_ok(&self) -> bool {
        self.failed() == 0
    }

    /// One-line summary for the end-of-operation narrative.
    pub fn summary(&self) -> String {
        format!(
            "{}: {}/{} VMs succeeded",
            self.operation,
            self.succeeded(),
            self.outcomes.len()
        )
    }
}

/// Elapsed-time stamp in the `00h00m00s` form used by progress narratives.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{:02}h{:02}m{:02}s", hours, minutes, seconds)
}

fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }

    let line = |cells: &[String]| -> String {
        cells
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{:<width$}", c, width = widths[i]))
            .collect::<Vec<_>>()
            .join("  ")
    };

    let header_cells: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    let mut out = line(&header_cells);
    out.push('\n');
    out.push_str(&"-".repeat(widths.iter().sum::<usize>() + 2 * (widths.len() - 1)));
    for row in rows {
        out.push('\n');
        out.push_str(&line(row));
    }
    out
}

/// Tabular snapshot of VM state, printed after every pool operation.
pub fn vm_table(pool: &str, vms: &[Vm]) -> String {
    let headers = ["Name", "Location", "Size", "Provisioning", "Power state"];
    let rows: Vec<Vec<String>> = vms
        .iter()
        .map(|vm| {
            vec![
                vm.name.clone(),
                vm.location.clone(),
                vm.hardware_profile.vm_size.clone(),
                vm.provisioning_state.to_string(),
                vm.power_state.to_string(),
            ]
        })
        .collect();

    format!(
        "VMs in pool '{}':\n{}",
        pool,
        render_table(&headers, &rows)
    )
}

/// Table of available VM sizes.
pub fn size_table(sizes: &[VmSize]) -> String {
    let headers = [
        "Name",
        "Cores",
        "Memory (GB)",
        "OS disk (GB)",
        "Resource disk (GB)",
        "Max disks",
    ];
    let rows: Vec<Vec<String>> = sizes
        .iter()
        .map(|s| {
            vec![
                s.name.clone(),
                s.number_of_cores.to_string(),
                format!("{:.1}", s.memory_gb()),
                format!("{:.1}", s.os_disk_size_in_mb as f64 / 1024.0),
                format!("{:.1}", s.resource_disk_size_in_mb as f64 / 1024.0),
                s.max_data_disk_count.to_string(),
            ]
        })
        .collect();

    render_table(&headers, &rows)
}
