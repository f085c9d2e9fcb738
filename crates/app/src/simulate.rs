//! Workload replay against a driver.
//!
//! The replayer keeps its own idea of each open object's position. When an
//! operation names a different position it seeks first, so a workload reads
//! like a log of positioned accesses while the driver only ever sees
//! sequential calls plus seeks.

use crate::workload::WorkloadOp;
use anyhow::{bail, Context};
use scatter_gather_core::{Driver, FileHandle, ShutdownReport, Transport};
use std::collections::HashMap;
use tracing::{debug, info};

/// Counts of what a replay did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SimulationSummary {
    pub opens: u64,
    pub reads: u64,
    pub writes: u64,
    pub seeks: u64,
    pub closes: u64,

    /// Set once EOF shut the driver down
    pub shutdown: Option<ShutdownReport>,
}

impl SimulationSummary {
    pub fn print(&self) {
        println!("=== Workload ===");
        println!(
            "Opens: {}, reads: {}, writes: {}, seeks: {}, closes: {}",
            self.opens, self.reads, self.writes, self.seeks, self.closes
        );
        if let Some(report) = &self.shutdown {
            println!(
                "Shutdown released {} files, {} blocks, {} nodes",
                report.files, report.blocks, report.nodes
            );
        }
        println!();
    }
}

/// Replayer state for one open object.
#[derive(Debug, Clone, Copy)]
struct OpenObject {
    handle: FileHandle,
    pos: usize,
}

/// Replay `ops` until EOF, verifying every read.
pub fn replay<T: Transport>(
    driver: &mut Driver<T>,
    ops: &[WorkloadOp],
) -> anyhow::Result<SimulationSummary> {
    let mut objects: HashMap<String, OpenObject> = HashMap::new();
    let mut summary = SimulationSummary::default();
    info!(cache_capacity = driver.config().cache_capacity, "replaying workload");

    for (idx, op) in ops.iter().enumerate() {
        let target = op.name().unwrap_or("-");
        debug!(step = idx + 1, object = target, %op, "replaying");

        match op {
            WorkloadOp::Open { name } => {
                let handle = driver
                    .open(name)
                    .with_context(|| format!("error opening [{name}]"))?;
                objects.insert(name.clone(), OpenObject { handle, pos: 0 });
                info!(name = name.as_str(), %handle, "opened object");
                summary.opens += 1;
            }

            WorkloadOp::Read { name, pos, data } => {
                let object = position(driver, &mut objects, &mut summary, name, *pos)?;
                let size = data.len();
                let bytes = driver
                    .read(object.handle, size)
                    .with_context(|| format!("read failed [{name}, pos={pos}, size={size}]"))?;

                if bytes != *data {
                    let first = bytes
                        .iter()
                        .zip(data.iter())
                        .position(|(got, want)| got != want)
                        .unwrap_or(bytes.len().min(data.len()));
                    bail!(
                        "read data compare failed [{name}, pos={pos}]: first difference at byte {first}"
                    );
                }

                object.pos += data.len();
                summary.reads += 1;
            }

            WorkloadOp::Write { name, pos, data } => {
                let object = position(driver, &mut objects, &mut summary, name, *pos)?;
                let size = data.len();
                let written = driver
                    .write(object.handle, data)
                    .with_context(|| format!("write failed [{name}, pos={pos}, size={size}]"))?;
                if written != size {
                    bail!("short write [{name}]: {written} of {size} bytes");
                }

                object.pos += written;
                summary.writes += 1;
            }

            WorkloadOp::Close { name } => {
                let object = objects
                    .remove(name)
                    .with_context(|| format!("closing unknown object [{name}]"))?;
                driver
                    .close(object.handle)
                    .with_context(|| format!("close failed [{name}]"))?;
                info!(name = name.as_str(), "closed object");
                summary.closes += 1;
            }

            WorkloadOp::Eof => {
                let report = driver.shutdown().context("driver shutdown failed")?;
                info!("end of the workload (processed)");
                summary.shutdown = Some(report);
                return Ok(summary);
            }
        }
    }

    bail!("workload ended without EOF")
}

/// Look up an open object and seek it to `pos` if needed.
fn position<'a, T: Transport>(
    driver: &mut Driver<T>,
    objects: &'a mut HashMap<String, OpenObject>,
    summary: &mut SimulationSummary,
    name: &str,
    pos: usize,
) -> anyhow::Result<&'a mut OpenObject> {
    let object = objects
        .get_mut(name)
        .with_context(|| format!("unknown object [{name}]"))?;

    if object.pos != pos {
        driver
            .seek(object.handle, pos)
            .with_context(|| format!("seek failed [{name}, pos={pos}]"))?;
        object.pos = pos;
        summary.seeks += 1;
    }
    Ok(object)
}
