mod types;

pub use types::{CycleMetrics, MetricsSnapshot, SystemMetrics};

use std::collections::VecDeque;
use std::sync::Arc;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::Mutex;

use crate::inference::Label;
use crate::sensing::ScanCase;

const MAX_RECENT_CYCLES: usize = 20;

#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

#[derive(Default)]
struct Counters {
    cycles: u64,
    pipelines: u64,
    reuses: u64,
    whitelisted: u64,
    errors: u64,
    skips: u64,
}

struct MetricsState {
    recent_cycles: VecDeque<CycleMetrics>,
    counters: Counters,
    system: System,
    pid: Pid,
}

impl MetricsState {
    fn sample(&mut self) -> SystemMetrics {
        let pid = self.pid;
        self.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
        match self.system.process(pid) {
            Some(process) => SystemMetrics {
                cpu_percent: process.cpu_usage(),
                memory_mb: process.memory() as f64 / 1024.0 / 1024.0,
            },
            None => SystemMetrics::default(),
        }
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        let pid = Pid::from_u32(std::process::id());

        // CPU usage is a delta between refreshes; take the baseline now.
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        Self {
            inner: Arc::new(Mutex::new(MetricsState {
                recent_cycles: VecDeque::with_capacity(MAX_RECENT_CYCLES),
                counters: Counters::default(),
                system,
                pid,
            })),
        }
    }

    /// Stamps CPU/RAM onto `metrics` and stores it.
    pub async fn record_cycle(&self, mut metrics: CycleMetrics) {
        let mut state = self.inner.lock().await;
        let system = state.sample();
        metrics.cpu_percent = system.cpu_percent;
        metrics.memory_mb = system.memory_mb;

        let counters = &mut state.counters;
        counters.cycles += 1;
        if metrics.skipped.is_some() {
            counters.skips += 1;
        }
        if metrics.error.is_some() || metrics.label == Some(Label::Error) {
            counters.errors += 1;
        }
        match metrics.case {
            Some(ScanCase::Whitelisted) => counters.whitelisted += 1,
            Some(ScanCase::HashStable) => counters.reuses += 1,
            Some(ScanCase::NoPriorHash | ScanCase::HashChanged) => counters.pipelines += 1,
            None => {}
        }

        state.recent_cycles.push_back(metrics);
        if state.recent_cycles.len() > MAX_RECENT_CYCLES {
            state.recent_cycles.pop_front();
        }
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        let mut state = self.inner.lock().await;
        let system = state.sample();
        let counters = &state.counters;

        MetricsSnapshot {
            system,
            recent_cycles: state.recent_cycles.iter().cloned().collect(),
            cycle_count: counters.cycles,
            pipeline_count: counters.pipelines,
            reuse_count: counters.reuses,
            whitelist_count: counters.whitelisted,
            error_count: counters.errors,
            skip_count: counters.skips,
        }
    }

    pub async fn reset(&self) {
        let mut state = self.inner.lock().await;
        state.recent_cycles.clear();
        state.counters = Counters::default();
        state.sample();
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
