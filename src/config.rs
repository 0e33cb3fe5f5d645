/// Scheduler-level configuration. Sources sources/classpath/compiler
/// options are not this crate's concern (§1 Non-goals); this is only the
/// knob that governs how much of the graph walk runs concurrently.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Size of the bounded computation pool (§5): how many `compile`
    /// invocations and DAG-walking `gather`s may run at once. Defaults to
    /// the number of logical cores, matching the teacher's
    /// `StageConfig::default()` sizing convention.
    pub computation_parallelism: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            computation_parallelism: num_cpus::get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_parallelism_is_positive() {
        assert!(SchedulerConfig::default().computation_parallelism > 0);
    }
}
