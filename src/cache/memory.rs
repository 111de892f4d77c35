use super::types::MemoryUsageInfo;

/// Samples resident memory of the whole process against an optional ceiling.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessMemory {
    limit: Option<u64>,
}

impl ProcessMemory {
    pub fn new(limit: Option<u64>) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn sample(&self) -> MemoryUsageInfo {
        let allocated = memory_stats::memory_stats()
            .map(|usage| usage.physical_mem as u64)
            .unwrap_or(0);
        Self::usage(allocated, self.limit)
    }

    /// Bytes to release to get from above `high` back down to `low`, if the process is
    /// over its high-water mark. Always `None` without a ceiling.
    pub fn excess(&self, high: f64, low: f64) -> Option<u64> {
        self.limit?;
        let usage = self.sample();
        Self::excess_of(usage, high, low)
    }

    fn usage(allocated: u64, limit: Option<u64>) -> MemoryUsageInfo {
        let max = limit.unwrap_or(0);
        let utilization = if max > 0 {
            allocated as f64 / max as f64
        } else {
            0.0
        };
        MemoryUsageInfo {
            allocated,
            max,
            utilization,
        }
    }

    fn excess_of(usage: MemoryUsageInfo, high: f64, low: f64) -> Option<u64> {
        if usage.max == 0 || usage.utilization <= high {
            return None;
        }
        let target = (usage.max as f64 * low) as u64;
        Some(usage.allocated.saturating_sub(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_limit_never_reports_excess() {
        let memory = ProcessMemory::new(None);

        assert_eq!(memory.excess(0.8, 0.6), None);
        assert_eq!(memory.sample().max, 0);
    }

    #[test]
    fn test_excess_down_to_low_water() {
        let usage = ProcessMemory::usage(900, Some(1000));

        assert_eq!(ProcessMemory::excess_of(usage, 0.8, 0.6), Some(300));
    }

    #[test]
    fn test_below_high_water_is_fine() {
        let usage = ProcessMemory::usage(700, Some(1000));

        assert_eq!(ProcessMemory::excess_of(usage, 0.8, 0.6), None);
    }
}
