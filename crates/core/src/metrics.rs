//! Operation and packet counters for a driver instance.
//!
//! The driver updates these inline as it works; they are plain counters, not
//! shared state. `print_summary` and `export_text` are for the simulator and
//! for tests.

use crate::cache::CacheStats;
use std::time::{Duration, Instant};

/// Counters collected by one driver.
#[derive(Debug, Clone)]
pub struct DriverMetrics {
    // === Timing ===
    /// When the driver was created
    pub start_time: Instant,

    /// When the driver shut down
    pub end_time: Option<Instant>,

    // === File operations ===
    pub opens: u64,
    pub reads: u64,
    pub writes: u64,
    pub seeks: u64,
    pub closes: u64,

    /// Bytes returned by successful reads
    pub bytes_read: u64,

    /// Bytes accepted by successful writes
    pub bytes_written: u64,

    // === Protocol ===
    /// Requests handed to the transport
    pub packets_sent: u64,

    /// Responses that decoded successfully
    pub packets_received: u64,

    /// Posts that failed in the transport
    pub transport_failures: u64,

    /// Responses rejected by the codec or by operation checks
    pub bad_responses: u64,

    // === Blocks ===
    pub blocks_created: u64,
    pub blocks_updated: u64,
    pub blocks_obtained: u64,

    // === Cache ===
    /// Final cache counters, filled in at shutdown
    pub cache: Option<CacheStats>,
}

impl DriverMetrics {
    /// Create new metrics with start time set to now.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            end_time: None,
            opens: 0,
            reads: 0,
            writes: 0,
            seeks: 0,
            closes: 0,
            bytes_read: 0,
            bytes_written: 0,
            packets_sent: 0,
            packets_received: 0,
            transport_failures: 0,
            bad_responses: 0,
            blocks_created: 0,
            blocks_updated: 0,
            blocks_obtained: 0,
            cache: None,
        }
    }

    /// Mark the driver as finished.
    pub fn complete(&mut self) {
        self.end_time = Some(Instant::now());
    }

    /// Total duration (or current elapsed if not complete).
    pub fn duration(&self) -> Duration {
        match self.end_time {
            Some(end) => end.duration_since(self.start_time),
            None => self.start_time.elapsed(),
        }
    }

    /// Packets per block operation; 0.0 if no block was touched.
    pub fn packets_per_block_op(&self) -> f64 {
        let ops = self.blocks_created + self.blocks_updated + self.blocks_obtained;
        if ops == 0 {
            0.0
        } else {
            self.packets_sent as f64 / ops as f64
        }
    }

    /// Print a human-readable summary to stdout.
    pub fn print_summary(&self) {
        println!("\n=== Driver Summary ===");
        println!("Duration: {} ms", self.duration().as_millis());
        println!();

        println!("=== File Operations ===");
        println!("Opens: {}", self.opens);
        println!("Reads: {} ({} bytes)", self.reads, self.bytes_read);
        println!("Writes: {} ({} bytes)", self.writes, self.bytes_written);
        println!("Seeks: {}", self.seeks);
        println!("Closes: {}", self.closes);
        println!();

        println!("=== Protocol ===");
        println!("Packets sent: {}", self.packets_sent);
        println!("Packets received: {}", self.packets_received);
        println!("Transport failures: {}", self.transport_failures);
        println!("Bad responses: {}", self.bad_responses);
        println!(
            "Blocks created/updated/obtained: {}/{}/{}",
            self.blocks_created, self.blocks_updated, self.blocks_obtained
        );
        println!();

        if let Some(cache) = &self.cache {
            println!("=== Cache ===");
            println!("Capacity: {} blocks", cache.capacity);
            println!(
                "Queries: {}, hits: {} ({:.2}%)",
                cache.queries,
                cache.hits,
                cache.hit_rate() * 100.0
            );
            println!();
        }
    }

    /// Export metrics as a simple text format (for parsing/testing).
    pub fn export_text(&self) -> String {
        let (queries, hits) = self
            .cache
            .map(|cache| (cache.queries, cache.hits))
            .unwrap_or((0, 0));

        format!(
            "duration_ms={}\n\
             opens={}\n\
             reads={}\n\
             writes={}\n\
             seeks={}\n\
             closes={}\n\
             bytes_read={}\n\
             bytes_written={}\n\
             packets_sent={}\n\
             packets_received={}\n\
             transport_failures={}\n\
             cache_queries={}\n\
             cache_hits={}\n",
            self.duration().as_millis(),
            self.opens,
            self.reads,
            self.writes,
            self.seeks,
            self.closes,
            self.bytes_read,
            self.bytes_written,
            self.packets_sent,
            self.packets_received,
            self.transport_failures,
            queries,
            hits,
        )
    }
}

impl Default for DriverMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = DriverMetrics::new();
        assert!(metrics.end_time.is_none());
        assert!(metrics.cache.is_none());
        assert!(metrics.duration().as_millis() < 100);
    }

    #[test]
    fn test_packets_per_block_op() {
        let mut metrics = DriverMetrics::new();
        assert_eq!(metrics.packets_per_block_op(), 0.0);

        metrics.packets_sent = 6;
        metrics.blocks_created = 2;
        metrics.blocks_updated = 1;
        assert_eq!(metrics.packets_per_block_op(), 2.0);
    }

    #[test]
    fn test_complete_freezes_duration() {
        let mut metrics = DriverMetrics::new();
        metrics.complete();
        let first = metrics.duration();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(metrics.duration(), first);
    }

    #[test]
    fn test_export_text() {
        let mut metrics = DriverMetrics::new();
        metrics.reads = 3;
        metrics.bytes_written = 2048;
        metrics.cache = Some(CacheStats {
            capacity: 4,
            entries: 2,
            queries: 10,
            hits: 7,
        });

        let text = metrics.export_text();
        assert!(text.contains("reads=3\n"));
        assert!(text.contains("bytes_written=2048\n"));
        assert!(text.contains("cache_queries=10\n"));
        assert!(text.contains("cache_hits=7\n"));
    }
}
