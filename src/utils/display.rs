//! Utilities related to displaying things.

use num_format::Locale;
use num_format::ToFormattedString;
use tracing::info;

/// Utility struct used to uniformly count and report the number of records processed.
pub struct RecordCounter {
    /// The number of records processed.
    count: usize,

    /// The number of records to log every.
    log_every: usize,
}

impl Default for RecordCounter {
    fn default() -> Self {
        RecordCounter {
            count: 0,
            log_every: 1_000_000,
        }
    }
}

impl RecordCounter {
    /// Creates a new `RecordCounter`.
    pub fn new(log_every: Option<usize>) -> Self {
        RecordCounter {
            count: 0,
            log_every: log_every.unwrap_or(1_000_000),
        }
    }

    /// Gets the current number of records counted via a copy.
    pub fn get(&self) -> usize {
        self.count
    }

    /// Increments the counter and reports the number of records processed (if
    /// appropriate).
    pub fn inc(&mut self) {
        self.count += 1;

        if self.count % self.log_every == 0 {
            info!(
                "  [*] Processed {} records.",
                self.count.to_formatted_string(&Locale::en),
            );
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    pub fn test_counting() {
        let mut counter = RecordCounter::new(Some(10));
        for _ in 0..25 {
            counter.inc();
        }

        assert_eq!(counter.get(), 25);
    }
}
