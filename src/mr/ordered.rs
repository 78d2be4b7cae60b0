use std::path::PathBuf;

use super::Record;
use super::error::StoreError;
use super::store::{PartitionedStore, StoreMode};

/// Decides which partition each key of a key-sorted stream goes to.
///
/// Partitions are filled in index order, roughly `round(expected / N)`
/// records each, but a run of equal keys is never split: when the target
/// is reached in the middle of a run, the run keeps going into the current
/// partition and the excess is taken off the next partition's target.
/// The last partition takes whatever remains.
#[derive(Debug, Clone)]
pub struct Rollover {
    partitions: usize,
    target: usize,
    index: usize,
    count: usize,
    overflow: usize,
    pending: bool,
    previous: Option<String>,
}

impl Rollover {
    pub fn new(expected_count: usize, partitions: usize) -> Self {
        let target = if partitions == 0 {
            0
        } else {
            (expected_count as f64 / partitions as f64).round() as usize
        };
        Rollover {
            partitions,
            target,
            index: 0,
            count: 0,
            overflow: 0,
            pending: false,
            previous: None,
        }
    }

    pub fn target(&self) -> usize {
        self.target
    }

    /// Partition index of the next record, whose key must not be smaller
    /// than the previous one.
    pub fn place(&mut self, key: &str) -> usize {
        debug_assert!(
            self.previous.as_deref().is_none_or(|prev| prev <= key),
            "keys out of order: {:?} after {:?}",
            key,
            self.previous
        );

        if !self.pending
            && self.index + 1 < self.partitions
            && self.count >= self.target.saturating_sub(self.overflow)
        {
            self.pending = true;
            self.overflow = 0;
        }
        if self.pending {
            if self.previous.as_deref() != Some(key) {
                self.index += 1;
                self.pending = false;
                self.count = 0;
            } else {
                self.overflow += 1;
            }
        }

        match &mut self.previous {
            Some(prev) => {
                prev.clear();
                prev.push_str(key);
            }
            None => self.previous = Some(key.to_string()),
        }
        self.count += 1;
        self.index
    }
}

/// A write-only `PartitionedStore` fed with one globally key-sorted stream.
pub struct OrderedPartitionWriter {
    store: PartitionedStore,
    rollover: Rollover,
    counts: Vec<usize>,
}

impl OrderedPartitionWriter {
    pub async fn create(base: impl Into<PathBuf>, partitions: usize, expected_count: usize) -> Self {
        let store = PartitionedStore::open(base, partitions, StoreMode::Write).await;
        let rollover = Rollover::new(expected_count, partitions);
        log::debug!(
            "ordered writer: {} records over {} partitions, target {}",
            expected_count,
            partitions,
            rollover.target()
        );
        OrderedPartitionWriter {
            store,
            rollover,
            counts: vec![0; partitions],
        }
    }

    pub fn store(&self) -> &PartitionedStore {
        &self.store
    }

    /// Appends `record` to the partition chosen for its key and returns that
    /// partition's index.
    pub async fn sequential_write(&mut self, record: &Record) -> Result<usize, StoreError> {
        let index = self.rollover.place(&record.key);
        self.store.write(index, record).await?;
        self.counts[index] += 1;
        Ok(index)
    }

    /// Flushes all partitions and returns how many records each received.
    pub async fn finish(self) -> Result<Vec<usize>, StoreError> {
        self.store.finish().await?;
        Ok(self.counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_mr::{EMAILS, first_letters};

    fn partition(keys: &[&str], expected: usize, partitions: usize) -> Vec<Vec<String>> {
        let mut rollover = Rollover::new(expected, partitions);
        let mut out = vec![Vec::new(); partitions];
        for key in keys {
            out[rollover.place(key)].push(key.to_string());
        }
        out
    }

    #[test]
    fn target_rounds_half_away_from_zero() {
        assert_eq!(Rollover::new(30, 5).target(), 6);
        assert_eq!(Rollover::new(22, 3).target(), 7);
        assert_eq!(Rollover::new(5, 2).target(), 3);
        assert_eq!(Rollover::new(1, 4).target(), 0);
    }

    #[test]
    fn runs_longer_than_the_target_stay_together() {
        // Target is 2; the run of `a` overshoots it by 3, which leaves
        // nothing of the second partition's target, so `c` moves on.
        let parts = partition(&["a", "a", "a", "a", "a", "b", "c"], 7, 3);
        assert_eq!(parts, vec![vec!["a"; 5], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn last_partition_never_rolls_over() {
        let keys = ["a", "b", "c", "d", "e", "f", "g", "h"];
        let parts = partition(&keys, 2, 2);
        assert_eq!(parts[0], vec!["a"]);
        assert_eq!(parts[1].len(), 7);
    }

    #[test]
    fn no_key_spans_two_partitions() {
        // Deterministic pseudo-random sorted streams of varying skew.
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        for round in 0..200 {
            let len = 1 + (round * 7) % 90;
            let alphabet = 1 + round % 13;
            let mut keys: Vec<String> = (0..len)
                .map(|_| {
                    seed ^= seed << 13;
                    seed ^= seed >> 7;
                    seed ^= seed << 17;
                    format!("k{:02}", seed % alphabet as u64)
                })
                .collect();
            keys.sort();
            let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
            let partitions = 1 + round % 6;
            let parts = partition(&refs, len, partitions);

            let flattened: Vec<&String> = parts.iter().flatten().collect();
            assert_eq!(flattened.len(), keys.len());
            assert!(flattened.iter().zip(&keys).all(|(a, b)| *a == b), "order changed");
            for key in &keys {
                let holders = parts.iter().filter(|p| p.contains(key)).count();
                assert_eq!(holders, 1, "key {} split in round {}", key, round);
            }
        }
    }

    #[tokio::test]
    async fn rebalances_the_email_fixture() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("seq_test");

        let mut prefixes = first_letters(EMAILS);
        prefixes.sort();
        assert_eq!(prefixes.len(), 30);

        let mut writer = OrderedPartitionWriter::create(&base, 5, 30).await;
        for prefix in &prefixes {
            writer.sequential_write(&Record::new(prefix.as_str(), "1")).await.unwrap();
        }
        let counts = writer.finish().await.unwrap();
        assert_eq!(counts, vec![6, 8, 8, 4, 4]);

        let store = PartitionedStore::open(&base, 5, StoreMode::Read).await;
        let mut result = Vec::new();
        for i in 0..5 {
            let keys: Vec<String> = store.read_all(i).await.unwrap().into_iter().map(|r| r.key).collect();
            result.push(keys.concat());
        }
        assert_eq!(result, vec!["aaaaab", "degggggg", "ijklllll", "psss", "vvwy"]);
    }
}
