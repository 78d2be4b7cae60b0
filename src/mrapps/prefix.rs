use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, anyhow};

use crate::mr::{Combined, MRApp, MapReduce, PartitionedStore, Record, StoreMode};

/// Checks whether the first `prefix_len` characters (lowercased) of every
/// line are distinct.
///
/// Each reducer folds its partition into `(key, true)` while all keys seen
/// so far were unique, and `(false, false)` as soon as one repeats.
pub struct MinimalPrefix {
    prefix_len: usize,
}

impl MinimalPrefix {
    pub fn new(prefix_len: usize) -> Self {
        MinimalPrefix { prefix_len }
    }
}

fn count(value: &str) -> Result<u64, anyhow::Error> {
    value.parse().with_context(|| format!("not a count: {:?}", value))
}

impl MRApp for MinimalPrefix {
    fn map(&self, line: &str) -> Result<Record, anyhow::Error> {
        let prefix: String = line.trim_end().chars().take(self.prefix_len).collect();
        Ok(Record::new(prefix.to_lowercase(), "1"))
    }

    fn combine(&self, accumulator: Option<Record>, input: Record) -> Result<Combined, anyhow::Error> {
        match accumulator {
            None => Ok(Combined::Absorbed(input)),
            Some(mut acc) if acc.key == input.key => {
                acc.value = (count(&acc.value)? + count(&input.value)?).to_string();
                Ok(Combined::Absorbed(acc))
            }
            Some(acc) => Ok(Combined::Emit {
                record: acc,
                accumulator: input,
            }),
        }
    }

    fn reduce(&self, accumulator: Record, input: Record) -> Result<Record, anyhow::Error> {
        let still_unique = accumulator.value.is_empty() || accumulator.value == "true";
        if still_unique && input.key != accumulator.key && count(&input.value)? <= 1 {
            Ok(Record::new(input.key, "true"))
        } else {
            Ok(Record::new("false", "false"))
        }
    }
}

/// Runs `engine` with growing prefix lengths until no reducer reports a
/// repeated prefix, and returns that length.
///
/// The search stops with an error past `max_len`, which defaults to the
/// length of the longest line: beyond it prefixes cannot change, so
/// duplicate lines never become distinguishable.
pub async fn search_minimal_prefix(
    engine: &mut MapReduce,
    input: &Path,
    output_dir: &Path,
    max_len: Option<usize>,
) -> Result<usize, anyhow::Error> {
    let max_len = match max_len {
        Some(len) => len,
        None => longest_line(input).await?.max(1),
    };

    for prefix_len in 1..=max_len {
        engine.set_app(Arc::new(MinimalPrefix::new(prefix_len)));
        engine.run(input, output_dir).await?;
        if all_distinct(engine, output_dir).await? {
            log::info!("prefix length {} distinguishes every line", prefix_len);
            return Ok(prefix_len);
        }
        log::info!("prefix length {} is ambiguous", prefix_len);
    }
    Err(anyhow!("no prefix of length up to {} distinguishes every line", max_len))
}

async fn all_distinct(engine: &MapReduce, output_dir: &Path) -> Result<bool, anyhow::Error> {
    let reducers = engine.config().reducers;
    let out = PartitionedStore::open(output_dir.join(engine.output_filename()), reducers, StoreMode::Read).await;
    for i in 0..reducers {
        if let Some(record) = out.read(i).await? {
            if record.value == "false" {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

async fn longest_line(input: &Path) -> Result<usize, anyhow::Error> {
    let contents = tokio::fs::read(input)
        .await
        .with_context(|| format!("cannot read {}", input.display()))?;
    Ok(String::from_utf8_lossy(&contents)
        .lines()
        .map(|line| line.trim_end().chars().count())
        .max()
        .unwrap_or(0))
}
