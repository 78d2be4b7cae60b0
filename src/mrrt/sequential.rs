use std::path::Path;

use anyhow::anyhow;

use crate::mr::split::{decode_line, split_file};
use crate::mr::{Callbacks, Combined, Record, Rollover};

/// Every intermediate partition of one in-memory run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stages {
    pub mapped: Vec<Vec<Record>>,
    pub combined: Vec<Vec<Record>>,
    pub shuffled: Vec<Vec<Record>>,
    pub reduced: Vec<Record>,
}

/// Runs the same pipeline as `MapReduce::run`, block split and partition
/// placement included, but in memory and on a single task.
pub async fn run(callbacks: &Callbacks, input: &Path, mappers: usize, reducers: usize) -> Result<Stages, anyhow::Error> {
    if reducers == 0 {
        return Err(anyhow!("reducer count must be positive"));
    }
    let blocks = split_file(input, mappers).await?;
    let contents = tokio::fs::read(input).await?;

    let mut mapped = Vec::with_capacity(blocks.len());
    for block in &blocks {
        let bytes = &contents[block.start as usize..block.end as usize];
        let mut records = bytes
            .split_inclusive(|&b| b == b'\n')
            .map(|raw| (callbacks.map)(&decode_line(raw.to_vec())))
            .collect::<Result<Vec<_>, _>>()?;
        records.sort_by(|a, b| a.key.cmp(&b.key));
        mapped.push(records);
    }

    let mut combined = Vec::with_capacity(mapped.len());
    for partition in &mapped {
        let mut out = Vec::new();
        let mut acc = None;
        for record in partition.iter().cloned() {
            match (callbacks.combine)(acc.take(), record)? {
                Combined::Absorbed(next) => acc = Some(next),
                Combined::Emit { record, accumulator } => {
                    out.push(record);
                    acc = Some(accumulator);
                }
            }
        }
        out.extend(acc);
        combined.push(out);
    }

    // A stable sort of the concatenation breaks key ties by source order,
    // exactly like the on-disk k-way merge.
    let mut merged: Vec<Record> = combined.iter().flatten().cloned().collect();
    merged.sort_by(|a, b| a.key.cmp(&b.key));
    let mut rollover = Rollover::new(merged.len(), reducers);
    let mut shuffled = vec![Vec::new(); reducers];
    for record in merged {
        shuffled[rollover.place(&record.key)].push(record);
    }

    let mut reduced = Vec::with_capacity(reducers);
    for partition in &shuffled {
        let mut acc = Record::default();
        for record in partition.iter().cloned() {
            acc = (callbacks.reduce)(acc, record)?;
        }
        reduced.push(acc);
    }

    Ok(Stages {
        mapped,
        combined,
        shuffled,
        reduced,
    })
}
