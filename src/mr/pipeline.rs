use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};

use super::config::{FailurePolicy, MapReduceConfig};
use super::error::{Stage, StageError};
use super::ordered::OrderedPartitionWriter;
use super::pool::run_tasks;
use super::split::{Block, decode_line, split_file};
use super::store::{PartitionedStore, StoreMode, partition_path};
use super::{Callbacks, Combined, Combiner, MRApp, Mapper, Record, Reducer};

/// Record counts observed at each stage of one `run`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub blocks: Vec<Block>,
    /// Records produced by all mappers.
    pub mapped: usize,
    /// Records emitted by all combiners.
    pub combined: usize,
    /// Records routed to each reducer partition.
    pub shuffled: Vec<usize>,
    /// Records folded by each reducer.
    pub reduced: Vec<usize>,
}

/// Single-machine MapReduce engine over line-oriented text input.
///
/// A run goes through four stages separated by full barriers: map (one task
/// per input block), combine (one task per mapper output), shuffle (one
/// k-way merge into key-ordered reducer partitions) and reduce (one task
/// per reducer partition). Stages hand data to each other through
/// `PartitionedStore`s in the working directory.
pub struct MapReduce {
    config: MapReduceConfig,
    mapper: Option<Mapper>,
    combiner: Option<Combiner>,
    reducer: Option<Reducer>,
}

impl MapReduce {
    pub fn new(mappers: usize, reducers: usize, work_dir: impl Into<PathBuf>) -> Result<Self, anyhow::Error> {
        Self::with_config(MapReduceConfig::new(mappers, reducers).with_work_dir(work_dir))
    }

    pub fn with_config(config: MapReduceConfig) -> Result<Self, anyhow::Error> {
        config.validate()?;
        std::fs::create_dir_all(&config.work_dir)
            .with_context(|| format!("cannot create work directory {}", config.work_dir.display()))?;
        Ok(MapReduce {
            config,
            mapper: None,
            combiner: None,
            reducer: None,
        })
    }

    pub fn config(&self) -> &MapReduceConfig {
        &self.config
    }

    pub fn set_mapper<F>(&mut self, mapper: F)
    where
        F: Fn(&str) -> Result<Record, anyhow::Error> + Send + Sync + 'static,
    {
        self.mapper = Some(Arc::new(mapper));
    }

    pub fn set_combiner<F>(&mut self, combiner: F)
    where
        F: Fn(Option<Record>, Record) -> Result<Combined, anyhow::Error> + Send + Sync + 'static,
    {
        self.combiner = Some(Arc::new(combiner));
    }

    pub fn set_reducer<F>(&mut self, reducer: F)
    where
        F: Fn(Record, Record) -> Result<Record, anyhow::Error> + Send + Sync + 'static,
    {
        self.reducer = Some(Arc::new(reducer));
    }

    pub fn set_app(&mut self, app: Arc<dyn MRApp>) {
        let Callbacks { map, combine, reduce } = Callbacks::from_app(app);
        self.mapper = Some(map);
        self.combiner = Some(combine);
        self.reducer = Some(reduce);
    }

    /// File-name prefix of the reducer outputs inside the output directory.
    pub fn output_filename(&self) -> &str {
        &self.config.store_names.reducer_out
    }

    pub fn output_path(&self, output_dir: impl AsRef<Path>, index: usize) -> PathBuf {
        partition_path(&output_dir.as_ref().join(self.output_filename()), index)
    }

    /// Runs the whole pipeline over `input`, leaving one record per reducer
    /// in `<output_dir>/<reducer_out><i>`.
    pub async fn run(&self, input: impl AsRef<Path>, output_dir: impl AsRef<Path>) -> Result<RunSummary, anyhow::Error> {
        let input = input.as_ref();
        let output_dir = output_dir.as_ref();
        let callbacks = self.callbacks()?;
        tokio::fs::create_dir_all(output_dir)
            .await
            .with_context(|| format!("cannot create output directory {}", output_dir.display()))?;

        let blocks = split_file(input, self.config.mappers)
            .await
            .with_context(|| format!("cannot split {}", input.display()))?;
        log::info!("split {} into {} blocks", input.display(), blocks.len());

        let mapped = self.run_mappers(&blocks, input, &callbacks.map).await.context("map stage failed")?;
        log::info!("map stage done: {} records", mapped);

        let combined = self.run_combiners(&callbacks.combine).await.context("combine stage failed")?;
        log::info!("combine stage done: {} records", combined);

        let shuffled = self.run_shuffler(combined).await.context("shuffle stage failed")?;
        log::info!("shuffle stage done: {:?} records per reducer", shuffled);

        let reduced = self
            .run_reducers(output_dir, &callbacks.reduce)
            .await
            .context("reduce stage failed")?;
        log::info!("reduce stage done, results in {}", output_dir.display());

        Ok(RunSummary {
            blocks,
            mapped,
            combined,
            shuffled,
            reduced,
        })
    }

    fn callbacks(&self) -> Result<Callbacks, anyhow::Error> {
        Ok(Callbacks {
            map: self.mapper.clone().ok_or_else(|| anyhow!("no mapper configured"))?,
            combine: self.combiner.clone().ok_or_else(|| anyhow!("no combiner configured"))?,
            reduce: self.reducer.clone().ok_or_else(|| anyhow!("no reducer configured"))?,
        })
    }

    fn policy(&self) -> FailurePolicy {
        self.config.failure_policy
    }

    fn store_path(&self, name: &str) -> PathBuf {
        self.config.work_path(name)
    }

    /// Under `Propagate`, refuses to start a stage on a store with
    /// partitions that failed to open.
    async fn check_store(&self, store: &PartitionedStore) -> Result<(), StageError> {
        if self.policy() == FailurePolicy::Propagate {
            store.ensure_open().await?;
        }
        Ok(())
    }

    /// Applies the failure policy to every task result of a stage. Task `i`
    /// writes partition `i` of `sink`; when its failure is tolerated that
    /// partition is discarded, so the zero count matches what is on disk.
    async fn settle_tasks(
        &self,
        stage: Stage,
        sink: &PartitionedStore,
        results: Vec<Result<usize, StageError>>,
    ) -> Result<Vec<usize>, StageError> {
        let mut counts = Vec::with_capacity(results.len());
        for (index, res) in results.into_iter().enumerate() {
            let failed = res.is_err();
            counts.push(self.policy().settle(stage, res)?);
            if failed {
                log::warn!("{} task {} failed, discarding {}", stage, index, sink.path(index).display());
                self.policy().settle(stage, sink.discard(index).await.map_err(StageError::from))?;
            }
        }
        Ok(counts)
    }

    async fn run_mappers(&self, blocks: &[Block], input: &Path, map: &Mapper) -> Result<usize, StageError> {
        let names = &self.config.store_names;
        let sink = Arc::new(
            PartitionedStore::open(self.store_path(&names.mapper_out), blocks.len(), StoreMode::Write).await,
        );
        self.check_store(&sink).await?;

        let jobs = blocks.iter().copied().enumerate().map(|(i, block)| {
            let sink = sink.clone();
            let map = map.clone();
            let input = input.to_path_buf();
            async move {
                let mut records = map_block(&input, block, &map).await?;
                records.sort_by(|a, b| a.key.cmp(&b.key));
                sink.write_all(i, &records).await?;
                log::debug!("mapper {} produced {} records", i, records.len());
                Ok::<_, StageError>(records.len())
            }
        });
        let counts = run_tasks(self.config.concurrency(blocks.len()), jobs).await;
        let counts = self.settle_tasks(Stage::Map, &sink, counts).await?;
        self.policy().settle(Stage::Map, sink.finish().await.map_err(StageError::from))?;
        Ok(counts.iter().sum())
    }

    async fn run_combiners(&self, combine: &Combiner) -> Result<usize, StageError> {
        let names = &self.config.store_names;
        let partitions = self.config.mappers;
        let source = Arc::new(
            PartitionedStore::open(self.store_path(&names.mapper_out), partitions, StoreMode::Read).await,
        );
        let sink = Arc::new(
            PartitionedStore::open(self.store_path(&names.combiner_out), partitions, StoreMode::Write).await,
        );
        self.check_store(&source).await?;
        self.check_store(&sink).await?;

        let policy = self.policy();
        let jobs = (0..partitions).map(|i| {
            let source = source.clone();
            let sink = sink.clone();
            let combine = combine.clone();
            async move {
                let mut accumulator: Option<Record> = None;
                let mut emitted = 0;
                while let Some(record) = next_record(&source, i, policy, Stage::Combine).await? {
                    let step = combine(accumulator.take(), record)
                        .map_err(|err| StageError::callback(Stage::Combine, err))?;
                    match step {
                        Combined::Absorbed(acc) => accumulator = Some(acc),
                        Combined::Emit { record, accumulator: acc } => {
                            sink.write(i, &record).await?;
                            emitted += 1;
                            accumulator = Some(acc);
                        }
                    }
                }
                if let Some(acc) = accumulator {
                    sink.write(i, &acc).await?;
                    emitted += 1;
                }
                log::debug!("combiner {} emitted {} records", i, emitted);
                Ok::<_, StageError>(emitted)
            }
        });
        let counts = run_tasks(self.config.concurrency(partitions), jobs).await;
        let counts = self.settle_tasks(Stage::Combine, &sink, counts).await?;
        self.policy().settle(Stage::Combine, sink.finish().await.map_err(StageError::from))?;
        Ok(counts.iter().sum())
    }

    /// Merges the key-sorted combiner outputs into `reducers` key-ordered
    /// partitions sized after `expected` records.
    async fn run_shuffler(&self, expected: usize) -> Result<Vec<usize>, StageError> {
        let names = &self.config.store_names;
        let policy = self.policy();
        let sources =
            PartitionedStore::open(self.store_path(&names.combiner_out), self.config.mappers, StoreMode::Read).await;
        let mut writer =
            OrderedPartitionWriter::create(self.store_path(&names.reducer_in), self.config.reducers, expected).await;
        self.check_store(&sources).await?;
        self.check_store(writer.store()).await?;

        let mut heap = BinaryHeap::with_capacity(sources.len());
        for source in 0..sources.len() {
            match next_record(&sources, source, policy, Stage::Shuffle).await? {
                Some(record) => heap.push(Cursor { record, source }),
                None => sources.close(source).await?,
            }
        }

        while let Some(Cursor { record, source }) = heap.pop() {
            policy.settle(
                Stage::Shuffle,
                writer.sequential_write(&record).await.map(|_| ()).map_err(StageError::from),
            )?;
            match next_record(&sources, source, policy, Stage::Shuffle).await? {
                Some(record) => heap.push(Cursor { record, source }),
                None => {
                    log::debug!("shuffle source {} exhausted", source);
                    sources.close(source).await?;
                }
            }
        }

        match writer.finish().await {
            Ok(counts) => Ok(counts),
            Err(err) => policy
                .settle(Stage::Shuffle, Err::<(), _>(err.into()))
                .map(|()| vec![0; self.config.reducers]),
        }
    }

    async fn run_reducers(&self, output_dir: &Path, reduce: &Reducer) -> Result<Vec<usize>, StageError> {
        let names = &self.config.store_names;
        let partitions = self.config.reducers;
        let source =
            Arc::new(PartitionedStore::open(self.store_path(&names.reducer_in), partitions, StoreMode::Read).await);
        let sink =
            Arc::new(PartitionedStore::open(output_dir.join(&names.reducer_out), partitions, StoreMode::Write).await);
        self.check_store(&source).await?;
        self.check_store(&sink).await?;

        let policy = self.policy();
        let jobs = (0..partitions).map(|i| {
            let source = source.clone();
            let sink = sink.clone();
            let reduce = reduce.clone();
            async move {
                let mut accumulator = Record::default();
                let mut folded = 0;
                while let Some(record) = next_record(&source, i, policy, Stage::Reduce).await? {
                    accumulator =
                        reduce(accumulator, record).map_err(|err| StageError::callback(Stage::Reduce, err))?;
                    folded += 1;
                }
                sink.write(i, &accumulator).await?;
                log::debug!("reducer {} folded {} records", i, folded);
                Ok::<_, StageError>(folded)
            }
        });
        let counts = run_tasks(self.config.concurrency(partitions), jobs).await;
        let counts = self.settle_tasks(Stage::Reduce, &sink, counts).await?;
        self.policy().settle(Stage::Reduce, sink.finish().await.map_err(StageError::from))?;
        Ok(counts)
    }
}

/// Reads the next record of a partition; under `Tolerate` a failed read
/// ends the partition instead of the stage.
async fn next_record(
    store: &PartitionedStore,
    index: usize,
    policy: FailurePolicy,
    stage: Stage,
) -> Result<Option<Record>, StageError> {
    policy.settle(stage, store.read(index).await.map_err(StageError::from))
}

/// Runs `map` over every line of `block`. A final line without a newline
/// (only possible in the last block) is mapped too.
async fn map_block(input: &Path, block: Block, map: &Mapper) -> Result<Vec<Record>, StageError> {
    let mut file = File::open(input).await.map_err(StageError::Input)?;
    file.seek(SeekFrom::Start(block.start)).await.map_err(StageError::Input)?;
    let mut reader = BufReader::new(file).take(block.len());

    let mut records = Vec::new();
    loop {
        let mut raw = Vec::new();
        let n = reader.read_until(b'\n', &mut raw).await.map_err(StageError::Input)?;
        if n == 0 {
            break;
        }
        let line = decode_line(raw);
        records.push(map(&line).map_err(|err| StageError::callback(Stage::Map, err))?);
    }
    Ok(records)
}

/// Head of one shuffle source. Ordered so that `BinaryHeap` pops the
/// smallest key first, and among equal keys the lowest source index.
struct Cursor {
    record: Record,
    source: usize,
}

impl Ord for Cursor {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .record
            .key
            .cmp(&self.record.key)
            .then_with(|| other.source.cmp(&self.source))
    }
}

impl PartialOrd for Cursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Cursor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Cursor {}
