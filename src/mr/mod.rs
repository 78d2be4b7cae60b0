use std::sync::Arc;

pub mod config;
pub mod error;
pub mod ordered;
pub mod pipeline;
pub mod pool;
pub mod split;
pub mod store;

pub use config::{FailurePolicy, MapReduceConfig, StoreNames};
pub use error::{Stage, StageError, StoreError};
pub use ordered::{OrderedPartitionWriter, Rollover};
pub use pipeline::{MapReduce, RunSummary};
pub use store::{PartitionedStore, StoreMode};

/// A key/value pair, the unit of data flowing between stages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Record {
    pub key: String,
    pub value: String,
}

impl Record {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Record {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Outcome of feeding one record into a combine step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Combined {
    /// The input was folded in; keep going with this accumulator.
    Absorbed(Record),
    /// The previous span ended: write `record`, continue with `accumulator`.
    Emit { record: Record, accumulator: Record },
}

pub type Mapper = Arc<dyn Fn(&str) -> Result<Record, anyhow::Error> + Send + Sync>;
pub type Combiner =
    Arc<dyn Fn(Option<Record>, Record) -> Result<Combined, anyhow::Error> + Send + Sync>;
pub type Reducer = Arc<dyn Fn(Record, Record) -> Result<Record, anyhow::Error> + Send + Sync>;

/// An application bundling the three callbacks a job needs.
pub trait MRApp: Send + Sync {
    /// Turns one input line (without its terminator) into a record.
    fn map(&self, line: &str) -> Result<Record, anyhow::Error>;

    /// Folds `input` into the running accumulator of a key-sorted stream.
    /// `accumulator` is `None` for the first record of the stream.
    fn combine(&self, accumulator: Option<Record>, input: Record) -> Result<Combined, anyhow::Error>;

    /// Folds `input` into a reducer partition's accumulator, which starts
    /// as `Record::default()`.
    fn reduce(&self, accumulator: Record, input: Record) -> Result<Record, anyhow::Error>;
}

#[derive(Clone)]
pub struct Callbacks {
    pub map: Mapper,
    pub combine: Combiner,
    pub reduce: Reducer,
}

impl Callbacks {
    pub fn from_app(app: Arc<dyn MRApp>) -> Self {
        let map = {
            let app = app.clone();
            Arc::new(move |line: &str| app.map(line)) as Mapper
        };
        let combine = {
            let app = app.clone();
            Arc::new(move |acc: Option<Record>, input: Record| app.combine(acc, input)) as Combiner
        };
        let reduce = Arc::new(move |acc: Record, input: Record| app.reduce(acc, input)) as Reducer;
        Callbacks { map, combine, reduce }
    }
}
