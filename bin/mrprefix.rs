use std::path::PathBuf;

use anyhow::bail;
use clap::Parser;
use diskmr::mr::{MapReduce, MapReduceConfig};
use diskmr::mrapps::prefix::search_minimal_prefix;

#[derive(Parser)]
#[command(name = "mrprefix", about = "Find the shortest prefix length that tells every input line apart")]
struct Args {
    /// source file path
    src: PathBuf,
    /// number of threads to map
    mappers: usize,
    /// number of threads to reduce
    reducers: usize,
    #[arg(long, default_value = "./work/")]
    work: PathBuf,
    #[arg(long, default_value = "./out/")]
    out: PathBuf,
    /// JSON engine config; mapper and reducer counts from the command line win
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    max_prefix: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    if !args.src.exists() {
        bail!("source file {} does not exist", args.src.display());
    }

    let mut config = match &args.config {
        Some(path) => MapReduceConfig::load(path)?,
        None => MapReduceConfig::new(args.mappers, args.reducers).with_work_dir(&args.work),
    };
    config.mappers = args.mappers;
    config.reducers = args.reducers;

    let mut engine = MapReduce::with_config(config)?;
    let prefix_len = search_minimal_prefix(&mut engine, &args.src, &args.out, args.max_prefix).await?;
    println!("Minimal prefix length = {}", prefix_len);

    Ok(())
}
