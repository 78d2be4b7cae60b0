use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use diskmr::mr::Callbacks;
use diskmr::mrrt::sequential;

#[derive(Parser)]
#[command(name = "mrsequential")]
struct Args {
    app: String,
    input: PathBuf,
    #[arg(long, default_value_t = 1)]
    prefix: usize,
    #[arg(long, default_value_t = 1)]
    mappers: usize,
    #[arg(long, default_value_t = 1)]
    reducers: usize,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt::init();
    let args = Args::try_parse()?;

    println!("app: {}, input: {}", args.app, args.input.display());
    let app = diskmr::mrapps::get_app(args.app, args.prefix)?;
    let callbacks = Callbacks::from_app(Arc::from(app));

    let stages = sequential::run(&callbacks, &args.input, args.mappers, args.reducers).await?;
    for (i, (record, partition)) in stages.reduced.iter().zip(&stages.shuffled).enumerate() {
        println!("reducer {} ({} records): {} {}", i, partition.len(), record.key, record.value);
    }

    Ok(())
}
