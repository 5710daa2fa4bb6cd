mod bgp;
mod context;

use bgp::Bgp;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Arg {
    #[arg(short, long, help = "BGP listen port", default_value_t = bgp::BGP_PORT)]
    port: u16,

    #[arg(
        long,
        help = "Table partition count (defaults to the CPU count)",
        default_value_t = 0
    )]
    partitions: usize,
}

fn tracing_set() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let arg = Arg::parse();
    tracing_set();

    let partitions = if arg.partitions > 0 {
        arg.partitions
    } else {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    };

    let mut speaker = Bgp::new(partitions);
    speaker.port = arg.port;

    // The config provider (an external process in production, tests and
    // tools here) feeds neighbor, instance and protocol records through
    // this channel.
    let _config_tx = speaker.cm.tx.clone();

    tracing::info!("fabricd started");
    speaker.event_loop().await;

    Ok(())
}
