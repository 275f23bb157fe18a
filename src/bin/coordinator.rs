use std::path::PathBuf;
use std::time::Duration;

use anyhow::ensure;
use structopt::StructOpt;

use mapred::{default_socket_path, Coordinator};

#[derive(StructOpt, Debug)]
#[structopt(name = env!("CARGO_PKG_NAME"), version = env!("CARGO_PKG_VERSION"), about = env!("CARGO_PKG_DESCRIPTION"), author = env!("CARGO_PKG_AUTHORS"))]
struct Opt {
    /// Unix socket to listen on; defaults to the per-user path in /var/tmp
    #[structopt(short, long, parse(from_os_str))]
    socket: Option<PathBuf>,

    /// Seconds an assigned task may run before it is handed to another worker
    #[structopt(short, long, default_value = "10")]
    timeout: u64,

    /// Number of reduce partitions
    #[structopt(long, default_value = "10")]
    nreduce: usize,

    /// Files to process, one map task each
    #[structopt(name = "FILE", parse(from_os_str))]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let opt = Opt::from_args();
    ensure!(!opt.files.is_empty(), "at least one input file is required");
    let socket = opt.socket.unwrap_or_else(default_socket_path);

    let coordinator = Coordinator::new(opt.files, opt.nreduce, Duration::from_secs(opt.timeout));
    let server = coordinator.clone();
    let server_socket = socket.clone();
    tokio::spawn(async move {
        if let Err(err) = server.listen(&server_socket).await {
            log::error!("rpc server failed: {}", err);
            std::process::exit(1);
        }
    });

    while !coordinator.done() {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    let _ = std::fs::remove_file(&socket);
    Ok(())
}
