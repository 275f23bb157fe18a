use std::path::PathBuf;

use anyhow::Context;
use structopt::StructOpt;

use mapred::{app, default_socket_path, Worker};

#[derive(StructOpt, Debug)]
#[structopt(name = env!("CARGO_PKG_NAME"), version = env!("CARGO_PKG_VERSION"), about = env!("CARGO_PKG_DESCRIPTION"), author = env!("CARGO_PKG_AUTHORS"))]
struct Opt {
    /// Unix socket the coordinator listens on
    #[structopt(short, long, parse(from_os_str))]
    socket: Option<PathBuf>,

    /// Directory intermediate shards and outputs are written to
    #[structopt(short, long, default_value = ".", parse(from_os_str))]
    dir: PathBuf,

    /// Built-in application to run
    #[structopt(short, long, default_value = "wc")]
    app: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let opt = Opt::from_args();
    let app = app::named(&opt.app).with_context(|| format!("no app named `{}`", opt.app))?;
    let worker = Worker {
        dir: opt.dir,
        socket: opt.socket.unwrap_or_else(default_socket_path),
        map: app.map,
        reduce: app.reduce,
    };
    worker.launch().await
}
