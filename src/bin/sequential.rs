use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use atomicwrites::{AllowOverwrite, AtomicFile};
use log::trace;
use structopt::StructOpt;

use mapred::{app, output_path, partition};

/// Runs a whole job in one process, producing the same `mr-out-<r>` files the
/// distributed path would. Useful as an oracle when debugging workers.
#[derive(StructOpt, Debug)]
#[structopt(name = env!("CARGO_PKG_NAME"), version = env!("CARGO_PKG_VERSION"), about = env!("CARGO_PKG_DESCRIPTION"), author = env!("CARGO_PKG_AUTHORS"))]
struct Opt {
    /// Directory outputs are written to
    #[structopt(short, long, default_value = ".", parse(from_os_str))]
    dir: PathBuf,

    /// Built-in application to run
    #[structopt(short, long, default_value = "wc")]
    app: String,

    /// Number of reduce partitions
    #[structopt(long, default_value = "10")]
    nreduce: usize,

    /// Files to process
    #[structopt(name = "FILE", parse(from_os_str))]
    files: Vec<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let opt = Opt::from_args();
    let app = app::named(&opt.app).with_context(|| format!("no app named `{}`", opt.app))?;

    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    for filename in &opt.files {
        let contents = fs::read_to_string(filename)
            .with_context(|| format!("reading {}", filename.display()))?;
        for kv in (app.map)(filename, &contents) {
            grouped.entry(kv.key).or_default().push(kv.value);
        }
    }

    let mut partitions: Vec<Vec<(String, String)>> = vec![Vec::new(); opt.nreduce];
    for (key, values) in &grouped {
        let out = (app.reduce)(key, values);
        partitions[partition(key, opt.nreduce)].push((key.clone(), out));
    }

    for (r, mut lines) in partitions.into_iter().enumerate() {
        lines.sort();
        let path = output_path(&opt.dir, r);
        AtomicFile::new(&path, AllowOverwrite).write(|f| {
            let mut buf = String::new();
            for (key, value) in &lines {
                buf.push_str(key);
                buf.push(' ');
                buf.push_str(value);
                buf.push('\n');
            }
            f.write_all(buf.as_bytes())
        })?;
        trace!("wrote {}", path.display());
    }
    Ok(())
}
