use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use atomicwrites::{AllowOverwrite, AtomicFile};
use log::{debug, info, warn};
use tarpc::{client, context, tokio_serde::formats::Json};

use crate::{
    output_path, partition, shard_path, CompletionReport, GetTaskReply, KeyValue, TaskAssignment,
    TaskKind, TaskServiceClient,
};

pub type MapFn = fn(&Path, &str) -> Vec<KeyValue>;
pub type ReduceFn = fn(&str, &[String]) -> String;

const WAIT_BACKOFF: Duration = Duration::from_secs(1);
const DIAL_ATTEMPTS: usize = 5;
const DIAL_BACKOFF: Duration = Duration::from_millis(500);

/// One worker process. Stateless between tasks: everything it needs arrives
/// in the assignment, and everything it produces lands in `dir`.
pub struct Worker {
    pub dir: PathBuf,
    pub socket: PathBuf,
    pub map: MapFn,
    pub reduce: ReduceFn,
}

impl Worker {
    /// Polls the coordinator until it answers `AllDone`. Task failures are
    /// local: the task is abandoned without a report and the coordinator's
    /// timer hands it to someone else.
    pub async fn launch(&self) -> Result<()> {
        let mut client = connect_with_retry(&self.socket).await?;
        loop {
            let reply = match client.get_task(context::current()).await {
                Ok(reply) => reply,
                Err(err) => {
                    warn!("get_task failed ({}), reconnecting", err);
                    client = connect_with_retry(&self.socket).await?;
                    continue;
                }
            };
            let task = match reply {
                GetTaskReply::AllDone => {
                    info!("no work left, exiting");
                    return Ok(());
                }
                GetTaskReply::Wait => {
                    tokio::time::sleep(WAIT_BACKOFF).await;
                    continue;
                }
                GetTaskReply::Assigned(task) => task,
            };
            let outcome = match task.kind {
                TaskKind::Map => self.run_map(&task),
                TaskKind::Reduce => self.run_reduce(&task),
            };
            if let Err(err) = outcome {
                warn!("{:?} task {} abandoned: {:#}", task.kind, task.index, err);
                continue;
            }
            let report = CompletionReport {
                kind: task.kind,
                index: task.index,
            };
            match client.report_done(context::current(), report).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => bail!("coordinator rejected completion report: {}", err),
                Err(err) => {
                    // If the report was lost the coordinator's timer will
                    // reassign; a duplicate completion is harmless.
                    warn!("report_done failed ({}), reconnecting", err);
                    client = connect_with_retry(&self.socket).await?;
                }
            }
        }
    }

    fn run_map(&self, task: &TaskAssignment) -> Result<()> {
        let filename = task
            .filename
            .as_deref()
            .context("map assignment carries no input file")?;
        let contents = fs::read_to_string(filename)
            .with_context(|| format!("reading {}", filename.display()))?;
        let pairs = (self.map)(filename, &contents);

        let mut buckets: Vec<Vec<KeyValue>> = vec![Vec::new(); task.n_reduce];
        for kv in pairs {
            let r = partition(&kv.key, task.n_reduce);
            buckets[r].push(kv);
        }

        // Every shard is published whole or not at all; a crash mid-write
        // leaves only an unlinked temporary behind.
        for (r, bucket) in buckets.iter().enumerate() {
            let path = shard_path(&self.dir, task.index, r);
            AtomicFile::new(&path, AllowOverwrite)
                .write(|f| {
                    let mut w = BufWriter::new(f);
                    for kv in bucket {
                        serde_json::to_writer(&mut w, kv).map_err(io::Error::from)?;
                        w.write_all(b"\n")?;
                    }
                    w.flush()
                })
                .with_context(|| format!("publishing {}", path.display()))?;
        }
        debug!("map task {} wrote {} shards", task.index, task.n_reduce);
        Ok(())
    }

    fn run_reduce(&self, task: &TaskAssignment) -> Result<()> {
        // By the phase contract every map output exists before a reduce task
        // is handed out, so a missing shard is an error, not an empty input.
        let mut pairs = Vec::new();
        for i in 0..task.n_map {
            let path = shard_path(&self.dir, i, task.index);
            let file =
                File::open(&path).with_context(|| format!("opening shard {}", path.display()))?;
            let reader = BufReader::new(file);
            for record in serde_json::Deserializer::from_reader(reader).into_iter::<KeyValue>() {
                pairs.push(record.with_context(|| format!("decoding {}", path.display()))?);
            }
        }
        pairs.sort_by(|a, b| a.key.cmp(&b.key));

        let path = output_path(&self.dir, task.index);
        let reduce = self.reduce;
        AtomicFile::new(&path, AllowOverwrite)
            .write(|f| {
                let mut w = BufWriter::new(f);
                let mut i = 0;
                while i < pairs.len() {
                    let mut j = i + 1;
                    while j < pairs.len() && pairs[j].key == pairs[i].key {
                        j += 1;
                    }
                    let values: Vec<String> =
                        pairs[i..j].iter().map(|kv| kv.value.clone()).collect();
                    let out = reduce(&pairs[i].key, &values);
                    writeln!(w, "{} {}", pairs[i].key, out)?;
                    i = j;
                }
                w.flush()
            })
            .with_context(|| format!("publishing {}", path.display()))?;
        debug!("reduce task {} wrote {}", task.index, path.display());
        Ok(())
    }
}

async fn connect_with_retry(socket: &Path) -> Result<TaskServiceClient> {
    let mut attempt = 1;
    loop {
        match tarpc::serde_transport::unix::connect(socket, Json::default).await {
            Ok(transport) => {
                return Ok(TaskServiceClient::new(client::Config::default(), transport).spawn());
            }
            Err(err) if attempt < DIAL_ATTEMPTS => {
                warn!(
                    "dial {} failed ({}), attempt {}/{}",
                    socket.display(),
                    err,
                    attempt,
                    DIAL_ATTEMPTS
                );
                tokio::time::sleep(DIAL_BACKOFF).await;
                attempt += 1;
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("dialing coordinator at {}", socket.display()));
            }
        }
    }
}
