use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub mod app;
pub mod coordinator;
pub mod worker;

pub use coordinator::Coordinator;
pub use worker::Worker;

/// The RPC surface between the coordinator and its workers.
#[tarpc::service]
pub trait TaskService {
    async fn get_task() -> GetTaskReply;
    async fn report_done(report: CompletionReport) -> Result<(), String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    Map,
    Reduce,
}

/// Everything a worker needs to run one task. Reduce tasks carry no
/// filename; their inputs follow from the shard naming scheme and `n_map`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub kind: TaskKind,
    pub index: usize,
    pub filename: Option<PathBuf>,
    pub n_map: usize,
    pub n_reduce: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GetTaskReply {
    Assigned(TaskAssignment),
    /// Nothing to hand out right now, but the job is not finished; poll again.
    Wait,
    AllDone,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CompletionReport {
    pub kind: TaskKind,
    pub index: usize,
}

/// One record emitted by a map function. The capitalized field names are part
/// of the intermediate file contract: shards are JSON objects, one per line,
/// of the shape `{"Key": "...", "Value": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value")]
    pub value: String,
}

/// Picks the reduce partition for a key. Both sides of the shuffle must agree
/// on this, so it is a fixed FNV-1a rather than `DefaultHasher`, masked to 31
/// bits to stay non-negative.
pub fn partition(key: &str, n_reduce: usize) -> usize {
    (fnv1a(key.as_bytes()) & 0x7fff_ffff) as usize % n_reduce
}

fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &b in bytes {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(16_777_619);
    }
    hash
}

/// Intermediate shard written by map task `map_index` for partition
/// `reduce_index`.
pub fn shard_path(dir: &Path, map_index: usize, reduce_index: usize) -> PathBuf {
    dir.join(format!("mr-{}-{}", map_index, reduce_index))
}

/// Final output shard for partition `reduce_index`.
pub fn output_path(dir: &Path, reduce_index: usize) -> PathBuf {
    dir.join(format!("mr-out-{}", reduce_index))
}

/// Per-user socket the coordinator listens on, e.g. `/var/tmp/mr-1000`.
pub fn default_socket_path() -> PathBuf {
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/var/tmp/mr-{}", uid))
}
