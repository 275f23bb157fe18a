use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;

use mapred::app::wc;
use mapred::{output_path, shard_path, Coordinator, GetTaskReply, Worker};

fn write_inputs(dir: &Path, contents: &[&str]) -> Vec<PathBuf> {
    contents
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let path = dir.join(format!("input-{}.txt", i));
            fs::write(&path, text).unwrap();
            path
        })
        .collect()
}

fn spawn_coordinator(dir: &Path, files: Vec<PathBuf>, n_reduce: usize, timeout: Duration) -> (Coordinator, PathBuf) {
    let socket = dir.join("coordinator.sock");
    let coordinator = Coordinator::new(files, n_reduce, timeout);
    let server = coordinator.clone();
    let server_socket = socket.clone();
    tokio::spawn(async move {
        let _ = server.listen(&server_socket).await;
    });
    (coordinator, socket)
}

async fn run_workers(dir: &Path, socket: &Path, count: usize) {
    let mut handles = Vec::new();
    for _ in 0..count {
        let worker = Worker {
            dir: dir.to_path_buf(),
            socket: socket.to_path_buf(),
            map: wc::map,
            reduce: wc::reduce,
        };
        handles.push(tokio::spawn(async move { worker.launch().await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn single_file_word_count() {
    let _ = pretty_env_logger::try_init();
    let temp = TempDir::new().unwrap();
    let files = write_inputs(temp.path(), &["a b a"]);

    let (coordinator, socket) = spawn_coordinator(temp.path(), files, 1, Duration::from_secs(10));
    run_workers(temp.path(), &socket, 1).await;

    assert!(coordinator.done());
    let out = fs::read_to_string(output_path(temp.path(), 0)).unwrap();
    assert_eq!(out, "a 2\nb 1\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn two_files_two_partitions() {
    let _ = pretty_env_logger::try_init();
    let temp = TempDir::new().unwrap();
    let files = write_inputs(temp.path(), &["a", "b"]);

    let (coordinator, socket) = spawn_coordinator(temp.path(), files, 2, Duration::from_secs(10));
    run_workers(temp.path(), &socket, 2).await;
    assert!(coordinator.done());

    // fnv1a("a") lands in partition 0, fnv1a("b") in partition 1.
    let shard = |i, r| fs::read_to_string(shard_path(temp.path(), i, r)).unwrap();
    assert_eq!(shard(0, 0), "{\"Key\":\"a\",\"Value\":\"1\"}\n");
    assert_eq!(shard(0, 1), "");
    assert_eq!(shard(1, 0), "");
    assert_eq!(shard(1, 1), "{\"Key\":\"b\",\"Value\":\"1\"}\n");

    assert_eq!(
        fs::read_to_string(output_path(temp.path(), 0)).unwrap(),
        "a 1\n"
    );
    assert_eq!(
        fs::read_to_string(output_path(temp.path(), 1)).unwrap(),
        "b 1\n"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn matches_sequential_evaluation() {
    let _ = pretty_env_logger::try_init();
    let temp = TempDir::new().unwrap();
    let files = write_inputs(
        temp.path(),
        &[
            "the quick brown fox jumps over the lazy dog",
            "the dog barks and the fox runs",
            "quick quick slow",
            "",
        ],
    );

    let (coordinator, socket) =
        spawn_coordinator(temp.path(), files.clone(), 3, Duration::from_secs(10));
    run_workers(temp.path(), &socket, 4).await;
    assert!(coordinator.done());

    // Collect the distributed result across every output shard.
    let mut result = HashMap::new();
    for r in 0..3 {
        let out = fs::read_to_string(output_path(temp.path(), r)).unwrap();
        for line in out.lines() {
            let (key, value) = line.split_once(' ').unwrap();
            let previous = result.insert(key.to_owned(), value.to_owned());
            assert!(previous.is_none(), "key {} appears in two shards", key);
        }
    }

    // The same job evaluated sequentially.
    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    for filename in &files {
        let contents = fs::read_to_string(filename).unwrap();
        for kv in wc::map(filename, &contents) {
            grouped.entry(kv.key).or_default().push(kv.value);
        }
    }
    let expected: HashMap<String, String> = grouped
        .iter()
        .map(|(key, values)| (key.clone(), wc::reduce(key, values)))
        .collect();

    assert_eq!(result, expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn straggler_does_not_block_completion() {
    let _ = pretty_env_logger::try_init();
    let temp = TempDir::new().unwrap();
    let files = write_inputs(temp.path(), &["a b a", "c"]);

    let (coordinator, socket) =
        spawn_coordinator(temp.path(), files, 1, Duration::from_millis(500));

    // Take an assignment and sit on it, like a worker that crashed mid-map.
    assert!(matches!(coordinator.get_task(), GetTaskReply::Assigned(_)));

    run_workers(temp.path(), &socket, 1).await;
    assert!(coordinator.done());

    let out = fs::read_to_string(output_path(temp.path(), 0)).unwrap();
    assert_eq!(out, "a 2\nb 1\nc 1\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn output_shards_are_sorted_by_key() {
    let _ = pretty_env_logger::try_init();
    let temp = TempDir::new().unwrap();
    let files = write_inputs(temp.path(), &["pear apple orange apple banana"]);

    let (coordinator, socket) = spawn_coordinator(temp.path(), files, 1, Duration::from_secs(10));
    run_workers(temp.path(), &socket, 1).await;
    assert!(coordinator.done());

    let out = fs::read_to_string(output_path(temp.path(), 0)).unwrap();
    let keys: Vec<&str> = out
        .lines()
        .map(|line| line.split_once(' ').unwrap().0)
        .collect();
    let mut sorted = keys.clone();
    sorted.sort_unstable();
    assert_eq!(keys, sorted);
}
