use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{future, prelude::*};
use log::{debug, info, warn};
use tarpc::{
    context,
    server::{self, Channel},
    tokio_serde::formats::Json,
};
use tokio::task::AbortHandle;

use crate::{CompletionReport, GetTaskReply, TaskAssignment, TaskKind, TaskService};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Map,
    Reduce,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskStatus {
    Idle,
    InProgress,
    Completed,
}

struct MapTask {
    filename: PathBuf,
    status: TaskStatus,
    timer: Option<AbortHandle>,
}

struct ReduceTask {
    status: TaskStatus,
    timer: Option<AbortHandle>,
}

// All mutable scheduling state, guarded by one mutex. The in-progress and
// completed counters are derivable from the task vectors but keep the
// phase-boundary checks O(1).
struct Scheduler {
    phase: Phase,
    map_tasks: Vec<MapTask>,
    reduce_tasks: Vec<ReduceTask>,
    map_in_progress: usize,
    map_completed: usize,
    reduce_in_progress: usize,
    reduce_completed: usize,
}

impl Scheduler {
    fn new(files: Vec<PathBuf>) -> Scheduler {
        Scheduler {
            phase: Phase::Map,
            map_tasks: files
                .into_iter()
                .map(|filename| MapTask {
                    filename,
                    status: TaskStatus::Idle,
                    timer: None,
                })
                .collect(),
            reduce_tasks: Vec::new(),
            map_in_progress: 0,
            map_completed: 0,
            reduce_in_progress: 0,
            reduce_completed: 0,
        }
    }

    // Phase transitions are strictly forward and happen only here.
    fn advance(&mut self) {
        if self.phase == Phase::Map && self.map_completed == self.map_tasks.len() {
            self.phase = Phase::Reduce;
            info!(
                "all {} map tasks done, entering reduce phase",
                self.map_tasks.len()
            );
        }
        if self.phase == Phase::Reduce && self.reduce_completed == self.reduce_tasks.len() {
            self.phase = Phase::Done;
            info!(
                "all {} reduce tasks done, job finished",
                self.reduce_tasks.len()
            );
        }
    }
}

/// Owns the scheduling state and serves the two RPCs workers call. Cloning is
/// cheap; all clones share the same scheduler.
#[derive(Clone)]
pub struct Coordinator {
    scheduler: Arc<Mutex<Scheduler>>,
    task_timeout: Duration,
}

impl Coordinator {
    /// One map task per input file, `n_reduce` reduce tasks. An empty file
    /// list yields a job that is already past its map phase.
    pub fn new(files: Vec<PathBuf>, n_reduce: usize, task_timeout: Duration) -> Coordinator {
        let mut scheduler = Scheduler::new(files);
        scheduler.reduce_tasks = (0..n_reduce)
            .map(|_| ReduceTask {
                status: TaskStatus::Idle,
                timer: None,
            })
            .collect();
        scheduler.advance();
        Coordinator {
            scheduler: Arc::new(Mutex::new(scheduler)),
            task_timeout,
        }
    }

    /// Hands out the lowest-index idle task of the current phase, arming its
    /// timeout timer. `Wait` means every remaining task of the phase is
    /// in flight; the caller should back off and retry.
    pub fn get_task(&self) -> GetTaskReply {
        let mut s = self.scheduler.lock().unwrap();
        let n_map = s.map_tasks.len();
        let n_reduce = s.reduce_tasks.len();
        match s.phase {
            Phase::Done => GetTaskReply::AllDone,
            Phase::Map => {
                let index = match s
                    .map_tasks
                    .iter()
                    .position(|t| t.status == TaskStatus::Idle)
                {
                    Some(index) => index,
                    None => {
                        // ReportDone flips the phase as the last completion
                        // lands, so inside the lock there is always either an
                        // idle task or one still in flight.
                        debug_assert!(s.map_in_progress > 0);
                        return GetTaskReply::Wait;
                    }
                };
                let task = &mut s.map_tasks[index];
                task.status = TaskStatus::InProgress;
                task.timer = Some(self.arm_timer(TaskKind::Map, index));
                let filename = task.filename.clone();
                s.map_in_progress += 1;
                info!("map task {} assigned ({})", index, filename.display());
                GetTaskReply::Assigned(TaskAssignment {
                    kind: TaskKind::Map,
                    index,
                    filename: Some(filename),
                    n_map,
                    n_reduce,
                })
            }
            Phase::Reduce => {
                let index = match s
                    .reduce_tasks
                    .iter()
                    .position(|t| t.status == TaskStatus::Idle)
                {
                    Some(index) => index,
                    None => {
                        debug_assert!(s.reduce_in_progress > 0);
                        return GetTaskReply::Wait;
                    }
                };
                let task = &mut s.reduce_tasks[index];
                task.status = TaskStatus::InProgress;
                task.timer = Some(self.arm_timer(TaskKind::Reduce, index));
                s.reduce_in_progress += 1;
                info!("reduce task {} assigned", index);
                GetTaskReply::Assigned(TaskAssignment {
                    kind: TaskKind::Reduce,
                    index,
                    filename: None,
                    n_map,
                    n_reduce,
                })
            }
        }
    }

    /// Records a completion. Duplicate reports are accepted silently, and so
    /// are reports for tasks a timeout already handed back to the idle pool:
    /// output is published by atomic rename, so whichever attempt finished
    /// is observationally the same.
    pub fn report_done(&self, report: CompletionReport) -> Result<(), String> {
        let mut s = self.scheduler.lock().unwrap();
        match report.kind {
            TaskKind::Map => {
                if report.index >= s.map_tasks.len() {
                    return Err(format!("no map task with index {}", report.index));
                }
                match s.map_tasks[report.index].status {
                    TaskStatus::Completed => return Ok(()),
                    TaskStatus::InProgress => {
                        s.map_in_progress -= 1;
                        if let Some(timer) = s.map_tasks[report.index].timer.take() {
                            // Best effort: the timer may already have fired
                            // and lost the status re-check.
                            timer.abort();
                        }
                    }
                    // A timeout already returned this task to the pool and
                    // decremented the in-progress count; the late completion
                    // still stands.
                    TaskStatus::Idle => {}
                }
                s.map_tasks[report.index].status = TaskStatus::Completed;
                s.map_completed += 1;
                info!(
                    "map task {} done ({}/{})",
                    report.index,
                    s.map_completed,
                    s.map_tasks.len()
                );
            }
            TaskKind::Reduce => {
                if s.phase == Phase::Map {
                    return Err(format!(
                        "reduce task {} reported before the reduce phase began",
                        report.index
                    ));
                }
                if report.index >= s.reduce_tasks.len() {
                    return Err(format!("no reduce task with index {}", report.index));
                }
                match s.reduce_tasks[report.index].status {
                    TaskStatus::Completed => return Ok(()),
                    TaskStatus::InProgress => {
                        s.reduce_in_progress -= 1;
                        if let Some(timer) = s.reduce_tasks[report.index].timer.take() {
                            timer.abort();
                        }
                    }
                    TaskStatus::Idle => {}
                }
                s.reduce_tasks[report.index].status = TaskStatus::Completed;
                s.reduce_completed += 1;
                info!(
                    "reduce task {} done ({}/{})",
                    report.index,
                    s.reduce_completed,
                    s.reduce_tasks.len()
                );
            }
        }
        s.advance();
        Ok(())
    }

    /// True once every task of both phases has completed.
    pub fn done(&self) -> bool {
        self.scheduler.lock().unwrap().phase == Phase::Done
    }

    fn arm_timer(&self, kind: TaskKind, index: usize) -> AbortHandle {
        let coordinator = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(coordinator.task_timeout).await;
            coordinator.reclaim(kind, index);
        });
        handle.abort_handle()
    }

    // Timeout callback. The stop on report is best-effort, so the status must
    // be re-checked under the lock here; losing the race to a report makes
    // this a no-op.
    fn reclaim(&self, kind: TaskKind, index: usize) {
        let mut s = self.scheduler.lock().unwrap();
        match kind {
            TaskKind::Map => {
                let task = &mut s.map_tasks[index];
                if task.status != TaskStatus::InProgress {
                    debug!("map task {} timer fired after completion", index);
                    return;
                }
                task.status = TaskStatus::Idle;
                task.timer = None;
                s.map_in_progress -= 1;
                warn!("map task {} timed out, requeued", index);
            }
            TaskKind::Reduce => {
                let task = &mut s.reduce_tasks[index];
                if task.status != TaskStatus::InProgress {
                    debug!("reduce task {} timer fired after completion", index);
                    return;
                }
                task.status = TaskStatus::Idle;
                task.timer = None;
                s.reduce_in_progress -= 1;
                warn!("reduce task {} timed out, requeued", index);
            }
        }
    }

    /// Binds the coordinator's socket and serves worker RPCs until the
    /// process exits. A stale socket from a previous run is removed first.
    pub async fn listen(&self, socket: &Path) -> io::Result<()> {
        let _ = fs::remove_file(socket);
        let mut listener = tarpc::serde_transport::unix::listen(socket, Json::default).await?;
        listener.config_mut().max_frame_length(usize::MAX);
        info!("coordinator listening on {}", socket.display());
        listener
            .filter_map(|r| future::ready(r.ok()))
            .map(server::BaseChannel::with_defaults)
            .map(|channel| {
                let server = CoordinatorServer {
                    coordinator: self.clone(),
                };
                channel.execute(server.serve()).for_each(spawn)
            })
            .buffer_unordered(16)
            .for_each(|_| async {})
            .await;
        Ok(())
    }

    #[cfg(test)]
    fn assert_counters_consistent(&self) {
        let s = self.scheduler.lock().unwrap();
        let idle = |tasks: &[TaskStatus]| {
            tasks
                .iter()
                .filter(|status| **status == TaskStatus::Idle)
                .count()
        };
        let map: Vec<_> = s.map_tasks.iter().map(|t| t.status).collect();
        let reduce: Vec<_> = s.reduce_tasks.iter().map(|t| t.status).collect();
        assert_eq!(
            idle(&map) + s.map_in_progress + s.map_completed,
            s.map_tasks.len()
        );
        assert_eq!(
            idle(&reduce) + s.reduce_in_progress + s.reduce_completed,
            s.reduce_tasks.len()
        );
    }
}

#[derive(Clone)]
struct CoordinatorServer {
    coordinator: Coordinator,
}

impl TaskService for CoordinatorServer {
    async fn get_task(self, _: context::Context) -> GetTaskReply {
        self.coordinator.get_task()
    }

    async fn report_done(
        self,
        _: context::Context,
        report: CompletionReport,
    ) -> Result<(), String> {
        self.coordinator.report_done(report)
    }
}

async fn spawn(fut: impl Future<Output = ()> + Send + 'static) {
    tokio::spawn(fut);
}
