use std::collections::HashMap;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use crate::channel::{StartUploadPayload, UploadProgressPayload};
use crate::core::{FileBlob, Result, SessionError, UploadId, UploadState, UploadTask};

/// Finished tasks kept for queries; older ones are dropped first.
pub const MAX_FINISHED_TASKS: usize = 100;

struct TaskHandle {
    task: UploadTask,
    cancellation_token: Option<CancellationToken>,
}

/// Tracks every upload of the session.
///
/// Each task moves `Selected -> Transferring -> Complete | Failed`. Progress
/// reported by the event channel is correlated by task id when the event
/// carries one, by file name otherwise, and never moves backwards.
///
/// Finished tasks stay queryable until [`UploadCoordinator::clean`], at most
/// [`MAX_FINISHED_TASKS`] of them.
#[derive(Default)]
pub struct UploadCoordinator {
    tasks: HashMap<UploadId, TaskHandle>,
}

impl UploadCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(&mut self, blob: &FileBlob) -> UploadId {
        let upload_id = UploadId::new();
        let task = UploadTask {
            id: upload_id,
            file_name: blob.name.clone(),
            size_bytes: blob.size(),
            progress_percent: 0,
            state: UploadState::Selected,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        };

        self.tasks.insert(upload_id, TaskHandle {
            task,
            cancellation_token: None,
        });

        upload_id
    }

    /// Move a selected task to `Transferring`.
    ///
    /// Returns the announcement to publish on the channel and the token that
    /// aborts the transfer.
    pub fn start(&mut self, upload_id: UploadId) -> Result<(StartUploadPayload, CancellationToken)> {
        let handle = self.tasks.get_mut(&upload_id)
            .ok_or_else(|| SessionError::not_found(upload_id.to_string()))?;

        if handle.task.state != UploadState::Selected {
            return Err(SessionError::InvalidState(format!(
                "Cannot start upload in state {:?}",
                handle.task.state
            )));
        }

        let token = CancellationToken::new();
        handle.cancellation_token = Some(token.clone());
        handle.task.state = UploadState::Transferring;
        handle.task.started_at = Some(Utc::now());

        let announcement = StartUploadPayload {
            file_name: handle.task.file_name.clone(),
            task_id: Some(upload_id),
        };

        Ok((announcement, token))
    }

    /// Apply a channel progress report. Returns the task and its new
    /// percentage when the report advanced an in-flight task.
    pub fn apply_progress(&mut self, payload: &UploadProgressPayload) -> Option<(UploadId, u8)> {
        let upload_id = self.correlate(payload)?;
        let handle = self.tasks.get_mut(&upload_id)?;
        let reported = to_percent(payload.progress);

        if reported <= handle.task.progress_percent {
            debug!(%upload_id, reported, current = handle.task.progress_percent, "stale progress ignored");
            return None;
        }

        handle.task.progress_percent = reported;
        Some((upload_id, reported))
    }

    pub fn complete(&mut self, upload_id: UploadId) -> Option<UploadTask> {
        let handle = self.in_flight_mut(upload_id)?;

        handle.task.state = UploadState::Complete;
        handle.task.progress_percent = 100;
        handle.task.completed_at = Some(Utc::now());
        handle.cancellation_token = None;

        let task = handle.task.clone();
        self.prune_finished();
        Some(task)
    }

    pub fn fail(&mut self, upload_id: UploadId, error: &SessionError) -> Option<UploadTask> {
        let handle = self.in_flight_mut(upload_id)?;

        handle.task.state = UploadState::Failed;
        handle.task.error = Some(error.to_string());
        handle.task.completed_at = Some(Utc::now());
        handle.cancellation_token = None;

        let task = handle.task.clone();
        self.prune_finished();
        Some(task)
    }

    /// Abort a transfer. The task fails once the worker reports back.
    pub fn cancel(&mut self, upload_id: UploadId) -> Result<()> {
        let handle = self.tasks.get_mut(&upload_id)
            .ok_or_else(|| SessionError::not_found(upload_id.to_string()))?;

        match handle.task.state {
            UploadState::Transferring => {
                if let Some(token) = &handle.cancellation_token {
                    token.cancel();
                }
                Ok(())
            }
            UploadState::Selected => {
                handle.task.state = UploadState::Failed;
                handle.task.error = Some(SessionError::Cancelled.to_string());
                handle.task.completed_at = Some(Utc::now());
                self.prune_finished();
                Ok(())
            }
            state => Err(SessionError::InvalidState(format!("Cannot cancel upload in state {:?}", state))),
        }
    }

    /// Abort every in-flight transfer.
    pub fn cancel_all(&mut self) {
        for handle in self.tasks.values() {
            if let Some(token) = &handle.cancellation_token {
                token.cancel();
            }
        }
    }

    pub fn get(&self, upload_id: UploadId) -> Option<&UploadTask> {
        self.tasks.get(&upload_id).map(|handle| &handle.task)
    }

    /// All tasks, oldest first.
    pub fn tasks(&self) -> Vec<UploadTask> {
        let mut tasks: Vec<_> = self.tasks.values().map(|handle| handle.task.clone()).collect();
        tasks.sort_by_key(|task| task.created_at);
        tasks
    }

    /// 清除所有 <Failed/Complete> 状态的任务
    pub fn clean(&mut self) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, handle| !handle.task.state.is_finished());
        before - self.tasks.len()
    }

    fn prune_finished(&mut self) {
        let mut finished: Vec<_> = self.tasks
            .values()
            .filter(|handle| handle.task.state.is_finished())
            .map(|handle| (handle.task.completed_at, handle.task.id))
            .collect();

        if finished.len() <= MAX_FINISHED_TASKS {
            return;
        }

        finished.sort_by_key(|(completed_at, _)| *completed_at);
        let excess = finished.len() - MAX_FINISHED_TASKS;
        for (_, upload_id) in finished.into_iter().take(excess) {
            self.tasks.remove(&upload_id);
        }
        debug!(dropped = excess, "old finished uploads dropped");
    }

    fn in_flight_mut(&mut self, upload_id: UploadId) -> Option<&mut TaskHandle> {
        match self.tasks.get_mut(&upload_id) {
            Some(handle) if handle.task.state == UploadState::Transferring => Some(handle),
            Some(handle) => {
                warn!(%upload_id, state = ?handle.task.state, "upload is not in flight");
                None
            }
            None => None,
        }
    }

    fn correlate(&self, payload: &UploadProgressPayload) -> Option<UploadId> {
        let in_flight = |handle: &&TaskHandle| handle.task.state == UploadState::Transferring;

        if let Some(task_id) = payload.task_id {
            return self.tasks.get(&task_id).filter(in_flight).map(|handle| handle.task.id);
        }

        // Same-named uploads cannot be told apart without a task id, the newest wins.
        self.tasks
            .values()
            .filter(in_flight)
            .filter(|handle| handle.task.file_name == payload.file_name)
            .max_by_key(|handle| handle.task.started_at)
            .map(|handle| handle.task.id)
    }
}

fn to_percent(progress: f64) -> u8 {
    if progress.is_finite() {
        progress.clamp(0.0, 100.0).round() as u8
    } else {
        0
    }
}
