//! Per-job dispatch state machine and the robot write sequence.
//!
//! ```text
//! Queued ──dequeue──▶ Dispatching ──writes ok──▶ Completed
//!                                 └─any error──▶ Failed
//! ```
//!
//! `Completed` means the robot accepted the pick/place positions and the
//! start flag.  It says nothing about the motion itself; the robot's `busy`
//! flag on later polls covers that.

use cellbridge_link::RobotLink;
use cellbridge_types::{BridgeError, PickPlaceJob, RobotNodes, Variant, VariantType};
use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchState {
    Queued,
    Dispatching,
    Completed,
    Failed(String),
}

impl DispatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DispatchState::Completed | DispatchState::Failed(_))
    }
}

/// Lifecycle record of one job from dequeue to a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRecord {
    pub job: PickPlaceJob,
    pub state: DispatchState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl DispatchRecord {
    pub fn queued(job: PickPlaceJob) -> Self {
        Self {
            job,
            state: DispatchState::Queued,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn begin(&mut self) {
        self.state = DispatchState::Dispatching;
        self.started_at = Some(Utc::now());
    }

    /// Move to the terminal state matching `outcome`.
    pub fn finish(&mut self, outcome: Result<(), BridgeError>) {
        match outcome {
            Ok(()) => self.state = DispatchState::Completed,
            Err(e) => self.fail(e.to_string()),
        }
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.state = DispatchState::Failed(reason.into());
        self.finished_at = Some(Utc::now());
    }

    /// Wall-clock time between `begin` and the terminal state.
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        Some(self.finished_at? - self.started_at?)
    }
}

/// Hand `job` to the robot.
///
/// Order: pick (id, dir) → read pick back → place (id, dir) → read place
/// back → `start = true`.  The read-backs are logged only; a value that
/// differs from what was written produces a warning, never an error.
#[instrument(skip_all, fields(job = %job.id))]
pub async fn dispatch_job(link: &RobotLink, nodes: &RobotNodes, job: &PickPlaceJob) -> Result<(), BridgeError> {
    link.write_pair(&nodes.pick_id, &nodes.pick_dir, job.pick.module_id, job.pick.direction)
        .await?;
    let pick = link.read_pair(&nodes.pick_id, &nodes.pick_dir).await?;
    verify("pick", pick, job.pick.module_id, job.pick.direction);

    link.write_pair(&nodes.place_id, &nodes.place_dir, job.place.module_id, job.place.direction)
        .await?;
    let place = link.read_pair(&nodes.place_id, &nodes.place_dir).await?;
    verify("place", place, job.place.module_id, job.place.direction);

    link.write_typed(&nodes.start, Variant::Boolean(true), VariantType::Boolean)
        .await
}

fn verify(which: &str, read_back: (Variant, Variant), module_id: i32, direction: i32) {
    let expected = (Variant::Int32(module_id), Variant::Int32(direction));
    if read_back == expected {
        debug!(position = which, module_id, direction, "position read back");
    } else {
        warn!(
            position = which,
            expected_id = module_id,
            expected_dir = direction,
            read_id = %read_back.0,
            read_dir = %read_back.1,
            "position read back differs from written value"
        );
    }
}
