//! [`StateMirror`] – the periodic poll → gate → dispatch → mirror loop.
//!
//! ```text
//!  ┌──────────── every period ────────────┐
//!  │ 1. reap a finished dispatch task     │
//!  │ 2. poll the seven robot variables    │──► RobotLink
//!  │ 3. idle and nothing in flight?       │
//!  │      dequeue one job, spawn dispatch │──► RobotLink (own task)
//!  │ 4. overwrite the twin variables      │──► twin NodeStore
//!  └──────────────────────────────────────┘
//! ```
//!
//! The dispatch sequence runs on its own task so a slow robot does not
//! stretch the poll cadence.  Only one dispatch is in flight at a time; the
//! next job waits until the previous one has reached a terminal state and a
//! later poll reports the robot idle.
//!
//! A tick that fails while polling leaves the queue untouched.  [`run`]
//! logs the failure and carries on with the next tick.
//!
//! [`run`]: StateMirror::run

use std::sync::Arc;
use std::time::Duration;

use cellbridge_link::{LinkMode, NodeStore, RobotLink};
use cellbridge_types::{BridgeError, NodeId, PickPlaceJob, RobotNodes, RobotStateSnapshot, TwinNodes, Variant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dispatch::{DispatchRecord, DispatchState, dispatch_job};
use crate::queue::CommandQueue;

/// Reference polling period.
pub const DEFAULT_PERIOD: Duration = Duration::from_millis(500);

/// Outcome of one successful tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub snapshot: RobotStateSnapshot,
    /// Queue depth after this tick's dequeue, as written to the twin.
    pub queue_depth: usize,
    /// Job launched by this tick, if any.
    pub dispatched: Option<PickPlaceJob>,
}

struct InFlight {
    record: DispatchRecord,
    handle: JoinHandle<Result<(), BridgeError>>,
}

pub struct StateMirror {
    link: Arc<RobotLink>,
    queue: Arc<CommandQueue>,
    twin: NodeStore,
    robot_nodes: RobotNodes,
    twin_nodes: TwinNodes,
    period: Duration,
    in_flight: Option<InFlight>,
    last_snapshot: Option<RobotStateSnapshot>,
    last_dispatch: Option<DispatchRecord>,
    consecutive_failures: u32,
}

impl StateMirror {
    /// `twin` must already declare every node in `twin_nodes`.
    pub fn new(
        link: Arc<RobotLink>,
        queue: Arc<CommandQueue>,
        twin: NodeStore,
        robot_nodes: RobotNodes,
        twin_nodes: TwinNodes,
        period: Duration,
    ) -> Self {
        Self {
            link,
            queue,
            twin,
            robot_nodes,
            twin_nodes,
            period,
            in_flight: None,
            last_snapshot: None,
            last_dispatch: None,
            consecutive_failures: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Most recent successfully polled snapshot.
    pub fn last_snapshot(&self) -> Option<RobotStateSnapshot> {
        self.last_snapshot
    }

    /// Most recent dispatch that reached a terminal state.
    pub fn last_dispatch(&self) -> Option<&DispatchRecord> {
        self.last_dispatch.as_ref()
    }

    /// Dispatch currently running, if any.
    pub fn in_flight(&self) -> Option<&DispatchRecord> {
        self.in_flight.as_ref().map(|f| &f.record)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Run one poll/gate/dispatch/mirror cycle.
    ///
    /// # Errors
    ///
    /// Any transport error while polling, in which case nothing was dequeued
    /// and the twin was not touched.  A [`BridgeError::ProtocolFault`] from
    /// the twin store means the twin nodes were not provisioned.
    pub async fn tick(&mut self) -> Result<TickReport, BridgeError> {
        self.reap().await;

        let snapshot = self.poll().await?;

        let dispatched = if snapshot.busy {
            None
        } else if let Some(current) = &self.in_flight {
            debug!(job = %current.record.job.id, "robot idle but previous dispatch still in flight");
            None
        } else {
            self.queue.dequeue().map(|job| self.launch(job))
        };

        let queue_depth = self.queue.size();
        self.mirror(&snapshot, queue_depth)?;
        self.last_snapshot = Some(snapshot);

        Ok(TickReport {
            snapshot,
            queue_depth,
            dispatched,
        })
    }

    /// Wait for the in-flight dispatch, if any, and return its final record.
    pub async fn settle_dispatch(&mut self) -> Option<&DispatchRecord> {
        let in_flight = self.in_flight.take()?;
        self.finish(in_flight).await;
        self.last_dispatch.as_ref()
    }

    /// Tick every period until `shutdown` turns `true` or its sender is
    /// dropped.  Failed ticks are logged and skipped.  A dispatch still in
    /// flight at shutdown is abandoned, and queued jobs are dropped with the
    /// mirror.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(period = ?self.period, endpoint = %self.link.endpoint(), "state mirror started");
        while !*shutdown.borrow() {
            match self.tick().await {
                Ok(report) => {
                    if self.consecutive_failures > 0 {
                        info!(after = self.consecutive_failures, "robot polling recovered");
                    }
                    self.consecutive_failures = 0;
                    debug!(
                        busy = report.snapshot.busy,
                        under_service = report.snapshot.under_service,
                        service_position = report.snapshot.service_position,
                        queue_depth = report.queue_depth,
                        "tick"
                    );
                }
                Err(e) => {
                    self.consecutive_failures += 1;
                    warn!(
                        error = %e,
                        consecutive_failures = self.consecutive_failures,
                        queue_depth = self.queue.size(),
                        "mirror tick failed"
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.period) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        if let Some(current) = &self.in_flight {
            warn!(job = %current.record.job.id, "shutting down with a dispatch in flight");
        }
        info!(dropped_jobs = self.queue.size(), "state mirror stopped");
    }

    // ── internals ─────────────────────────────────────────────────────────

    /// Per-call links read each variable on its own connection; a session
    /// reads all seven in one exchange (batched if the transport allows).
    async fn poll(&self) -> Result<RobotStateSnapshot, BridgeError> {
        let nodes = self.robot_nodes.state_nodes();
        let values = match self.link.mode() {
            LinkMode::PerCall => {
                let mut values = Vec::with_capacity(nodes.len());
                for node in &nodes {
                    values.push(self.link.read(node).await?);
                }
                values
            }
            LinkMode::Session(_) => self.link.read_many(&nodes).await?,
        };
        decode_snapshot(&nodes, &values)
    }

    fn launch(&mut self, job: PickPlaceJob) -> PickPlaceJob {
        let mut record = DispatchRecord::queued(job.clone());
        record.begin();
        info!(
            job = %job.id,
            pick_id = job.pick.module_id,
            pick_dir = job.pick.direction,
            place_id = job.place.module_id,
            place_dir = job.place.direction,
            "dispatching pick-and-place"
        );

        let link = Arc::clone(&self.link);
        let nodes = self.robot_nodes.clone();
        let task_job = job.clone();
        let handle = tokio::spawn(async move { dispatch_job(&link, &nodes, &task_job).await });

        self.in_flight = Some(InFlight { record, handle });
        job
    }

    async fn reap(&mut self) {
        let finished = self.in_flight.as_ref().is_some_and(|f| f.handle.is_finished());
        if finished && let Some(in_flight) = self.in_flight.take() {
            self.finish(in_flight).await;
        }
    }

    async fn finish(&mut self, in_flight: InFlight) {
        let InFlight { mut record, handle } = in_flight;
        match handle.await {
            Ok(outcome) => record.finish(outcome),
            Err(join) => record.fail(format!("dispatch task ended abnormally: {join}")),
        }
        match &record.state {
            DispatchState::Failed(reason) => {
                error!(job = %record.job.id, reason = %reason, "dispatch failed; job dropped");
            }
            _ => info!(job = %record.job.id, elapsed = ?record.elapsed(), "dispatch completed"),
        }
        self.last_dispatch = Some(record);
    }

    /// Overwrite every twin variable.  No comparison with the previous tick.
    fn mirror(&self, snapshot: &RobotStateSnapshot, queue_depth: usize) -> Result<(), BridgeError> {
        let t = &self.twin_nodes;
        let depth = i32::try_from(queue_depth).unwrap_or(i32::MAX);
        let writes = [
            (&t.busy, Variant::Boolean(snapshot.busy)),
            (&t.under_service, Variant::Boolean(snapshot.under_service)),
            (&t.service_position, Variant::Int32(snapshot.service_position)),
            (&t.pick_dir, Variant::Int32(snapshot.pick_dir)),
            (&t.place_dir, Variant::Int32(snapshot.place_dir)),
            (&t.pick_id, Variant::Int32(snapshot.pick_id)),
            (&t.place_id, Variant::Int32(snapshot.place_id)),
            (&t.queue_depth, Variant::Int32(depth)),
        ];
        for (node, value) in writes {
            self.twin.write(node, value)?;
        }
        Ok(())
    }
}

/// Build a snapshot from values read in [`RobotNodes::state_nodes`] order.
fn decode_snapshot(nodes: &[NodeId; 7], values: &[Variant]) -> Result<RobotStateSnapshot, BridgeError> {
    let [busy, under_service, service, pick_dir, place_dir, pick_id, place_id] = values else {
        return Err(BridgeError::protocol(
            &nodes[0],
            format!("expected {} state values, got {}", nodes.len(), values.len()),
        ));
    };
    Ok(RobotStateSnapshot {
        busy: busy.as_bool(&nodes[0])?,
        under_service: under_service.as_bool(&nodes[1])?,
        service_position: service.as_i32(&nodes[2])?,
        pick_dir: pick_dir.as_i32(&nodes[3])?,
        place_dir: place_dir.as_i32(&nodes[4])?,
        pick_id: pick_id.as_i32(&nodes[5])?,
        place_id: place_id.as_i32(&nodes[6])?,
    })
}
