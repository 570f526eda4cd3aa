//! `cellbridge watch` – operator view of a running gateway's digital twin.
//!
//! Polls the mirrored `busy` flag and queue depth over one reconnecting
//! session and hands every reading to the caller.

use std::sync::Arc;
use std::time::Duration;

use cellbridge_link::{Backoff, LinkMode, RobotLink, WsConnector};
use cellbridge_types::{BridgeError, TwinNodes};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::Config;

/// One poll of the twin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TwinReading {
    pub busy: bool,
    pub queue_depth: i32,
}

pub struct TwinWatcher {
    link: RobotLink,
    nodes: TwinNodes,
    period: Duration,
}

impl TwinWatcher {
    /// Watch the twin at `url`, or the local gateway's port when `None`.
    pub fn new(cfg: &Config, url: Option<String>) -> Self {
        let url = url.unwrap_or_else(|| format!("ws://127.0.0.1:{}", cfg.listen_port));
        let connector = WsConnector::new(url).with_io_timeout(cfg.io_timeout());
        let backoff = match cfg.link_mode() {
            LinkMode::Session(backoff) => backoff,
            LinkMode::PerCall => Backoff::default(),
        };
        Self {
            link: RobotLink::new(Arc::new(connector), LinkMode::Session(backoff)),
            nodes: cfg.twin_nodes.clone(),
            period: Duration::from_millis(cfg.poll_interval_ms),
        }
    }

    pub fn endpoint(&self) -> &str {
        self.link.endpoint()
    }

    pub async fn read(&self) -> Result<TwinReading, BridgeError> {
        let (busy, depth) = self.link.read_pair(&self.nodes.busy, &self.nodes.queue_depth).await?;
        Ok(TwinReading {
            busy: busy.as_bool(&self.nodes.busy)?,
            queue_depth: depth.as_i32(&self.nodes.queue_depth)?,
        })
    }

    /// Poll every period until `shutdown` turns `true` or its sender is
    /// dropped.  Failed reads are logged and polling carries on.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>, mut report: impl FnMut(TwinReading)) {
        info!(twin = %self.endpoint(), period = ?self.period, "watching digital twin");
        while !*shutdown.borrow() {
            match self.read().await {
                Ok(reading) => report(reading),
                Err(e) => warn!(twin = %self.endpoint(), error = %e, "twin read failed"),
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
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellbridge_server::{NodeSpace, NodeSpaceEndpoint};
    use cellbridge_types::Variant;
    use tokio::sync::mpsc;

    async fn serve_twin() -> (Arc<NodeSpace>, String, watch::Sender<bool>) {
        let space = Arc::new(NodeSpace::new("twin"));
        for (node, ty) in TwinNodes::default().declarations() {
            space.declare_read_only(node, ty);
        }
        let endpoint = NodeSpaceEndpoint::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let url = format!("ws://{}", endpoint.local_addr().unwrap());
        let (tx, rx) = watch::channel(false);
        tokio::spawn(endpoint.run(Arc::clone(&space), rx));
        (space, url, tx)
    }

    fn fast_config() -> Config {
        Config {
            poll_interval_ms: 10,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn reads_busy_and_queue_depth_from_twin() {
        let (space, url, _server) = serve_twin().await;
        let nodes = TwinNodes::default();
        space.variables().write(&nodes.busy, Variant::Boolean(true)).unwrap();
        space.variables().write(&nodes.queue_depth, Variant::Int32(2)).unwrap();

        let watcher = TwinWatcher::new(&fast_config(), Some(url));
        assert_eq!(
            watcher.read().await.unwrap(),
            TwinReading {
                busy: true,
                queue_depth: 2
            }
        );
    }

    #[tokio::test]
    async fn run_reports_changes_until_shutdown() {
        let (space, url, _server) = serve_twin().await;
        let nodes = TwinNodes::default();
        space.variables().write(&nodes.busy, Variant::Boolean(true)).unwrap();

        let watcher = TwinWatcher::new(&fast_config(), Some(url));
        let (stop_tx, stop_rx) = watch::channel(false);
        let (reading_tx, mut readings) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            watcher
                .run(stop_rx, |r| {
                    let _ = reading_tx.send(r);
                })
                .await;
        });

        assert!(readings.recv().await.unwrap().busy);
        space.variables().write(&nodes.busy, Variant::Boolean(false)).unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while readings.recv().await.unwrap().busy {}
        })
        .await
        .expect("watcher never saw the robot go idle");

        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn default_url_targets_local_listen_port() {
        let cfg = Config {
            listen_port: 4999,
            ..Config::default()
        };
        assert_eq!(TwinWatcher::new(&cfg, None).endpoint(), "ws://127.0.0.1:4999");
    }
}
