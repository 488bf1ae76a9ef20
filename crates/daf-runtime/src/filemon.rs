//! Command-File Monitor
//!
//! Optional control surface for environments without network access to the
//! admin port: a file whose first line is a command, polled by modification
//! time. Recognized commands are `startapplication <name>`,
//! `stopapplication <name>`, `stopnode` and `stopmonitor`. Application
//! names resolve against the applications configured on the node at build
//! time. Read or parse problems are logged and polling continues.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info, warn};

use daf_core::ApplicationDef;

use crate::admin::NodeControl;
use crate::managers::ApplicationManager;
use crate::transport::wait_shutdown;

const POLL_INTERVAL: Duration = Duration::from_millis(2000);

pub(crate) fn start_monitor(
    path: PathBuf,
    apps: Arc<ApplicationManager>,
    known: HashMap<String, ApplicationDef>,
    control: mpsc::Sender<NodeControl>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let monitor = FileMonitor {
        path,
        apps,
        known,
        control,
    };
    tokio::spawn(monitor.run(shutdown))
}

struct FileMonitor {
    path: PathBuf,
    apps: Arc<ApplicationManager>,
    known: HashMap<String, ApplicationDef>,
    control: mpsc::Sender<NodeControl>,
}

impl FileMonitor {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("watching command file {}", self.path.display());
        let mut ticks = interval(POLL_INTERVAL);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_seen: Option<SystemTime> = None;

        loop {
            tokio::select! {
                _ = ticks.tick() => {}
                _ = wait_shutdown(&mut shutdown) => break,
            }

            // Absent file just means nothing has been written yet.
            let Ok(modified) = std::fs::metadata(&self.path).and_then(|m| m.modified()) else {
                continue;
            };
            if last_seen == Some(modified) {
                continue;
            }
            last_seen = Some(modified);

            match std::fs::read_to_string(&self.path) {
                Ok(text) => {
                    if !self.apply(&text).await {
                        break;
                    }
                }
                Err(e) => warn!("cannot read command file {}: {}", self.path.display(), e),
            }
        }
        info!("command file monitor stopped");
    }

    /// Execute the file's first line; returns false when monitoring should
    /// end
    async fn apply(&self, text: &str) -> bool {
        let Some(line) = text.lines().next().map(str::trim).filter(|l| !l.is_empty()) else {
            return true;
        };
        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or_default();
        let argument = parts.next();

        match (command, argument) {
            ("startapplication", Some(name)) => match self.known.get(name) {
                Some(def) => {
                    if let Err(e) = self.apps.start_application(def).await {
                        error!("command file: starting {} failed: {}", name, e);
                    }
                }
                None => error!("command file names unknown application {}", name),
            },
            ("stopapplication", Some(name)) => {
                let _ = self.apps.stop_application(name).await;
            }
            ("stopnode", _) => {
                info!("command file requested node stop");
                let _ = self.control.send(NodeControl::StopNode).await;
                return false;
            }
            ("stopmonitor", _) => {
                info!("command file requested monitor stop");
                return false;
            }
            _ => warn!("unrecognized command line {:?}", line),
        }
        true
    }
}
