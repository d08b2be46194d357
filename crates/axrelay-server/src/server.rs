use std::future::{self, Future};

use axrelay_engine::{AccessibilitySource, Engine, NotificationSink, queue};
use logging::forward;
use tokio::{
    runtime::Builder,
    signal::{
        self,
        unix::{SignalKind, signal as unix_signal},
    },
    sync::mpsc,
};
use tracing::{error, info, warn};

use crate::{Result, config::ServerConfig, hub::Hub, ipc::IpcServer};

/// Capacity of the forwarded-log queue; lines beyond it are dropped.
const LOG_FORWARD_CAPACITY: usize = 1024;

/// The axrelay server: engine, hub, and socket listener on one thread.
pub struct Server {
    /// Effective configuration.
    config: ServerConfig,
    /// Socket path to bind.
    socket_path: String,
}

impl Server {
    /// Create a server from `config`.
    pub fn new(config: ServerConfig) -> Self {
        let socket_path = config.socket_path();
        Self {
            config,
            socket_path,
        }
    }

    /// Set the socket path for IPC communication
    pub fn with_socket_path(mut self, path: impl Into<String>) -> Self {
        self.socket_path = path.into();
        self
    }

    /// Socket path the server binds.
    pub fn socket_path(&self) -> &str {
        &self.socket_path
    }

    /// Run on a fresh current-thread runtime until Ctrl-C or SIGTERM.
    ///
    /// `make_source` builds the accessibility source on the serving thread,
    /// receiving the sink its callbacks must deliver into.
    pub fn run<S, F>(self, make_source: F) -> Result<()>
    where
        S: AccessibilitySource,
        F: FnOnce(NotificationSink) -> S,
    {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        runtime.block_on(self.serve(make_source, termination()))
    }

    /// Serve until `shutdown` resolves.
    ///
    /// The engine loop and the hub are joined on the calling task; only the
    /// per-session byte movers are spawned.
    pub async fn serve<S, F, G>(self, make_source: F, shutdown: G) -> Result<()>
    where
        S: AccessibilitySource,
        F: FnOnce(NotificationSink) -> S,
        G: Future<Output = ()>,
    {
        let ipc = IpcServer::bind(&self.socket_path)?;
        info!("axrelay serving on {}", self.socket_path);

        let (handle, inbox) = queue();
        let source = make_source(handle.notification_sink());
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let engine = Engine::new(source, inbox, event_tx, self.config.engine_cfg());

        let logs = self.config.forward_logs.then(|| {
            let (tx, rx) = mpsc::channel(LOG_FORWARD_CAPACITY);
            forward::set_sink(tx);
            rx
        });
        let (hub_tx, hub_rx) = mpsc::unbounded_channel();
        let hub = Hub::new(handle.clone(), hub_rx, event_rx)
            .with_logs(logs)
            .with_heartbeat(self.config.heartbeat_interval());

        let control = async {
            let res = tokio::select! {
                () = hub.run() => {
                    warn!("hub stopped before shutdown");
                    Ok(())
                }
                res = ipc.run(hub_tx) => res,
                () = shutdown => {
                    info!("shutdown requested");
                    Ok(())
                }
            };
            handle.shutdown();
            res
        };
        let ((), res) = tokio::join!(engine.run(), control);

        if self.config.forward_logs {
            forward::clear_sink();
            let lost = forward::dropped();
            if lost > 0 {
                warn!(lost, "forwarded log lines dropped on a full queue");
            }
        }
        info!("axrelay stopped");
        res
    }
}

/// Resolves on Ctrl-C or SIGTERM. If neither can be installed, never resolves.
async fn termination() {
    let mut term = match unix_signal(SignalKind::terminate()) {
        Ok(s) => Some(s),
        Err(e) => {
            error!("cannot install SIGTERM handler: {}", e);
            None
        }
    };
    let sigterm = async {
        match term.as_mut() {
            Some(s) => {
                s.recv().await;
            }
            None => future::pending::<()>().await,
        }
    };
    tokio::select! {
        res = signal::ctrl_c() => {
            if let Err(e) = res {
                error!("cannot listen for Ctrl-C: {}", e);
                future::pending::<()>().await;
            }
        }
        () = sigterm => {}
    }
}
