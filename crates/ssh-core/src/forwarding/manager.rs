use super::{
    local::{bind_forward_listener, run_forward_listener},
    relay::relay_streams,
    remote::{register_reverse_listener, run_reverse_listener},
    traits::{ForwardSession, RemoteRegistrar},
};
use crate::{SshCoreError, notifier::SharedNotifier};
use once_cell::sync::OnceCell;
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{Mutex, watch},
    task::JoinHandle,
    time::{Instant, timeout_at},
};
use tracing::{debug, info, warn};
use tunnel_types::{PortPair, TunnelRequest, TunnelSpec};

type Result<T> = crate::SshResult<T>;

/// How long shutdown waits for relays to close before aborting them.
pub const RELAY_GRACE_PERIOD: Duration = Duration::from_secs(5);

pub(super) struct TunnelState {
    pub(super) notifier: SharedNotifier,
    started: AtomicBool,
    spec: OnceCell<TunnelSpec>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    relays: Mutex<HashMap<u64, JoinHandle<()>>>,
    next_relay: AtomicU64,
    remote_binding: Mutex<Option<(String, u32)>>,
    shutdown: watch::Sender<bool>,
    failure: watch::Sender<Option<String>>,
}

impl TunnelState {
    pub(super) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Record that the accept loop ended without being asked to.
    pub(super) fn fail(&self, reason: String) {
        if self.is_shutting_down() {
            return;
        }
        warn!(%reason, "tunnel stopped accepting connections");
        self.failure.send_replace(Some(reason));
    }

    /// Start relaying between an accepted endpoint and its paired endpoint.
    ///
    /// The relay is registered while the relay set is locked, so its own
    /// removal on completion always comes after the insert.
    pub(super) async fn spawn_relay<A, B>(self: &Arc<Self>, accepted: A, paired: B, label: String)
    where
        A: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        B: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut relays = self.relays.lock().await;
        if self.is_shutting_down() {
            debug!(%label, "dropping connection accepted during shutdown");
            return;
        }
        let id = self.next_relay.fetch_add(1, Ordering::Relaxed);
        let state = Arc::clone(self);
        let shutdown = self.shutdown_signal();
        let task = tokio::spawn(async move {
            match relay_streams(accepted, paired, shutdown).await {
                Ok(stats) => debug!(
                    relay = id,
                    %label,
                    sent = stats.sent,
                    received = stats.received,
                    interrupted = stats.interrupted,
                    "relay finished"
                ),
                Err(err) => warn!(?err, relay = id, %label, "relay ended with error"),
            }
            state.relays.lock().await.remove(&id);
        });
        relays.insert(id, task);
    }
}

/// Runs exactly one forward or reverse tunnel over a borrowed transport.
#[derive(Clone)]
pub struct TunnelManager {
    state: Arc<TunnelState>,
}

impl TunnelManager {
    pub fn new(notifier: SharedNotifier) -> Self {
        let (shutdown, _) = watch::channel(false);
        let (failure, _) = watch::channel(None);
        Self {
            state: Arc::new(TunnelState {
                notifier,
                started: AtomicBool::new(false),
                spec: OnceCell::new(),
                accept_task: Mutex::new(None),
                relays: Mutex::new(HashMap::new()),
                next_relay: AtomicU64::new(0),
                remote_binding: Mutex::new(None),
                shutdown,
                failure,
            }),
        }
    }

    /// Listen on `0.0.0.0:local_port` and relay every connection through a
    /// `direct-tcpip` channel to `dest_host:remote_port`.
    ///
    /// Returns the bound address, which differs from the request when
    /// `local_port` is `0`.
    pub async fn start_forward<S>(
        &self,
        session: S,
        local_port: u16,
        dest_host: impl Into<String>,
        remote_port: u16,
    ) -> Result<SocketAddr>
    where
        S: ForwardSession,
    {
        self.claim()?;
        let spec = TunnelRequest::forward(PortPair::new(local_port, remote_port), dest_host).spec();
        let listener = bind_forward_listener(&spec).await?;
        let bound = listener.local_addr()?;
        info!(
            bind = %bound,
            target = %spec.target(),
            "forward tunnel listening"
        );
        let task = tokio::spawn(run_forward_listener(listener, spec.clone(), session, Arc::clone(&self.state)));
        *self.state.accept_task.lock().await = Some(task);
        let _ = self.state.spec.set(spec);
        Ok(bound)
    }

    /// Ask the server to listen on `remote_port` and relay every forwarded
    /// connection to `dest_host:local_port`.
    ///
    /// Returns the port the server actually bound.
    pub async fn start_reverse<R>(
        &self,
        registrar: &mut R,
        local_port: u16,
        dest_host: impl Into<String>,
        remote_port: u16,
    ) -> Result<u32>
    where
        R: RemoteRegistrar + Send,
    {
        self.claim()?;
        let spec = TunnelRequest::reverse(PortPair::new(remote_port, local_port), dest_host).spec();
        let (listener, actual_port) = register_reverse_listener(registrar, &spec).await?;
        *self.state.remote_binding.lock().await = Some((spec.bind_address.clone(), actual_port));
        let task = tokio::spawn(run_reverse_listener(listener, actual_port, spec.clone(), Arc::clone(&self.state)));
        *self.state.accept_task.lock().await = Some(task);
        let _ = self.state.spec.set(spec);
        Ok(actual_port)
    }

    /// Stop accepting, close every relay and drop the server listener.
    ///
    /// Relays get [`RELAY_GRACE_PERIOD`] to close both endpoints before they
    /// are aborted. Failing to cancel the server listener is only logged.
    pub async fn shutdown<S>(&self, session: Option<S>) -> Result<()>
    where
        S: ForwardSession,
    {
        self.state.shutdown.send_replace(true);
        self.stop_accepting().await;
        self.drain_relays().await;

        if let Some((address, port)) = self.state.remote_binding.lock().await.take() {
            match session {
                Some(session) => {
                    if let Err(err) = session.cancel_tcpip_forwarding(address.clone(), port).await {
                        warn!(?err, bind = %address, port, "failed to cancel remote forward");
                    }
                }
                None => debug!(port, "no transport to cancel remote forward on"),
            }
        }
        Ok(())
    }

    /// Resolves once the accept loop has ended on its own, for example
    /// because the listener failed or the transport went away.
    pub async fn failure(&self) -> SshCoreError {
        let mut failure = self.state.failure.subscribe();
        match failure.wait_for(Option::is_some).await {
            Ok(reason) => SshCoreError::tunnel_failure(reason.clone().unwrap_or_default()),
            Err(_) => SshCoreError::tunnel_failure("tunnel manager dropped"),
        }
    }

    pub async fn active_relays(&self) -> usize {
        self.state.relays.lock().await.len()
    }

    pub async fn is_running(&self) -> bool {
        if self.state.is_shutting_down() {
            return false;
        }
        self.state
            .accept_task
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn spec(&self) -> Option<&TunnelSpec> {
        self.state.spec.get()
    }

    /// Human-readable description of the running tunnel.
    pub fn descriptor(&self) -> Option<String> {
        self.spec().map(ToString::to_string)
    }

    fn claim(&self) -> Result<()> {
        if self.state.started.swap(true, Ordering::SeqCst) {
            return Err(SshCoreError::TunnelAlreadyStarted);
        }
        Ok(())
    }

    async fn stop_accepting(&self) {
        let Some(mut task) = self.state.accept_task.lock().await.take() else {
            return;
        };
        if timeout_at(Instant::now() + RELAY_GRACE_PERIOD, &mut task).await.is_err() {
            task.abort();
        }
    }

    async fn drain_relays(&self) {
        let relays: Vec<(u64, JoinHandle<()>)> = self.state.relays.lock().await.drain().collect();
        if relays.is_empty() {
            return;
        }
        debug!(count = relays.len(), "waiting for relays to close");
        let deadline = Instant::now() + RELAY_GRACE_PERIOD;
        for (id, mut task) in relays {
            if timeout_at(deadline, &mut task).await.is_err() {
                warn!(relay = id, "relay did not close in time; aborting");
                task.abort();
            }
        }
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
