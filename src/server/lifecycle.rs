//! Relay server lifecycle - start, stop and rebind

use crate::config::RelayConfig;
use crate::dispatch::RequestDispatcher;
use crate::error::ListenerError;
use crate::executor::{Executor, ExecutorRegistry};
use crate::launch::{InstrumentationLauncher, LaunchTrigger};
use crate::transport::{self, flag_raised, Acceptor, TcpAcceptSource};
use relay_shared::state_machine::{ListenerEvent, ListenerState, ListenerStateMachine};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// A live (or draining) listener binding
struct Binding {
    local_addr: SocketAddr,
    state: Arc<RwLock<ListenerStateMachine>>,
    shutdown: watch::Sender<bool>,
    /// Set once the acceptor task has returned
    done: watch::Receiver<bool>,
    task: JoinHandle<Result<(), ListenerError>>,
}

impl Binding {
    fn is_live(&self) -> bool {
        !*self.shutdown.borrow() && !*self.done.borrow() && !self.task.is_finished()
    }
}

/// The command relay: owns the registry, the launch trigger and the listener
///
/// This is the surface an adapter layer calls into. Share it behind an `Arc`
/// when registration and lifecycle calls come from different tasks.
pub struct RelayServer {
    config: Arc<RelayConfig>,
    registry: Arc<ExecutorRegistry>,
    launcher: Arc<LaunchTrigger>,
    dispatcher: Arc<RequestDispatcher>,
    binding: Mutex<Option<Binding>>,
}

impl RelayServer {
    /// Create a stopped relay server
    pub fn new(config: RelayConfig) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(ExecutorRegistry::new());
        let launcher = Arc::new(LaunchTrigger::new(config.launch_settle));
        let dispatcher = Arc::new(RequestDispatcher::new(
            registry.clone(),
            launcher.clone(),
            config.clone(),
        ));

        Self {
            config,
            registry,
            launcher,
            dispatcher,
            binding: Mutex::new(None),
        }
    }

    /// Start listening, or move to `port` if already listening
    ///
    /// The first call (and any call after the listener stopped) starts the
    /// server; calls while it is live are treated as [`Self::set_new_port`].
    pub async fn start_server_communication(
        &self,
        port: u16,
    ) -> Result<SocketAddr, ListenerError> {
        let mut binding = self.binding.lock().await;
        if binding.as_ref().is_some_and(Binding::is_live) {
            self.rebind(&mut binding, port).await
        } else {
            self.bind_new(&mut binding, port).await
        }
    }

    /// Start listening on `port`
    ///
    /// If a listener is already live this only logs and returns its address;
    /// changing port goes through [`Self::set_new_port`].
    pub async fn start(&self, port: u16) -> Result<SocketAddr, ListenerError> {
        let mut binding = self.binding.lock().await;
        if let Some(current) = binding.as_ref().filter(|b| b.is_live()) {
            info!(
                "Server already listening on {}, ignoring start on port {}",
                current.local_addr, port
            );
            return Ok(current.local_addr);
        }
        self.bind_new(&mut binding, port).await
    }

    /// Stop the current listener and start a new one on `port`
    pub async fn set_new_port(&self, port: u16) -> Result<SocketAddr, ListenerError> {
        let mut binding = self.binding.lock().await;
        self.rebind(&mut binding, port).await
    }

    /// Stop listening
    ///
    /// A connection already being served runs to completion; this waits for
    /// it at most the rebind grace interval.
    pub async fn stop_server_communication(&self) {
        let mut binding = self.binding.lock().await;
        match binding.take() {
            Some(old) => {
                info!("About to stop server on {}", old.local_addr);
                self.drain(old).await;
            }
            None => debug!("Stop requested but server is not running"),
        }
    }

    /// Register an executor, replacing any previous one with the same ID
    pub async fn register_executor(
        &self,
        executor_id: impl Into<String>,
        executor: Arc<dyn Executor>,
    ) {
        self.registry.register(executor_id, executor).await;
    }

    /// Set the single instrumentation launcher
    pub async fn register_instrumentation_launcher(
        &self,
        launcher: Arc<dyn InstrumentationLauncher>,
    ) {
        self.launcher.register(launcher).await;
    }

    /// Get the most recently active executor ID, empty if none yet
    pub async fn last_executor_id(&self) -> String {
        self.registry.last_executor_id().await.unwrap_or_default()
    }

    pub fn registry(&self) -> &Arc<ExecutorRegistry> {
        &self.registry
    }

    /// Get the bound address of the live listener
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        let binding = self.binding.lock().await;
        binding
            .as_ref()
            .filter(|b| b.is_live())
            .map(|b| b.local_addr)
    }

    /// Get the port of the live listener
    pub async fn port(&self) -> Option<u16> {
        self.local_addr().await.map(|addr| addr.port())
    }

    /// Get the listener lifecycle state
    pub async fn state(&self) -> ListenerState {
        let binding = self.binding.lock().await;
        match binding.as_ref() {
            Some(b) => b.state.read().await.state(),
            None => ListenerState::Stopped,
        }
    }

    /// Check if a listener is accepting connections
    pub async fn is_listening(&self) -> bool {
        matches!(
            self.state().await,
            ListenerState::Listening | ListenerState::Recovering
        )
    }

    /// Wait until the listener stops on its own or is stopped
    ///
    /// A port change does not count as stopping.
    pub async fn wait_stopped(&self) {
        loop {
            let (mut done, mut stopping) = {
                let binding = self.binding.lock().await;
                match binding.as_ref().filter(|b| b.is_live()) {
                    Some(b) => (b.done.clone(), b.shutdown.subscribe()),
                    None => return,
                }
            };

            tokio::select! {
                _ = flag_raised(&mut done) => {}
                _ = flag_raised(&mut stopping) => {}
            }
        }
    }

    async fn rebind(
        &self,
        binding: &mut Option<Binding>,
        port: u16,
    ) -> Result<SocketAddr, ListenerError> {
        info!("Setting new port: {}", port);
        if let Some(old) = binding.take() {
            self.drain(old).await;
        }
        self.bind_new(binding, port).await
    }

    async fn bind_new(
        &self,
        binding: &mut Option<Binding>,
        port: u16,
    ) -> Result<SocketAddr, ListenerError> {
        let state = Arc::new(RwLock::new(ListenerStateMachine::new(
            self.config.max_accept_retries,
        )));
        state
            .write()
            .await
            .process_event(ListenerEvent::StartRequested);

        info!("About to launch server on port {}", port);
        let listener = match transport::bind(&self.config.host, port).await {
            Ok(listener) => listener,
            Err(e) => {
                state.write().await.process_event(ListenerEvent::BindFailed);
                error!("{}", e);
                return Err(e);
            }
        };
        let local_addr = listener.local_addr().map_err(|source| ListenerError::Bind {
            host: self.config.host.clone(),
            port,
            source,
        })?;
        state.write().await.process_event(ListenerEvent::Bound);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (done_tx, done) = watch::channel(false);
        let acceptor = Acceptor::new(
            TcpAcceptSource::new(listener),
            local_addr,
            self.config.clone(),
            self.dispatcher.clone(),
            state.clone(),
        );
        let task = tokio::spawn(async move {
            let result = acceptor.run(shutdown_rx).await;
            done_tx.send_replace(true);
            result
        });

        info!("Server has started on {}", local_addr);
        *binding = Some(Binding {
            local_addr,
            state,
            shutdown,
            done,
            task,
        });
        Ok(local_addr)
    }

    /// Signal a binding to stop and wait, at most the grace interval, for it to exit
    async fn drain(&self, old: Binding) {
        if old.shutdown.send(true).is_err() {
            debug!("Listener on {} had already exited", old.local_addr);
        }

        match timeout(self.config.rebind_grace, old.task).await {
            Ok(Ok(Ok(()))) => debug!("Listener on {} exited", old.local_addr),
            Ok(Ok(Err(e))) => warn!("Listener on {} had already failed: {}", old.local_addr, e),
            Ok(Err(e)) => warn!("Listener on {} ended abnormally: {}", old.local_addr, e),
            Err(_) => warn!(
                "Listener on {} still serving a connection after {:?}, socket closed, continuing without it",
                old.local_addr, self.config.rebind_grace
            ),
        }
    }
}
