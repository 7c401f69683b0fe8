//! Accept loop for one listener binding

use crate::config::RelayConfig;
use crate::dispatch::RequestDispatcher;
use crate::error::ListenerError;
use async_trait::async_trait;
use relay_shared::state_machine::{ListenerEvent, ListenerStateMachine, TransitionResult};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

/// Bind a listening socket
pub async fn bind(host: &str, port: u16) -> Result<TcpListener, ListenerError> {
    TcpListener::bind((host, port))
        .await
        .map_err(|source| ListenerError::Bind {
            host: host.to_string(),
            port,
            source,
        })
}

/// Source of incoming connections for an [`Acceptor`]
#[async_trait]
pub trait AcceptSource: Send {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    /// Wait for the next connection
    async fn accept(&mut self) -> io::Result<(Self::Stream, SocketAddr)>;

    /// Open a fresh socket on `addr` after the previous one was closed
    async fn reopen(&mut self, addr: SocketAddr) -> io::Result<()>;

    /// Release the socket. Returns false if it was already closed.
    fn close(&mut self) -> bool;

    fn is_open(&self) -> bool;
}

/// TCP listening socket that can be closed and reopened in place
pub struct TcpAcceptSource {
    listener: Option<TcpListener>,
}

impl TcpAcceptSource {
    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener: Some(listener),
        }
    }
}

#[async_trait]
impl AcceptSource for TcpAcceptSource {
    type Stream = TcpStream;

    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        match &self.listener {
            Some(listener) => listener.accept().await,
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "listener is closed",
            )),
        }
    }

    async fn reopen(&mut self, addr: SocketAddr) -> io::Result<()> {
        self.listener = Some(TcpListener::bind(addr).await?);
        Ok(())
    }

    fn close(&mut self) -> bool {
        self.listener.take().is_some()
    }

    fn is_open(&self) -> bool {
        self.listener.is_some()
    }
}

/// Owns a listening socket and serves connections one at a time
pub struct Acceptor<L = TcpAcceptSource> {
    source: L,
    addr: SocketAddr,
    config: Arc<RelayConfig>,
    dispatcher: Arc<RequestDispatcher>,
    state: Arc<RwLock<ListenerStateMachine>>,
}

impl<L: AcceptSource> Acceptor<L> {
    /// Create an acceptor for an already open source
    pub fn new(
        source: L,
        addr: SocketAddr,
        config: Arc<RelayConfig>,
        dispatcher: Arc<RequestDispatcher>,
        state: Arc<RwLock<ListenerStateMachine>>,
    ) -> Self {
        Self {
            source,
            addr,
            config,
            dispatcher,
            state,
        }
    }

    /// Serve until `shutdown` flips to true or its sender is dropped
    ///
    /// The listening socket is closed as soon as stop is signalled, even while
    /// a connection is still being served; that connection runs to completion
    /// before this returns. The state is set to Stopped however the loop ends.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), ListenerError> {
        info!("[ACCEPT] Server is waiting for connections on {}", self.addr);

        let result = self.accept_loop(&mut shutdown).await;

        self.close_listener();
        self.state
            .write()
            .await
            .process_event(ListenerEvent::StopRequested);

        if let Err(ref e) = result {
            error!("[ACCEPT] Listener stopped: {}", e);
        }
        result
    }

    async fn accept_loop(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), ListenerError> {
        loop {
            if *shutdown.borrow() {
                debug!("[ACCEPT] Stop flag set, leaving accept loop");
                return Ok(());
            }

            if !self.source.is_open() {
                match self.source.reopen(self.addr).await {
                    Ok(()) => {
                        info!("[ACCEPT] Recreated listener on {}", self.addr);
                        self.transition(ListenerEvent::Bound).await;
                    }
                    Err(e) => {
                        self.record_failure(e).await?;
                        continue;
                    }
                }
            }

            let accepted = tokio::select! {
                accepted = self.source.accept() => accepted,
                _ = flag_raised(shutdown) => {
                    debug!("[ACCEPT] Stop requested, leaving accept loop");
                    return Ok(());
                }
            };

            match accepted {
                Ok((stream, peer)) => {
                    self.transition(ListenerEvent::Accepted).await;
                    if self.serve(stream, peer, shutdown).await {
                        return Ok(());
                    }
                }
                Err(e) => {
                    if !is_transient(&e) && self.source.close() {
                        debug!("[ACCEPT] Dropped listener on {} after: {}", self.addr, e);
                    }
                    self.record_failure(e).await?;
                }
            }
        }
    }

    /// Serve one connection. Returns true if stop was requested meanwhile.
    async fn serve(
        &mut self,
        stream: L::Stream,
        peer: SocketAddr,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        let dispatcher = self.dispatcher.clone();
        let connection = dispatcher.handle_connection(stream, peer);
        tokio::pin!(connection);

        tokio::select! {
            _ = &mut connection => false,
            _ = flag_raised(shutdown) => {
                self.close_listener();
                debug!("[ACCEPT] Finishing connection with {} before exiting", peer);
                connection.await;
                true
            }
        }
    }

    /// Count a failure; errors out once retries are used up
    async fn record_failure(&self, error: io::Error) -> Result<(), ListenerError> {
        let result = self
            .state
            .write()
            .await
            .process_event(ListenerEvent::AcceptFailed);

        if let TransitionResult::RetriesExhausted { attempts } = result {
            return Err(ListenerError::RetriesExhausted {
                addr: self.addr,
                attempts,
                source: error,
            });
        }

        let failures = self.state.read().await.consecutive_failures();
        warn!(
            "[ACCEPT] Error while waiting for connection. Retry number {}/{}: {}",
            failures, self.config.max_accept_retries, error
        );
        tokio::time::sleep(self.config.accept_backoff).await;
        Ok(())
    }

    async fn transition(&self, event: ListenerEvent) {
        if let TransitionResult::Invalid { from, event } =
            self.state.write().await.process_event(event)
        {
            debug!("[ACCEPT] Ignored {:?} while {:?}", event, from);
        }
    }

    fn close_listener(&mut self) {
        if self.source.close() {
            info!("[ACCEPT] Listener on {} closed", self.addr);
        }
    }
}

/// Resolves once the flag is set or its sender is gone
pub(crate) async fn flag_raised(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Errors that only affect the connection being accepted, not the socket
fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{EchoExecutor, ExecutorRegistry};
    use crate::launch::LaunchTrigger;
    use relay_shared::state_machine::ListenerState;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    const PING: &str = r#"{"executorID":"echo","command":"ping","params":[]}"#;

    fn test_config() -> Arc<RelayConfig> {
        Arc::new(RelayConfig {
            host: "127.0.0.1".into(),
            accept_backoff: Duration::from_millis(1),
            ..Default::default()
        })
    }

    async fn parts(
        config: &Arc<RelayConfig>,
    ) -> (Arc<RequestDispatcher>, Arc<RwLock<ListenerStateMachine>>) {
        let registry = Arc::new(ExecutorRegistry::new());
        registry.register("echo", Arc::new(EchoExecutor)).await;
        let launcher = Arc::new(LaunchTrigger::new(config.launch_settle));
        let dispatcher = Arc::new(RequestDispatcher::new(registry, launcher, config.clone()));

        let state = Arc::new(RwLock::new(ListenerStateMachine::new(config.max_accept_retries)));
        state.write().await.process_event(ListenerEvent::StartRequested);
        state.write().await.process_event(ListenerEvent::Bound);
        (dispatcher, state)
    }

    async fn setup() -> (Acceptor, SocketAddr, Arc<RwLock<ListenerStateMachine>>) {
        let config = test_config();
        let (dispatcher, state) = parts(&config).await;

        let listener = bind("127.0.0.1", 0).await.expect("bind failed");
        let addr = listener.local_addr().unwrap();
        let source = TcpAcceptSource::new(listener);

        let acceptor = Acceptor::new(source, addr, config, dispatcher, state.clone());
        (acceptor, addr, state)
    }

    async fn request(addr: SocketAddr, line: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.expect("connect failed");
        stream.write_all(line.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    enum Step {
        Fail(io::ErrorKind),
        Connect(DuplexStream),
    }

    /// Hands out scripted accept results, then waits forever
    struct ScriptedSource {
        steps: VecDeque<Step>,
        open: Arc<AtomicBool>,
        reopens: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: steps.into(),
                open: Arc::new(AtomicBool::new(true)),
                reopens: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl AcceptSource for ScriptedSource {
        type Stream = DuplexStream;

        async fn accept(&mut self) -> io::Result<(DuplexStream, SocketAddr)> {
            match self.steps.pop_front() {
                Some(Step::Fail(kind)) => Err(io::Error::from(kind)),
                Some(Step::Connect(stream)) => Ok((stream, "127.0.0.1:5000".parse().unwrap())),
                None => std::future::pending().await,
            }
        }

        async fn reopen(&mut self, _addr: SocketAddr) -> io::Result<()> {
            self.reopens.fetch_add(1, Ordering::SeqCst);
            self.open.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn close(&mut self) -> bool {
            self.open.swap(false, Ordering::SeqCst)
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
    }

    async fn scripted(
        source: ScriptedSource,
    ) -> (Acceptor<ScriptedSource>, Arc<RwLock<ListenerStateMachine>>) {
        let config = test_config();
        let (dispatcher, state) = parts(&config).await;
        let addr = "127.0.0.1:7000".parse().unwrap();
        let acceptor = Acceptor::new(source, addr, config, dispatcher, state.clone());
        (acceptor, state)
    }

    #[tokio::test]
    async fn test_serves_connections_sequentially() {
        let (acceptor, addr, state) = setup().await;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(acceptor.run(shutdown_rx));

        assert_eq!(request(addr, &format!("{}\n", PING)).await, format!("{}\n", PING));
        assert_eq!(request(addr, "not json\n").await, "");
        assert_eq!(request(addr, &format!("{}\n", PING)).await, format!("{}\n", PING));
        assert_eq!(state.read().await.state(), ListenerState::Listening);

        shutdown.send(true).unwrap();
        task.await.unwrap().expect("acceptor failed");
        assert_eq!(state.read().await.state(), ListenerState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_closes_socket() {
        let (acceptor, addr, _state) = setup().await;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(acceptor.run(shutdown_rx));

        shutdown.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("acceptor did not stop")
            .unwrap()
            .expect("acceptor failed");

        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_stop_during_connection_closes_socket_first() {
        let (acceptor, addr, _state) = setup().await;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(acceptor.run(shutdown_rx));

        // Connected but silent, so the acceptor is busy serving it
        let mut client = TcpStream::connect(addr).await.expect("connect failed");
        tokio::time::sleep(Duration::from_millis(50)).await;

        shutdown.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(TcpStream::connect(addr).await.is_err());
        assert!(!task.is_finished());

        // The connection in progress still gets its answer
        client.write_all(format!("{}\n", PING).as_bytes()).await.unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert_eq!(response, format!("{}\n", PING));

        task.await.unwrap().expect("acceptor failed");
    }

    #[tokio::test]
    async fn test_dropped_controller_stops_loop() {
        let (acceptor, _addr, state) = setup().await;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(acceptor.run(shutdown_rx));

        drop(shutdown);
        task.await.unwrap().expect("acceptor failed");
        assert_eq!(state.read().await.state(), ListenerState::Stopped);
    }

    #[tokio::test]
    async fn test_recovers_after_accept_failures() {
        let (mut client, server) = duplex(1024);
        let source = ScriptedSource::new(vec![
            Step::Fail(io::ErrorKind::ConnectionAborted),
            Step::Fail(io::ErrorKind::Other),
            Step::Fail(io::ErrorKind::Interrupted),
            Step::Connect(server),
        ]);
        let reopens = source.reopens.clone();
        let (acceptor, state) = scripted(source).await;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(acceptor.run(shutdown_rx));

        client.write_all(format!("{}\n", PING).as_bytes()).await.unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert_eq!(response, format!("{}\n", PING));

        // Only the non-transient error recreated the socket
        assert_eq!(reopens.load(Ordering::SeqCst), 1);
        {
            let state = state.read().await;
            assert_eq!(state.state(), ListenerState::Listening);
            assert_eq!(state.consecutive_failures(), 0);
        }

        shutdown.send(true).unwrap();
        task.await.unwrap().expect("acceptor failed");
    }

    #[tokio::test]
    async fn test_retries_exhausted_stops_listener() {
        let steps = (0..11).map(|_| Step::Fail(io::ErrorKind::Other)).collect();
        let source = ScriptedSource::new(steps);
        let open = source.open.clone();
        let reopens = source.reopens.clone();
        let (acceptor, state) = scripted(source).await;
        let (_shutdown, shutdown_rx) = watch::channel(false);

        let result = acceptor.run(shutdown_rx).await;

        assert!(matches!(
            result,
            Err(ListenerError::RetriesExhausted { attempts: 11, .. })
        ));
        assert!(!open.load(Ordering::SeqCst));
        assert_eq!(reopens.load(Ordering::SeqCst), 10);
        assert_eq!(state.read().await.state(), ListenerState::Stopped);
    }

    #[test]
    fn test_transient_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::InvalidInput)));
    }
}
