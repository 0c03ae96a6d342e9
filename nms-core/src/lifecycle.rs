//! Shutdown signalling and the top-level client: initial registration, then both
//! heartbeat workers until shutdown or a terminal outcome.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::error::ClientError;
use crate::heartbeat::Heartbeat;
use crate::identity::ClientIdentity;
use crate::protocol::Timing;
use crate::register::{Registration, RegistrationEngine};
use crate::state::ProtocolState;
use crate::transport::{inboxes, pump, Transport, INBOX_CAPACITY};

/// Requests shutdown. Dropping it without triggering never shuts anything down.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Observed at every suspension point of the client.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is triggered.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        let triggered = rx.wait_for(|stop| *stop).await.is_ok();
        if !triggered {
            // Trigger dropped untriggered.
            std::future::pending::<()>().await;
        }
    }

    /// Drive `fut` to completion unless shutdown comes first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, ClientError> {
        tokio::select! {
            biased;
            _ = self.wait() => Err(ClientError::Shutdown),
            out = fut => Ok(out),
        }
    }

    pub async fn sleep(&self, duration: Duration) -> Result<(), ClientError> {
        self.run(tokio::time::sleep(duration)).await
    }
}

/// The whole protocol client over one transport.
pub struct Client {
    identity: Arc<ClientIdentity>,
    timing: Timing,
    transport: Arc<dyn Transport>,
    state: Arc<ProtocolState>,
}

impl Client {
    pub fn new(identity: ClientIdentity, transport: Arc<dyn Transport>, timing: Timing) -> Self {
        Self {
            identity: Arc::new(identity),
            timing,
            transport,
            state: Arc::new(ProtocolState::new()),
        }
    }

    pub fn state(&self) -> Arc<ProtocolState> {
        self.state.clone()
    }

    /// Register (O rounds), then run sender and receiver until `shutdown` fires or a
    /// worker ends with a terminal outcome. `on_registered` is called once with the
    /// initial registration.
    ///
    /// Returns `Ok(())` on shutdown. Every task is joined before returning.
    pub async fn run(
        &self,
        shutdown: Shutdown,
        on_registered: impl FnOnce(&Registration),
    ) -> Result<(), ClientError> {
        let (stop, local) = shutdown_channel();
        let (router, boxes) = inboxes(INBOX_CAPACITY);
        let mut tasks: JoinSet<Result<(), ClientError>> = JoinSet::new();
        tasks.spawn(pump(self.transport.clone(), router, local.clone()));

        let engine = Arc::new(RegistrationEngine::new(
            self.identity.clone(),
            self.timing,
            self.transport.clone(),
            boxes.registration,
            self.state.clone(),
            local.clone(),
        ));

        let registered = tokio::select! {
            res = engine.register(self.timing.rounds) => res,
            _ = shutdown.wait() => Err(ClientError::Shutdown),
        };
        let outcome = match registered {
            Ok(registration) => {
                on_registered(&registration);
                let heartbeat = Arc::new(Heartbeat::new(
                    self.identity.clone(),
                    self.timing,
                    self.transport.clone(),
                    boxes.alive,
                    self.state.clone(),
                    engine,
                    local.clone(),
                ));
                tasks.spawn(heartbeat.clone().sender_loop());
                tasks.spawn(heartbeat.receiver_loop());
                supervise(&mut tasks, &shutdown).await
            }
            Err(e) => Err(e),
        };

        stop.trigger();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) | Ok(Err(ClientError::Shutdown)) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "task ended during shutdown"),
                Err(e) => tracing::warn!(error = %e, "task panicked during shutdown"),
            }
        }

        match outcome {
            Err(ClientError::Shutdown) => Ok(()),
            other => other,
        }
    }
}

/// Wait for external shutdown or the first task that ends.
async fn supervise(
    tasks: &mut JoinSet<Result<(), ClientError>>,
    shutdown: &Shutdown,
) -> Result<(), ClientError> {
    tokio::select! {
        _ = shutdown.wait() => Ok(()),
        joined = tasks.join_next() => match joined {
            Some(Ok(Ok(()))) | None => Ok(()),
            Some(Ok(Err(e))) => Err(e),
            Some(Err(e)) => Err(ClientError::Worker(e.to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PacketType, Phase};
    use crate::testing::{client_identity, reply, ScriptedServer};

    #[tokio::test(start_paused = true)]
    async fn shutdown_wait_and_run() {
        let (trigger, shutdown) = shutdown_channel();
        assert!(!shutdown.is_triggered());
        let s = shutdown.clone();
        let sleeper = tokio::spawn(async move { s.sleep(Duration::from_secs(100)).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.trigger();
        assert!(matches!(sleeper.await.unwrap(), Err(ClientError::Shutdown)));
        assert!(shutdown.is_triggered());
        // Already triggered: nothing else runs.
        assert!(matches!(
            shutdown.run(async { 7 }).await,
            Err(ClientError::Shutdown)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_trigger_never_fires() {
        let (trigger, shutdown) = shutdown_channel();
        drop(trigger);
        assert_eq!(shutdown.run(async { 7 }).await.unwrap(), 7);
        assert!(shutdown.sleep(Duration::from_secs(5)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn run_registers_then_stops_on_shutdown() {
        let server = ScriptedServer::echoing("ABC123", "9000");
        let client = Client::new(client_identity(), server.clone(), Timing::default());
        let state = client.state();
        let (trigger, shutdown) = shutdown_channel();
        let task = tokio::spawn(async move {
            let mut seen = None;
            let res = client.run(shutdown, |r| seen = Some(r.clone())).await;
            (res, seen)
        });

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(state.phase(), Phase::Registered);
        assert!(server.sent_count(PacketType::AliveInf) >= 3);
        trigger.trigger();

        let (res, seen) = task.await.unwrap();
        assert!(res.is_ok());
        let seen = seen.unwrap();
        assert_eq!(seen.rounds, 1);
        assert_eq!(seen.tcp_port, Some(9000));

        // Nothing goes out after shutdown.
        let sent = server.sent().len();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(server.sent().len(), sent);
    }

    #[tokio::test(start_paused = true)]
    async fn run_reports_initial_rejection() {
        let server =
            ScriptedServer::new(|_| vec![reply(PacketType::RegisterRej, "000000", "blocked")]);
        let client = Client::new(client_identity(), server.clone(), Timing::default());
        let (_trigger, shutdown) = shutdown_channel();
        let err = client.run(shutdown, |_| {}).await.unwrap_err();
        assert!(matches!(err, ClientError::Rejected(ref r) if r == "blocked"));
        assert_eq!(server.sent_count(PacketType::AliveInf), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_initial_registration() {
        let server = ScriptedServer::silent();
        let client = Client::new(client_identity(), server.clone(), Timing::default());
        let (trigger, shutdown) = shutdown_channel();
        let task = tokio::spawn(async move { client.run(shutdown, |_| {}).await });
        tokio::time::sleep(Duration::from_secs(3)).await;
        trigger.trigger();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn worker_rejection_ends_client() {
        // ACK the registration, then answer the first ALIVE_INF with ALIVE_REJ and
        // the resulting re-registration with REGISTER_REJ.
        let mut registered = false;
        let server = ScriptedServer::new(move |p| match p.kind {
            PacketType::RegisterReq if !registered => {
                registered = true;
                vec![reply(PacketType::RegisterAck, "ABC123", "9000")]
            }
            PacketType::RegisterReq => vec![reply(PacketType::RegisterRej, "000000", "revoked")],
            PacketType::AliveInf => vec![reply(PacketType::AliveRej, "ABC123", "")],
            _ => vec![],
        });
        let client = Client::new(client_identity(), server.clone(), Timing::default());
        let (_trigger, shutdown) = shutdown_channel();
        let err = client.run(shutdown, |_| {}).await.unwrap_err();
        assert!(matches!(err, ClientError::Rejected(ref r) if r == "revoked"));
        assert_eq!(server.sent_count(PacketType::RegisterReq), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn no_alive_inf_during_receiver_reregistration() {
        // ALIVE_REJ on every heartbeat; re-registration requests go unanswered.
        let mut registered = false;
        let server = ScriptedServer::new(move |p| match p.kind {
            PacketType::RegisterReq if !registered => {
                registered = true;
                vec![reply(PacketType::RegisterAck, "ABC123", "9000")]
            }
            PacketType::AliveInf => vec![reply(PacketType::AliveRej, "ABC123", "")],
            _ => vec![],
        });
        let client = Client::new(client_identity(), server.clone(), Timing::default());
        let state = client.state();
        let (trigger, shutdown) = shutdown_channel();
        let task = tokio::spawn(async move { client.run(shutdown, |_| {}).await });

        tokio::time::sleep(Duration::from_secs(40)).await;
        trigger.trigger();
        assert!(task.await.unwrap().is_ok());

        let kinds: Vec<PacketType> = server.sent().iter().map(|p| p.kind).collect();
        assert_eq!(kinds[0], PacketType::RegisterReq);
        assert_eq!(kinds[1], PacketType::AliveInf);
        assert!(kinds.len() >= 2 + 2 * 6);
        assert!(kinds[2..].iter().all(|k| *k == PacketType::RegisterReq));
        assert_ne!(state.phase(), Phase::Registered);
    }

    #[tokio::test(start_paused = true)]
    async fn simultaneous_triggers_reregister_once() {
        // The third ALIVE_INF hits the pending threshold and draws an ALIVE_REJ at once.
        let mut reqs = 0;
        let mut alives = 0;
        let server = ScriptedServer::new(move |p| match p.kind {
            PacketType::RegisterReq => {
                reqs += 1;
                let rand = if reqs == 1 { "ABC123" } else { "NEW456" };
                vec![reply(PacketType::RegisterAck, rand, "9000")]
            }
            PacketType::AliveInf => {
                alives += 1;
                match alives {
                    1 | 2 => vec![],
                    3 => vec![reply(PacketType::AliveRej, "ABC123", "")],
                    _ => vec![reply(PacketType::AliveAck, "NEW456", "")],
                }
            }
            _ => vec![],
        });
        let client = Client::new(client_identity(), server.clone(), Timing::default());
        let state = client.state();
        let (trigger, shutdown) = shutdown_channel();
        let task = tokio::spawn(async move { client.run(shutdown, |_| {}).await });

        // ALIVE_INF at 0, 2 and 4.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(server.sent_count(PacketType::AliveInf), 3);
        assert_eq!(server.sent_count(PacketType::RegisterReq), 2);
        assert_eq!(state.epoch(), 2);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(server.sent_count(PacketType::RegisterReq), 2);
        assert_eq!(state.phase(), Phase::Registered);
        assert_eq!(state.server().unwrap().rand.as_bytes(), b"NEW456");

        trigger.trigger();
        assert!(task.await.unwrap().is_ok());
    }
}
