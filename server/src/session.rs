//! One connection, one coordinator
//!
//! The session is an actor: a single task owns the coordinator and the
//! outbound half of the socket. Engine runs happen in spawned tasks that
//! report back over a channel, so every state change and every write to the
//! socket happens inside this loop.

use crate::coordinator::{Coordinator, SetOutcome};
use crate::error::PipelineError;
use crate::invoker::{run_pipeline, Compute, ComputeRequest};
use futures::{Sink, SinkExt, Stream, StreamExt};
use gn_packet::{ClientMessage, Demuxed, ParameterSnapshot, ServerMessage};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Frames coming off the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

/// Frames going out on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Binary(Vec<u8>),
}

type RunResult = Result<Demuxed, PipelineError>;

#[derive(Debug)]
enum Event {
    DebounceElapsed,
    BuildDone(RunResult),
    SchemaDone(RunResult),
}

struct Session<C> {
    compute: Arc<C>,
    debounce: Duration,
    coordinator: Coordinator,
    events: mpsc::UnboundedSender<Event>,
}

/// Serve one connection until the peer closes it or a write fails.
///
/// Builds still running at that point finish on their own; their results go
/// nowhere.
pub async fn run_session<C, I, O>(
    compute: Arc<C>,
    debounce: Duration,
    mut inbound: I,
    mut outbound: O,
    mut changes: Option<broadcast::Receiver<()>>,
) where
    C: Compute,
    I: Stream<Item = Inbound> + Unpin,
    O: Sink<Outbound> + Unpin,
    O::Error: Display,
{
    let (events, mut events_rx) = mpsc::unbounded_channel();
    let mut session = Session {
        compute,
        debounce,
        coordinator: Coordinator::new(),
        events,
    };
    info!("Session opened");

    loop {
        let reply = tokio::select! {
            frame = inbound.next() => match frame {
                Some(Inbound::Text(text)) => session.on_text(&text),
                Some(Inbound::Binary(bytes)) => {
                    debug!("Ignoring {} byte binary frame", bytes.len());
                    None
                }
                Some(Inbound::Close) | None => break,
            },
            Some(event) = events_rx.recv() => session.on_event(event),
            () = next_change(&mut changes) => {
                session.on_external_change();
                None
            }
        };

        if let Some(frame) = reply {
            if let Err(e) = outbound.send(frame).await {
                warn!("Send failed, dropping session: {}", e);
                break;
            }
        }
    }

    info!("Session closed");
}

/// Resolves on the next asset change; never, without a watcher.
async fn next_change(changes: &mut Option<broadcast::Receiver<()>>) {
    let Some(rx) = changes.as_mut() else {
        return std::future::pending().await;
    };
    match rx.recv().await {
        // missed notifications still mean "something changed"
        Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => return,
        Err(broadcast::error::RecvError::Closed) => {}
    }
    *changes = None;
    std::future::pending().await
}

impl<C: Compute> Session<C> {
    fn on_text(&mut self, text: &str) -> Option<Outbound> {
        match ClientMessage::parse(text) {
            Ok(ClientMessage::Schema) => {
                debug!("Schema requested");
                self.spawn_run(ComputeRequest::schema(), Event::SchemaDone);
                None
            }
            Ok(ClientMessage::Set { values }) => {
                debug!("Set {} value(s)", values.len());
                let outcome = self.coordinator.on_set(&values);
                self.apply(outcome);
                None
            }
            Err(e) => {
                warn!("Rejected message: {}", e);
                Some(Outbound::Text(ServerMessage::error_json(e.to_string())))
            }
        }
    }

    fn on_external_change(&mut self) {
        info!("Asset changed on disk, rebuilding");
        let outcome = self.coordinator.on_external_change();
        self.apply(outcome);
    }

    fn apply(&mut self, outcome: SetOutcome) {
        match outcome {
            SetOutcome::ScheduleDebounce => {
                let events = self.events.clone();
                let delay = self.debounce;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = events.send(Event::DebounceElapsed);
                });
            }
            SetOutcome::Absorbed => {}
            SetOutcome::Queued => debug!(
                "Build in flight, follow-up queued with {} value(s)",
                self.coordinator.latest().len()
            ),
        }
    }

    fn on_event(&mut self, event: Event) -> Option<Outbound> {
        match event {
            Event::DebounceElapsed => {
                if let Some(snapshot) = self.coordinator.on_debounce_elapsed() {
                    self.start_build(snapshot);
                }
                None
            }
            Event::BuildDone(result) => {
                debug!(
                    "Build finished ({:?}, follow-up pending: {})",
                    self.coordinator.phase(),
                    self.coordinator.is_pending()
                );
                if let Some(snapshot) = self.coordinator.on_build_finished() {
                    self.start_build(snapshot);
                }
                Some(reply(result))
            }
            Event::SchemaDone(result) => Some(reply(result)),
        }
    }

    fn start_build(&self, snapshot: ParameterSnapshot) {
        debug!("Building with {} value(s)", snapshot.len());
        self.spawn_run(ComputeRequest::mesh(snapshot), Event::BuildDone);
    }

    fn spawn_run(&self, request: ComputeRequest, done: fn(RunResult) -> Event) {
        let compute = Arc::clone(&self.compute);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = run_pipeline(compute.as_ref(), request).await;
            // fails only once the session is gone
            let _ = events.send(done(result));
        });
    }
}

fn reply(result: RunResult) -> Outbound {
    match result {
        Ok(Demuxed::Mesh(bytes)) => Outbound::Binary(bytes),
        Ok(Demuxed::Schema(text)) => Outbound::Text(text),
        Err(e) => Outbound::Text(ServerMessage::error_json(e.to_string())),
    }
}
