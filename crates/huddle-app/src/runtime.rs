//! Async runtime.
//!
//! Event loop that drives a [`Conversation`] against backend collaborators.
//! Uses `tokio::select!` to handle UI commands, collaborator completions and
//! the periodic tick concurrently.
//!
//! Collaborator calls run as spawned tasks; their results come back through a
//! single completion channel, so the conversation itself is only ever touched
//! from the loop. The rendered view is published through a `watch` channel
//! whenever it changes.

use std::collections::HashMap;

use huddle_client::{
    Conversation, ConversationAction, ConversationEvent, ConversationView, Environment,
};
use huddle_core::{CollaboratorError, SubscriptionHandle};
use huddle_proto::PresenceScope;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::{
    collaborators::{
        Collaborators, Completion, EventSink, Identity, LiveStream, Persistence, PresenceChannel,
        PresenceSink, PresenceWatchHandle,
    },
    command::{Command, Signal},
    config::RuntimeConfig,
    error::RuntimeError,
};

/// Registration state of one presence watch.
#[derive(Debug, Clone, Copy)]
enum WatchSlot {
    /// `on_sync` is in flight
    Pending,
    Active(PresenceWatchHandle),
}

/// Async runtime for one signed-in user.
///
/// # Type Parameters
///
/// - `E`: Environment for time and randomness
/// - `P`, `S`, `C`: Persistence, live stream and presence collaborators
pub struct Runtime<E, P, S, C>
where
    E: Environment,
{
    env: E,
    conversation: Conversation<E>,
    backend: Collaborators<P, S, C>,
    config: RuntimeConfig,

    commands: mpsc::Receiver<Command>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
    view: watch::Sender<ConversationView>,
    signals: mpsc::UnboundedSender<Signal>,

    watches: HashMap<PresenceScope, WatchSlot>,
    // Subscribe and presence-watch calls whose handle has not come back yet
    acquiring: Vec<JoinHandle<()>>,
}

impl<E, P, S, C> Runtime<E, P, S, C>
where
    E: Environment,
    P: Persistence,
    S: LiveStream,
    C: PresenceChannel,
{
    /// Create a runtime and the handle the UI talks to it through.
    pub fn new(
        env: E,
        identity: &impl Identity,
        backend: Collaborators<P, S, C>,
        config: RuntimeConfig,
    ) -> (Self, RuntimeHandle) {
        let conversation = Conversation::new(env.clone(), identity.current_user(), config.conversation.clone());

        let (commands_tx, commands) = mpsc::channel(config.command_buffer.max(1));
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let (view, view_rx) = watch::channel(conversation.view());
        let (signals, signals_rx) = mpsc::unbounded_channel();

        let runtime = Self {
            env,
            conversation,
            backend,
            config,
            commands,
            completions_tx,
            completions,
            view,
            signals,
            watches: HashMap::new(),
            acquiring: Vec::new(),
        };
        let handle = RuntimeHandle { commands: commands_tx, view: view_rx, signals: signals_rx };
        (runtime, handle)
    }

    /// Conversation state, for inspection before the loop starts.
    pub fn conversation(&self) -> &Conversation<E> {
        &self.conversation
    }

    /// Run the main event loop.
    ///
    /// Returns after [`Command::Quit`] or once every [`RuntimeHandle`] is
    /// dropped. Teardown calls (unsubscribe, presence release) are awaited
    /// before returning, including releases for subscriptions and watches
    /// that were still opening at shutdown.
    pub async fn run(mut self) {
        self.dispatch(ConversationEvent::Start);
        self.publish();

        let mut tick_interval = tokio::time::interval(self.config.tick_interval);

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(event) = command.and_then(Command::into_event) else {
                        break;
                    };
                    self.dispatch(event);
                }

                // Never closes: the runtime holds a sender
                Some(completion) = self.completions.recv() => {
                    self.complete(completion);
                }

                _ = tick_interval.tick() => {
                    let now = self.env.now();
                    self.dispatch(ConversationEvent::Tick { now });
                }
            }

            self.publish();
        }

        self.shutdown().await;
    }

    async fn shutdown(mut self) {
        let teardown = self.dispatch(ConversationEvent::Shutdown);
        join_all(teardown, "teardown task failed").await;

        // Handles that arrive now have no owner left; release them here
        let acquiring = std::mem::take(&mut self.acquiring);
        join_all(acquiring, "subscribe or watch task failed").await;
        let mut releases = Vec::new();
        while let Ok(completion) = self.completions.try_recv() {
            match completion {
                Completion::Opened { epoch, handle } => {
                    tracing::debug!(%epoch, ?handle, "closing stream opened during shutdown");
                    releases.push(self.release_stream(handle));
                },
                Completion::Watched { scope, result: Ok(handle) } => {
                    tracing::debug!(%scope, "releasing presence watch opened during shutdown");
                    releases.push(self.release_watch(handle));
                },
                _ => {},
            }
        }
        join_all(releases, "release task failed").await;

        self.publish();
        tracing::info!("runtime stopped");
    }

    /// Feed a collaborator result into the conversation.
    fn complete(&mut self, completion: Completion) {
        if let Completion::Watched { scope, result } = completion {
            self.on_watched(scope, result);
            return;
        }
        if let Some(event) = completion.into_event() {
            self.dispatch(event);
        }
    }

    /// Process one event and execute the resulting actions.
    ///
    /// Returns the spawned collaborator tasks.
    fn dispatch(&mut self, event: ConversationEvent<E::Instant>) -> Vec<JoinHandle<()>> {
        match self.conversation.handle(event) {
            Ok(actions) => actions.into_iter().filter_map(|action| self.execute(action)).collect(),
            Err(error) => {
                tracing::debug!(%error, "command rejected");
                self.signal(Signal::Rejected(error));
                Vec::new()
            },
        }
    }

    /// Publish the view if it changed since the last publish.
    fn publish(&self) {
        let conversation = &self.conversation;
        self.view.send_if_modified(|current| {
            let next = conversation.view();
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn signal(&self, signal: Signal) {
        if self.signals.send(signal).is_err() {
            tracing::trace!("no signal receiver");
        }
    }

    fn execute(&mut self, action: ConversationAction) -> Option<JoinHandle<()>> {
        let tx = self.completions_tx.clone();

        let task = match action {
            ConversationAction::FetchHistory(request) => {
                let persistence = self.backend.persistence.clone();
                let before = request.kind.before().cloned();
                tokio::spawn(async move {
                    let result = persistence.fetch_messages(request.room_id, before, request.limit).await;
                    forward(&tx, Completion::History { request: request.id, result });
                })
            },
            ConversationAction::InsertMessage { local_id, draft } => {
                let persistence = self.backend.persistence.clone();
                tokio::spawn(async move {
                    let result = persistence.insert_message(draft).await;
                    forward(&tx, Completion::Persisted { local_id, result });
                })
            },
            ConversationAction::UpdateMessage { request, id, patch } => {
                let persistence = self.backend.persistence.clone();
                tokio::spawn(async move {
                    let result = persistence.update_message(id, patch).await.map(Some);
                    forward(&tx, Completion::Written { request, result });
                })
            },
            ConversationAction::DeleteMessage { request, id } => {
                let persistence = self.backend.persistence.clone();
                tokio::spawn(async move {
                    let result = persistence.delete_message(id).await.map(|()| None);
                    forward(&tx, Completion::Written { request, result });
                })
            },
            ConversationAction::ToggleReaction { request, id, emoji, user_id } => {
                let persistence = self.backend.persistence.clone();
                tokio::spawn(async move {
                    let result = persistence.toggle_reaction(id, emoji, user_id).await.map(|()| None);
                    forward(&tx, Completion::Written { request, result });
                })
            },
            ConversationAction::Subscribe { room_id, epoch } => {
                let stream = self.backend.stream.clone();
                let sink = EventSink::new(epoch, tx.clone());
                let task = tokio::spawn(async move {
                    let completion = match stream.subscribe(room_id, sink).await {
                        Ok(handle) => Completion::Opened { epoch, handle },
                        Err(error) => Completion::OpenFailed { epoch, reason: error.to_string() },
                    };
                    forward(&tx, completion);
                });
                self.track_acquiring(task);
                return None;
            },
            ConversationAction::Unsubscribe { handle } => self.release_stream(handle),
            ConversationAction::TrackPresence { scope, state } => {
                let presence = self.backend.presence.clone();
                tokio::spawn(async move {
                    if let Err(error) = presence.track(scope.clone(), state).await {
                        tracing::warn!(%scope, %error, "presence track failed");
                    }
                })
            },
            ConversationAction::WatchPresence { scope } => {
                self.watch(scope, tx);
                return None;
            },
            ConversationAction::UnwatchPresence { scope } => self.unwatch(&scope)?,
            ConversationAction::HistoryPrepended { room_id, count } => {
                self.signal(Signal::HistoryPrepended { room_id, count });
                return None;
            },
            ConversationAction::Notify(notice) => {
                self.signal(Signal::Notice(notice));
                return None;
            },
        };
        Some(task)
    }

    fn watch(&mut self, scope: PresenceScope, tx: mpsc::UnboundedSender<Completion>) {
        if self.watches.contains_key(&scope) {
            return;
        }
        self.watches.insert(scope.clone(), WatchSlot::Pending);

        let presence = self.backend.presence.clone();
        let sink = PresenceSink::new(scope.clone(), tx.clone());
        let task = tokio::spawn(async move {
            let result = presence.on_sync(scope.clone(), sink).await;
            forward(&tx, Completion::Watched { scope, result });
        });
        self.track_acquiring(task);
    }

    fn track_acquiring(&mut self, task: JoinHandle<()>) {
        self.acquiring.retain(|pending| !pending.is_finished());
        self.acquiring.push(task);
    }

    fn unwatch(&mut self, scope: &PresenceScope) -> Option<JoinHandle<()>> {
        // A pending registration is released when its handle arrives
        let WatchSlot::Active(handle) = self.watches.remove(scope)? else {
            return None;
        };
        Some(self.release_watch(handle))
    }

    fn on_watched(
        &mut self,
        scope: PresenceScope,
        result: Result<PresenceWatchHandle, CollaboratorError>,
    ) {
        let slot = self.watches.get(&scope).copied();
        match (result, slot) {
            (Ok(handle), Some(WatchSlot::Pending)) => {
                tracing::debug!(%scope, "presence watch active");
                self.watches.insert(scope, WatchSlot::Active(handle));
            },
            (Ok(handle), _) => {
                tracing::debug!(%scope, "releasing superseded presence watch");
                self.release_watch(handle);
            },
            (Err(error), Some(WatchSlot::Pending)) => {
                tracing::warn!(%scope, %error, "presence watch failed");
                self.watches.remove(&scope);
            },
            (Err(error), _) => {
                tracing::debug!(%scope, %error, "superseded presence watch failed");
            },
        }
    }

    fn release_watch(&self, handle: PresenceWatchHandle) -> JoinHandle<()> {
        let presence = self.backend.presence.clone();
        tokio::spawn(async move { presence.unwatch(handle).await })
    }

    fn release_stream(&self, handle: SubscriptionHandle) -> JoinHandle<()> {
        let stream = self.backend.stream.clone();
        tokio::spawn(async move { stream.unsubscribe(handle).await })
    }
}

/// Hand a collaborator result back to the loop.
fn forward(tx: &mpsc::UnboundedSender<Completion>, completion: Completion) {
    if tx.send(completion).is_err() {
        tracing::debug!("runtime stopped, dropping completion");
    }
}

async fn join_all(tasks: Vec<JoinHandle<()>>, context: &'static str) {
    for task in tasks {
        if let Err(error) = task.await {
            tracing::warn!(%error, "{context}");
        }
    }
}

/// UI side of a [`Runtime`].
#[derive(Debug)]
pub struct RuntimeHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<ConversationView>,
    signals: mpsc::UnboundedReceiver<Signal>,
}

impl RuntimeHandle {
    /// Queue a command.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Stopped` if the runtime has exited
    pub async fn send(&self, command: Command) -> Result<(), RuntimeError> {
        self.commands.send(command).await.map_err(|_| RuntimeError::Stopped)
    }

    /// Latest published view.
    pub fn view(&self) -> ConversationView {
        self.view.borrow().clone()
    }

    /// Wait for the next published view.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Stopped` if the runtime has exited
    pub async fn changed(&mut self) -> Result<ConversationView, RuntimeError> {
        self.view.changed().await.map_err(|_| RuntimeError::Stopped)?;
        Ok(self.view.borrow_and_update().clone())
    }

    /// Wait until the published view satisfies `predicate`.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Stopped` if the runtime exits first
    pub async fn wait_for(
        &mut self,
        predicate: impl FnMut(&ConversationView) -> bool,
    ) -> Result<ConversationView, RuntimeError> {
        self.view.wait_for(predicate).await.map(|view| view.clone()).map_err(|_| RuntimeError::Stopped)
    }

    /// Next one-off signal. `None` once the runtime has exited and every
    /// signal was consumed.
    pub async fn next_signal(&mut self) -> Option<Signal> {
        self.signals.recv().await
    }

    /// Next signal if one is queued.
    pub fn try_signal(&mut self) -> Option<Signal> {
        self.signals.try_recv().ok()
    }
}
