//! Scripted Huddle session.
//!
//! Runs two async runtimes (`alice` and `bob`) against one in-memory
//! [`SimBackend`] and has them chat in a single room. The script is driven by a
//! seeded RNG, so the same seed always produces the same conversation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::{sync::Arc, time::Duration};

use huddle_app::{Collaborators, Command, Runtime, RuntimeConfig, RuntimeError, RuntimeHandle, SystemEnv};
use huddle_client::{ConversationView, UserProfile};
use huddle_core::{Delivery, SubscriptionPhase};
use huddle_harness::{SimBackend, SimEnv};
use huddle_proto::{ProtocolError, Room, RoomId, UserId};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::task::{JoinError, JoinHandle};

/// How long a single step may take before the scenario gives up.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(5);

const LINES: &[&str] = &[
    "morning!",
    "did the deploy go out?",
    "looks good on my side",
    "lunch?",
    "pushing a fix now",
    "can you review when you get a sec",
    "👍",
    "back in 10",
];

/// Scenario failure.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// Room or user id failed validation
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] ProtocolError),

    /// A runtime stopped accepting commands
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// A step did not complete in time
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// A runtime task panicked or was cancelled
    #[error("runtime task failed: {0}")]
    Task(#[from] JoinError),

    /// The users finished with different confirmed timelines
    #[error("timelines diverged in {0}")]
    Diverged(RoomId),
}

/// What to run.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    /// Public room both users join
    pub room: String,
    /// Number of messages exchanged
    pub messages: usize,
    /// Script seed
    pub seed: u64,
    /// Per-step timeout
    pub step_timeout: Duration,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self { room: "general".into(), messages: 5, seed: 0, step_timeout: DEFAULT_STEP_TIMEOUT }
    }
}

/// Outcome of a finished scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioReport {
    /// Room the conversation happened in
    pub room_id: RoomId,
    /// `sender: text` lines as stored by the backend
    pub transcript: Vec<String>,
    /// Whether both users ended with the same confirmed timeline
    pub converged: bool,
}

impl ScenarioReport {
    /// Turn a diverged run into an error.
    ///
    /// # Errors
    ///
    /// - `SimError::Diverged` if the users ended with different timelines
    pub fn ensure_converged(self) -> Result<Self, SimError> {
        if self.converged { Ok(self) } else { Err(SimError::Diverged(self.room_id)) }
    }
}

struct Participant {
    user_id: UserId,
    handle: RuntimeHandle,
    task: JoinHandle<()>,
}

impl Participant {
    fn spawn(backend: &Arc<SimBackend>, name: &str) -> Result<Self, SimError> {
        let user_id = UserId::new(name)?;
        let profile = UserProfile::new(user_id.clone(), name);
        let collaborators = Collaborators::shared(Arc::clone(backend));
        let (runtime, handle) = Runtime::new(SystemEnv::new(), &profile, collaborators, RuntimeConfig::default());
        Ok(Self { user_id, handle, task: tokio::spawn(runtime.run()) })
    }

    async fn wait_for(
        &mut self,
        what: &'static str,
        timeout: Duration,
        predicate: impl FnMut(&ConversationView) -> bool,
    ) -> Result<ConversationView, SimError> {
        match tokio::time::timeout(timeout, self.handle.wait_for(predicate)).await {
            Ok(view) => Ok(view?),
            Err(_) => Err(SimError::Timeout(what)),
        }
    }

    async fn quit(self) -> Result<(), SimError> {
        self.handle.send(Command::Quit).await?;
        self.task.await?;
        Ok(())
    }
}

fn confirmed(view: &ConversationView) -> Vec<String> {
    view.messages
        .iter()
        .filter(|entry| entry.delivery == Delivery::Sent)
        .map(|entry| entry.message.id.to_string())
        .collect()
}

/// Run the scripted conversation to completion.
///
/// # Errors
///
/// - `SimError::InvalidId` if `config.room` is not a valid public room id
/// - `SimError::Timeout` if a runtime does not reach the expected state
/// - `SimError::Runtime` or `SimError::Task` if a runtime exits early
pub async fn run_scenario(config: &ScenarioConfig) -> Result<ScenarioReport, SimError> {
    let room_id = RoomId::public(config.room.as_str())?;
    let room = Room::public(room_id.clone(), config.room.as_str());
    let backend = Arc::new(SimBackend::new(SimEnv::with_seed(config.seed)));
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

    let mut users = [Participant::spawn(&backend, "alice")?, Participant::spawn(&backend, "bob")?];
    for user in &mut users {
        user.handle.send(Command::SwitchRoom(room.clone())).await?;
        user.wait_for("subscription", config.step_timeout, |v| v.subscription == SubscriptionPhase::Live).await?;
    }
    tracing::info!(room = %room_id, "both users live");

    for sent in 1..=config.messages {
        let speaker = rng.gen_range(0..users.len());
        let text = LINES[rng.gen_range(0..LINES.len())];

        let user = &mut users[speaker];
        user.handle.send(Command::NotifyTyping).await?;
        user.handle.send(Command::Send { text: text.to_string(), attachment: None }).await?;
        tracing::info!(user = %user.user_id, text, "sent");

        for user in &mut users {
            user.wait_for("delivery", config.step_timeout, |v| {
                confirmed(v).len() >= sent && v.pending().next().is_none()
            })
            .await?;
        }
    }

    let [alice, bob] = users;
    let converged = confirmed(&alice.handle.view()) == confirmed(&bob.handle.view());
    if !converged {
        tracing::warn!(room = %room_id, "timelines diverged");
    }
    alice.quit().await?;
    bob.quit().await?;

    let transcript =
        backend.messages(&room_id).iter().map(|message| format!("{}: {}", message.sender_id, message.text)).collect();
    Ok(ScenarioReport { room_id, transcript, converged })
}
