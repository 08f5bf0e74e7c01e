//! Runs a [`RulesAssistant`] on a background task so a front end stays
//! responsive while a turn is in flight. One request at a time.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use {
    grimoire_agents::RunnerEvent,
    grimoire_memory::RulebookStatus,
    grimoire_sessions::{SessionEvent, SessionEventBus, SharedRulesLog},
    tokio::{
        sync::{broadcast, mpsc},
        task::JoinHandle,
    },
    tracing::{debug, info},
};

use crate::assistant::RulesAssistant;

/// Output of the worker task.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// Agent progress during a turn.
    Progress(RunnerEvent),
    /// A finished turn with the referenced rules as they stand afterwards.
    Response {
        text: String,
        referenced_rules: Vec<String>,
    },
    /// The turn failed; carries the user-facing error text.
    Failed(String),
    /// The conversation was reset.
    SessionStarted { session_id: String },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WorkerError {
    #[error("a request is already in progress")]
    Busy,
    #[error("assistant worker has stopped")]
    Stopped,
}

enum Request {
    Send(String),
    NewSession,
}

/// Handle to the background assistant. Dropping it stops the task once the
/// current turn finishes.
pub struct AssistantWorker {
    requests: mpsc::Sender<Request>,
    busy: Arc<AtomicBool>,
    rules_log: SharedRulesLog,
    events: SessionEventBus,
    status: RulebookStatus,
    session_id: Arc<Mutex<String>>,
    task: JoinHandle<()>,
}

impl AssistantWorker {
    /// Move `assistant` onto a tokio task. Returns the handle and the stream of
    /// worker events.
    pub fn spawn(assistant: RulesAssistant) -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (req_tx, req_rx) = mpsc::channel(1);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let busy = Arc::new(AtomicBool::new(false));
        let session_id = Arc::new(Mutex::new(assistant.session_id().to_string()));

        let worker = Self {
            requests: req_tx,
            busy: Arc::clone(&busy),
            rules_log: assistant.rules_log(),
            events: assistant.events(),
            status: assistant.status().clone(),
            session_id: Arc::clone(&session_id),
            task: tokio::spawn(run(assistant, req_rx, event_tx, busy, session_id)),
        };
        (worker, event_rx)
    }

    /// Queue a message. Fails with [`WorkerError::Busy`] while another
    /// request is outstanding.
    pub fn submit(&self, text: impl Into<String>) -> Result<(), WorkerError> {
        self.dispatch(Request::Send(text.into()))
    }

    /// Start a fresh conversation; answered with [`WorkerEvent::SessionStarted`].
    pub fn new_session(&self) -> Result<(), WorkerError> {
        self.dispatch(Request::NewSession)
    }

    fn dispatch(&self, request: Request) -> Result<(), WorkerError> {
        if self.task.is_finished() {
            return Err(WorkerError::Stopped);
        }
        if self.busy.swap(true, Ordering::AcqRel) {
            return Err(WorkerError::Busy);
        }
        self.requests.try_send(request).map_err(|e| {
            self.busy.store(false, Ordering::Release);
            match e {
                mpsc::error::TrySendError::Full(_) => WorkerError::Busy,
                mpsc::error::TrySendError::Closed(_) => WorkerError::Stopped,
            }
        })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn referenced_rules(&self) -> Vec<String> {
        self.rules_log.snapshot()
    }

    pub fn clear_referenced_rules(&self) {
        self.rules_log.clear();
        let session_id = match self.session_id.lock() {
            Ok(id) => id.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        self.events.publish(SessionEvent::Cleared { session_id });
    }

    /// Rulebook status captured when the worker started.
    pub fn status(&self) -> &RulebookStatus {
        &self.status
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Stop accepting requests and wait for the task to finish.
    pub async fn shutdown(self) {
        let Self { requests, task, .. } = self;
        drop(requests);
        let _ = task.await;
    }
}

async fn run(
    mut assistant: RulesAssistant,
    mut requests: mpsc::Receiver<Request>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    busy: Arc<AtomicBool>,
    current_session: Arc<Mutex<String>>,
) {
    debug!("assistant worker started");
    while let Some(request) = requests.recv().await {
        let event = match request {
            Request::Send(text) => {
                let progress = events.clone();
                let on_event: &(dyn Fn(RunnerEvent) + Send + Sync) = &move |e: RunnerEvent| {
                    let _ = progress.send(WorkerEvent::Progress(e));
                };
                match assistant.try_send_message(&text, Some(on_event)).await {
                    Ok(text) => WorkerEvent::Response {
                        text,
                        referenced_rules: assistant.get_referenced_rules(),
                    },
                    Err(e) => WorkerEvent::Failed(format!("Error: {e}")),
                }
            },
            Request::NewSession => {
                let session_id = assistant.new_session().to_string();
                match current_session.lock() {
                    Ok(mut id) => id.clone_from(&session_id),
                    Err(poisoned) => poisoned.into_inner().clone_from(&session_id),
                }
                WorkerEvent::SessionStarted { session_id }
            },
        };
        // Free the slot before replying so a caller reacting to the reply can
        // submit straight away.
        busy.store(false, Ordering::Release);
        if events.send(event).is_err() {
            break;
        }
    }
    info!("assistant worker stopped");
}
