//! Conversation Demo — full voice session against real or placeholder backends.
//!
//! Speaks to the microphone, watches the session segment utterances, and
//! prints each event as turns flow through transcription and dispatch:
//! - **STT**: `SpeechApiClient` if `STT_API_URL` is set, else a placeholder.
//! - **Agent**: `ChatApiDispatcher` if `CHAT_API_URL` is set, else a
//!   placeholder that answers after a short delay.
//!
//! Set endpoints in `.env` to talk to real services. Press Ctrl+C to stop.

use kaiwa_voice::{
    ChatApiDispatcher, CpalInput, PlaceholderDispatcher, PlaceholderTranscriber, SessionConfig,
    SessionController, SessionEvent, SpeechApiClient, TranscriptionClient, TurnDispatcher,
};
use std::sync::Arc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Conversation Demo — speak, pause, and wait for the reply");
    info!("Set STT_API_URL / CHAT_API_URL in .env for production backends.");
    info!("Press Ctrl+C to stop.\n");

    let stt: Arc<dyn TranscriptionClient> = match SpeechApiClient::from_env() {
        Ok(client) => {
            info!("STT: using speech API at {}", client.endpoint);
            Arc::new(client)
        }
        Err(_) => {
            info!("STT: using placeholder (set STT_API_URL for real transcription).");
            Arc::new(PlaceholderTranscriber::with_response(
                "placeholder utterance".to_string(),
            ))
        }
    };

    let dispatcher: Arc<dyn TurnDispatcher> = match ChatApiDispatcher::from_env() {
        Ok(client) => {
            info!("Agent: dispatching turns to {}", client.endpoint);
            Arc::new(client)
        }
        Err(_) => {
            info!("Agent: using placeholder (set CHAT_API_URL for a real agent).");
            Arc::new(PlaceholderDispatcher::default())
        }
    };

    let mut controller = SessionController::new(
        SessionConfig::default(),
        Arc::new(CpalInput::new()),
        stt,
        dispatcher,
    )?;

    let events = controller
        .take_event_receiver()
        .expect("event receiver taken once");
    let mut state_rx = controller.watch_state();

    controller.activate()?;

    let mut events = UnboundedReceiverStream::new(events);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state_rx.changed() => {
                if changed.is_ok() {
                    info!("state: {:?}", *state_rx.borrow());
                }
            }
            Some(event) = events.next() => match event {
                SessionEvent::UtteranceStarted { .. } => info!("🎤 utterance started"),
                SessionEvent::UtteranceDiscarded { bytes, reason, .. } => {
                    info!("🗑️ discarded ({} bytes): {}", bytes, reason)
                }
                SessionEvent::TranscriptReady { text, .. } => info!("📝 \"{}\"", text),
                SessionEvent::TurnDispatched { .. } => info!("📨 turn dispatched"),
                SessionEvent::ReplySettled { status, .. } => info!("💬 reply settled: {:?}", status),
                SessionEvent::ListeningResumed { .. } => info!("👂 listening again"),
                SessionEvent::Failure { error, .. } => info!("⚠️ {}", error),
            },
        }
    }

    controller.deactivate().await;
    info!("Session closed.");
    Ok(())
}
