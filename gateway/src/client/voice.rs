//! Client orchestration: microphone → relay → speakers.

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::capture::CaptureReceiver;
use super::playback::{AudioOutput, PlaybackScheduler};
use super::transport::{TransportConfig, TransportEvent, TransportResult, TransportSession};
use crate::core::protocol::{ControlMessage, Frame};

/// User-facing notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientNotice {
    Connected,
    Status(String),
    Error(String),
    SessionTimeout(String),
    TurnComplete,
    Reconnecting { attempt: u32 },
    Disconnected { code: u16, reason: String },
}

/// User actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceCommand {
    /// Cut the current reply short.
    Interrupt,
    /// End the call.
    Hangup,
}

pub struct VoiceClient<O: AudioOutput> {
    transport: TransportSession,
    events: mpsc::Receiver<TransportEvent>,
    playback: PlaybackScheduler<O>,
    capture: CaptureReceiver,
    notices: mpsc::UnboundedSender<ClientNotice>,
}

impl<O: AudioOutput> VoiceClient<O> {
    pub fn new(
        config: TransportConfig,
        output: O,
        playback_sample_rate: u32,
        capture: CaptureReceiver,
        notices: mpsc::UnboundedSender<ClientNotice>,
    ) -> Self {
        let (transport, events) = TransportSession::new(config);
        Self {
            transport,
            events,
            playback: PlaybackScheduler::new(output, playback_sample_rate),
            capture,
            notices,
        }
    }

    /// Connect and run until hangup or until the channel is gone for good.
    ///
    /// A failed first connection is reported as an error notice and returned.
    pub async fn run(mut self, mut commands: mpsc::Receiver<VoiceCommand>) -> TransportResult<()> {
        if let Err(e) = self.transport.open().await {
            self.notify(ClientNotice::Error(e.to_string()));
            return Err(e);
        }

        let mut capture_open = true;
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(VoiceCommand::Interrupt) => self.interrupt(),
                    Some(VoiceCommand::Hangup) | None => {
                        info!("Hanging up");
                        self.playback.stop_all();
                        self.transport.close().await?;
                        return Ok(());
                    }
                },

                block = self.capture.recv(), if capture_open => match block {
                    Some(pcm) => {
                        self.transport.send(pcm);
                    }
                    None => {
                        debug!("Capture stopped");
                        capture_open = false;
                    }
                },

                event = self.events.recv() => match event {
                    Some(TransportEvent::Closed { code, reason }) => {
                        self.playback.stop_all();
                        self.notify(ClientNotice::Disconnected { code, reason });
                        return Ok(());
                    }
                    Some(event) => self.handle_event(event),
                    None => return Ok(()),
                },
            }
        }
    }

    /// Stop local playback first, then ask the relay to stop the reply.
    fn interrupt(&mut self) {
        self.playback.stop_all();
        self.transport.send_control(&ControlMessage::interruption());
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened { .. } => self.notify(ClientNotice::Connected),
            TransportEvent::Frame(Frame::Audio(pcm)) => {
                self.playback.enqueue(&pcm);
            }
            TransportEvent::Frame(Frame::TurnComplete) => self.notify(ClientNotice::TurnComplete),
            TransportEvent::Frame(Frame::Interruption) => self.playback.stop_all(),
            TransportEvent::Control(message) => self.handle_control(message),
            TransportEvent::Reconnecting { attempt, .. } => {
                // The relay starts a fresh session; nothing queued is still wanted
                self.playback.stop_all();
                self.notify(ClientNotice::Reconnecting { attempt });
            }
            TransportEvent::Closed { code, reason } => {
                self.notify(ClientNotice::Disconnected { code, reason })
            }
        }
    }

    fn handle_control(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::Status { message } => self.notify(ClientNotice::Status(message)),
            ControlMessage::Error { message } => self.notify(ClientNotice::Error(message)),
            ControlMessage::SessionTimeout { message } => {
                self.playback.stop_all();
                self.notify(ClientNotice::SessionTimeout(message));
            }
            ControlMessage::Interruption { .. } => self.playback.stop_all(),
        }
    }

    fn notify(&self, notice: ClientNotice) {
        let _ = self.notices.send(notice);
    }
}
