//! Per-agent audio playback queue
//!
//! Each agent owns one [`AudioDispatchQueue`]. Producers enqueue
//! [`AudioJob`]s from any task; a single consumer loop plays them one at a
//! time in FIFO order and deletes each job's audio file once playback ends.

use crate::synthesis::AudioResource;
use crate::transport::{PlaybackOutcome, VoiceConnection};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How often the consumer looks for the next job
pub const DISPATCH_TICK: Duration = Duration::from_secs(1);

/// A synthesized utterance waiting to be played
#[derive(Debug, Clone)]
pub struct AudioJob {
    /// Text that was synthesized
    pub text: String,
    /// Speaker voice used
    pub voice_id: u32,
    /// Audio file to play
    pub resource: AudioResource,
}

/// FIFO playback queue with a "currently speaking" flag
#[derive(Debug)]
pub struct AudioDispatchQueue {
    sender: mpsc::UnboundedSender<AudioJob>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<AudioJob>>>,
    speaking: AtomicBool,
    tick: Duration,
}

impl Default for AudioDispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDispatchQueue {
    /// Create a queue polled every [`DISPATCH_TICK`]
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            speaking: AtomicBool::new(false),
            tick: DISPATCH_TICK,
        }
    }

    /// Append a job. Returns `false` if the consumer has shut down, in
    /// which case the job's audio file is deleted immediately.
    pub fn enqueue(&self, job: AudioJob) -> bool {
        match self.sender.send(job) {
            Ok(()) => true,
            Err(mpsc::error::SendError(job)) => {
                warn!(voice_id = job.voice_id, "Dispatch queue closed, dropping job");
                release(None, &job);
                false
            }
        }
    }

    /// Whether a job is currently playing
    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    /// Consumer loop; runs until `cancel` fires
    ///
    /// `connection` is consulted on every tick so the loop follows the
    /// agent across joins and leaves. Only the first call takes ownership of
    /// the receiving end; later calls return immediately.
    pub async fn run<F>(&self, agent_id: usize, connection: F, cancel: CancellationToken)
    where
        F: Fn() -> Option<Arc<dyn VoiceConnection>>,
    {
        let receiver = self.receiver.lock().take();
        let Some(mut receiver) = receiver else {
            warn!(agent_id, "Dispatch loop already running");
            return;
        };

        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(agent_id, "Dispatch loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(conn) = connection().filter(|c| c.is_connected()) else {
                continue;
            };
            if self.is_speaking() {
                continue;
            }

            let job = match receiver.try_recv() {
                Ok(job) => job,
                Err(TryRecvError::Empty) => continue,
                Err(TryRecvError::Disconnected) => break,
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.play_job(agent_id, conn, job) => {}
            }
        }

        self.speaking.store(false, Ordering::SeqCst);
        receiver.close();
        let mut dropped = 0;
        while let Ok(job) = receiver.try_recv() {
            release(Some(agent_id), &job);
            dropped += 1;
        }
        info!(agent_id, dropped, "Dispatch loop stopped");
    }

    async fn play_job(&self, agent_id: usize, conn: Arc<dyn VoiceConnection>, job: AudioJob) {
        self.speaking.store(true, Ordering::SeqCst);

        if !job.resource.exists() {
            error!(
                agent_id,
                path = %job.resource.path().display(),
                "Audio resource vanished before playback"
            );
            self.speaking.store(false, Ordering::SeqCst);
            return;
        }

        debug!(agent_id, text = %job.text, "Playing queued audio");
        match conn.play(job.resource.path()).await {
            Ok(completion) => match completion.wait().await {
                PlaybackOutcome::Finished => debug!(agent_id, "Playback finished"),
                PlaybackOutcome::Failed(reason) => {
                    error!(agent_id, reason = %reason, "Playback failed")
                }
            },
            Err(e) => error!(agent_id, error = %e, "Could not start playback"),
        }

        release(Some(agent_id), &job);
        self.speaking.store(false, Ordering::SeqCst);
    }
}

fn release(agent_id: Option<usize>, job: &AudioJob) {
    if let Err(e) = job.resource.release() {
        warn!(
            agent_id,
            path = %job.resource.path().display(),
            error = %e,
            "Failed to delete audio file"
        );
    }
}
