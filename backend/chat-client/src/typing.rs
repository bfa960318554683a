//! Typing indicator debounce.

use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use chat_schema::ClientFrame;

/// Idle time after the last keystroke before `typing=false` goes out.
pub const TYPING_IDLE: Duration = Duration::from_secs(1);

enum Signal {
    Keystroke,
    Stop,
}

/// Publishes `typing=true` on every keystroke and `typing=false` once the
/// user has been idle for the configured period.
pub struct TypingDebouncer {
    signals: UnboundedSender<Signal>,
    task: JoinHandle<()>,
}

impl TypingDebouncer {
    pub fn spawn(frames: UnboundedSender<ClientFrame>, idle: Duration) -> Self {
        let (signals, rx) = unbounded_channel();
        let task = tokio::spawn(run(rx, frames, idle));
        Self { signals, task }
    }

    pub fn keystroke(&self) {
        let _ = self.signals.send(Signal::Keystroke);
    }

    /// Ends a typing burst now, e.g. after a send.
    pub fn stop(&self) {
        let _ = self.signals.send(Signal::Stop);
    }
}

impl Drop for TypingDebouncer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    mut signals: UnboundedReceiver<Signal>,
    frames: UnboundedSender<ClientFrame>,
    idle: Duration,
) {
    let publish = |is_typing: bool| frames.send(ClientFrame::Typing { is_typing }).is_ok();
    let mut typing = false;

    loop {
        let signal = if typing {
            match tokio::time::timeout(idle, signals.recv()).await {
                Ok(signal) => signal,
                Err(_) => {
                    typing = false;
                    if !publish(false) {
                        return;
                    }
                    continue;
                }
            }
        } else {
            signals.recv().await
        };

        let keep_going = match signal {
            Some(Signal::Keystroke) => {
                typing = true;
                publish(true)
            }
            Some(Signal::Stop) if typing => {
                typing = false;
                publish(false)
            }
            Some(Signal::Stop) => true,
            None => return,
        };
        if !keep_going {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn typing(frame: Option<ClientFrame>) -> bool {
        match frame {
            Some(ClientFrame::Typing { is_typing }) => is_typing,
            other => panic!("expected a typing frame, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_second_ends_the_burst() {
        let (tx, mut rx) = unbounded_channel();
        let debouncer = TypingDebouncer::spawn(tx, TYPING_IDLE);

        let start = Instant::now();
        debouncer.keystroke();
        assert!(typing(rx.recv().await));

        tokio::time::sleep(Duration::from_millis(600)).await;
        debouncer.keystroke();
        assert!(typing(rx.recv().await));

        // Re-armed at 600ms, so nothing before 1600ms.
        assert!(
            tokio::time::timeout(Duration::from_millis(900), rx.recv())
                .await
                .is_err()
        );
        assert!(!typing(rx.recv().await));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1600), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1700), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_publishes_once_and_only_while_typing() {
        let (tx, mut rx) = unbounded_channel();
        let debouncer = TypingDebouncer::spawn(tx, TYPING_IDLE);

        debouncer.stop();
        debouncer.keystroke();
        assert!(typing(rx.recv().await));
        debouncer.stop();
        assert!(!typing(rx.recv().await));

        // No trailing idle frame after an explicit stop.
        assert!(tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .is_err());
    }
}
