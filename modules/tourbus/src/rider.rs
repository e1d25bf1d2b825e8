//! What travels over the inbound queue.

use std::fmt;

use tokio::sync::oneshot;

use crate::payload::SharedPayload;

/// Delivery mode chosen at post time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Fanned out inline on the dispatch loop. Later riders wait.
    Synchronous,
    /// Fanned out on a detached task. The dispatch loop moves straight on.
    Asynchronous,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Synchronous => "synchronously",
            Mode::Asynchronous => "asynchronously",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payload paired with its delivery mode. Consumed exactly once.
pub struct Rider {
    pub payload: SharedPayload,
    pub mode: Mode,
    /// Fired once fan-out has finished. Dropped unfired if the bus shuts down
    /// before the rider is dispatched.
    pub done: Option<oneshot::Sender<()>>,
}

impl Rider {
    pub fn asynchronous(payload: SharedPayload) -> Self {
        Self {
            payload,
            mode: Mode::Asynchronous,
            done: None,
        }
    }

    pub fn synchronous(payload: SharedPayload) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let rider = Self {
            payload,
            mode: Mode::Synchronous,
            done: Some(tx),
        };
        (rider, rx)
    }

    /// Signal whoever is waiting on this rider. A poster that stopped waiting
    /// is not an error.
    pub fn complete(&mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

impl fmt::Debug for Rider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rider")
            .field("payload_type", &self.payload.payload_type())
            .field("mode", &self.mode)
            .field("awaited", &self.done.is_some())
            .finish()
    }
}

/// Items on the inbound queue.
#[derive(Debug)]
pub enum Envelope {
    Rider(Rider),
    /// Acknowledged once every delivery started before it has finished.
    Flush(oneshot::Sender<()>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::SimplePayload;

    #[test]
    fn mode_strings() {
        assert_eq!(Mode::Synchronous.to_string(), "synchronously");
        assert_eq!(Mode::Asynchronous.to_string(), "asynchronously");
    }

    #[test]
    fn async_rider_has_no_waiter() {
        let rider = Rider::asynchronous(SimplePayload::new("a").shared());
        assert_eq!(rider.mode, Mode::Asynchronous);
        assert!(rider.done.is_none());
    }

    #[tokio::test]
    async fn sync_rider_completes_once() {
        let (mut rider, rx) = Rider::synchronous(SimplePayload::new("s").shared());
        assert_eq!(rider.mode, Mode::Synchronous);

        rider.complete();
        rider.complete();

        assert!(rx.await.is_ok());
        assert!(rider.done.is_none());
    }

    #[tokio::test]
    async fn dropped_rider_closes_waiter() {
        let (rider, rx) = Rider::synchronous(SimplePayload::new("s").shared());
        drop(rider);
        assert!(rx.await.is_err());
    }
}
