//! Fire-and-forget broadcast of rebuild signals.

use tokio::sync::broadcast;

/// Hands rebuild signals from the build-event consumer to every currently
/// connected live-reload stream.
///
/// Internally this is a broadcast channel of capacity one. [`signal`] never
/// blocks the caller: with no subscriber the signal is dropped, and a
/// subscriber that sleeps through several rebuilds wakes up once with the
/// missed signals coalesced. Every subscriber that keeps up receives every
/// signal independently.
///
/// [`signal`]: RebuildNotifier::signal
#[derive(Clone, Debug)]
pub struct RebuildNotifier {
    sender: broadcast::Sender<()>,
}

impl RebuildNotifier {
    /// Create a new [`RebuildNotifier`] with no subscribers.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self { sender }
    }

    /// Mark that a build finished. Never blocks; a signal nobody is waiting
    /// for is silently dropped.
    pub fn signal(&self) {
        self.sender.send(()).ok();
    }

    /// Subscribe to future signals. Signals emitted before this call are
    /// never replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }
}

impl Default for RebuildNotifier {
    fn default() -> Self {
        Self::new()
    }
}
