use tokio::sync::broadcast;

use cinetune_core::Notification;

/// Fan-out of notifications to the control/GUI layer. One-way: the
/// pipeline never learns who is listening.
pub(crate) struct EventHub {
    tx: broadcast::Sender<Notification>,
}

impl EventHub {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = broadcast::channel(1024);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub(crate) fn emit(&self, notification: Notification) {
        let _ = self.tx.send(notification);
    }
}
