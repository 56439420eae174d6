use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

/// Graceful-shutdown fanout: components subscribe once at startup and stop
/// when the signal fires. Triggering is idempotent, and subscribing after
/// the trigger yields a receiver that fires immediately.
pub struct ShutdownManager {
    sender: Arc<RwLock<Option<broadcast::Sender<()>>>>,
    triggered: Arc<RwLock<bool>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self {
            sender: Arc::new(RwLock::new(Some(sender))),
            triggered: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn subscribe(&self) -> broadcast::Receiver<()> {
        let sender = self.sender.read().await;
        match &*sender {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = broadcast::channel(1);
                let _ = tx.send(());
                rx
            }
        }
    }

    pub async fn trigger(&self) {
        {
            let mut triggered = self.triggered.write().await;
            if *triggered {
                debug!("shutdown already triggered");
                return;
            }
            *triggered = true;
        }

        if let Some(tx) = &*self.sender.read().await {
            debug!("signalling {} shutdown subscribers", tx.receiver_count());
            let _ = tx.send(());
        }
        *self.sender.write().await = None;
        info!("shutdown signal sent");
    }

    pub async fn is_triggered(&self) -> bool {
        *self.triggered.read().await
    }

    pub async fn wait(&self) {
        let mut rx = self.subscribe().await;
        let _ = rx.recv().await;
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for ShutdownManager {
    fn clone(&self) -> Self {
        Self {
            sender: Arc::clone(&self.sender),
            triggered: Arc::clone(&self.triggered),
        }
    }
}
