//! Notification delivery to panels.
//!
//! Panels that subscribe by instance get their notifications point-to-point.
//! Hosts without addressed delivery can listen on the broadcast feed and
//! filter by `instance_id` themselves. Both paths are unbounded and lossless;
//! publishing never blocks or fails.

use parking_lot::Mutex;
use shared::agent_api::InstanceId;
use shared::events::Notification;
use std::collections::HashMap;
use tokio::sync::mpsc;

pub struct NotificationHub {
    addressed: Mutex<HashMap<InstanceId, mpsc::UnboundedSender<Notification>>>,
    broadcast: Mutex<Vec<mpsc::UnboundedSender<Notification>>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self {
            addressed: Mutex::new(HashMap::new()),
            broadcast: Mutex::new(Vec::new()),
        }
    }

    /// Addressed channel for one instance. A later subscription for the
    /// same instance replaces the earlier one.
    pub fn subscribe(&self, instance_id: &InstanceId) -> mpsc::UnboundedReceiver<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.addressed.lock().insert(instance_id.clone(), tx);
        rx
    }

    pub fn unsubscribe(&self, instance_id: &InstanceId) {
        self.addressed.lock().remove(instance_id);
    }

    /// Every notification for every instance.
    pub fn subscribe_all(&self) -> mpsc::UnboundedReceiver<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.broadcast.lock().push(tx);
        rx
    }

    pub fn publish(&self, notification: Notification) {
        tracing::trace!(
            instance = %notification.instance_id,
            kind = ?notification.kind,
            "publishing notification"
        );
        {
            let mut addressed = self.addressed.lock();
            if let Some(tx) = addressed.get(&notification.instance_id) {
                if tx.send(notification.clone()).is_err() {
                    // Panel went away
                    addressed.remove(&notification.instance_id);
                }
            }
        }
        // Drop listeners whose receiver is gone.
        self.broadcast
            .lock()
            .retain(|tx| tx.send(notification.clone()).is_ok());
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_addressed_delivery_only_reaches_owner() {
        let hub = NotificationHub::new();
        let a = InstanceId::from("a");
        let b = InstanceId::from("b");
        let mut rx_a = hub.subscribe(&a);
        let mut rx_b = hub.subscribe(&b);

        hub.publish(Notification::delta(a.clone(), "for a"));

        assert_eq!(rx_a.recv().await, Some(Notification::delta(a, "for a")));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_sees_everything() {
        let hub = NotificationHub::new();
        let mut all = hub.subscribe_all();

        hub.publish(Notification::started(InstanceId::from("a")));
        hub.publish(Notification::ended(InstanceId::from("b")));

        assert_eq!(all.recv().await.unwrap().instance_id, InstanceId::from("a"));
        assert_eq!(all.recv().await.unwrap().instance_id, InstanceId::from("b"));
    }

    #[tokio::test]
    async fn test_broadcast_keeps_every_delta_in_order() {
        let hub = NotificationHub::new();
        let id = InstanceId::from("a");
        let mut all = hub.subscribe_all();

        for i in 0..1000 {
            hub.publish(Notification::delta(id.clone(), i.to_string()));
        }
        hub.publish(Notification::ended(id.clone()));

        for i in 0..1000 {
            assert_eq!(all.try_recv().unwrap(), Notification::delta(id.clone(), i.to_string()));
        }
        assert_eq!(all.try_recv().unwrap(), Notification::ended(id));
        assert!(all.try_recv().is_err());
    }

    #[test]
    fn test_closed_broadcast_listeners_are_pruned() {
        let hub = NotificationHub::new();
        let kept = hub.subscribe_all();
        drop(hub.subscribe_all());

        hub.publish(Notification::started(InstanceId::from("a")));
        assert_eq!(hub.broadcast.lock().len(), 1);
        drop(kept);
        hub.publish(Notification::ended(InstanceId::from("a")));
        assert!(hub.broadcast.lock().is_empty());
    }

    #[test]
    fn test_publish_without_listeners_is_harmless() {
        let hub = NotificationHub::new();
        let a = InstanceId::from("a");
        drop(hub.subscribe(&a));

        hub.publish(Notification::aborted(a.clone()));
        hub.publish(Notification::aborted(a));
        assert!(hub.addressed.lock().is_empty());
    }
}
