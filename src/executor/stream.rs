use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::Mutex;
use crate::script::StreamEvent;

/// Fan-out of streamed subprocess output to any number of subscribers.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<StreamEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event published after this call is delivered to the returned receiver.
    pub fn subscribe(&self) -> Receiver<StreamEvent> {
        let (tx, rx) = unbounded();
        self.lock().push(tx);
        rx
    }

    /// Sends `event` to every subscriber. Subscribers whose receiver is gone are dropped.
    pub fn publish(&self, event: StreamEvent) {
        let mut subs = self.lock();
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Sender<StreamEvent>>> {
        // A panicking subscriber-side thread cannot leave the list half-updated.
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ScriptError;

    #[test]
    fn test_fan_out_to_all_subscribers() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.publish(Ok("out".to_string()));
        bus.publish(Err(ScriptError::execute_failed("x", None, "err")));

        for rx in [&a, &b] {
            assert_eq!(rx.try_recv().unwrap(), Ok("out".to_string()));
            assert!(rx.try_recv().unwrap().is_err());
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let keep = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(Ok("chunk".to_string()));
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(keep.recv().unwrap(), Ok("chunk".to_string()));
    }

    #[test]
    fn test_late_subscriber_misses_earlier_events() {
        let bus = EventBus::new();
        bus.publish(Ok("early".to_string()));
        let rx = bus.subscribe();
        assert!(rx.try_recv().is_err());
    }
}
