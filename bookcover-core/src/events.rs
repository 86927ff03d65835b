use std::sync::Mutex;

use crate::types::BookCoverUpdatedEvent;

/// In-process event publication. One event per background convergence.
pub trait EventBus: Send + Sync {
    fn publish(&self, event: BookCoverUpdatedEvent);
}

/// Default bus: logs the event and drops it. Services that care subscribe by
/// substituting their own implementation.
pub struct TracingEventBus;

impl EventBus for TracingEventBus {
    fn publish(&self, event: BookCoverUpdatedEvent) {
        tracing::info!(
            "cover updated for {}: {} ({})",
            event.fingerprint,
            event.final_location,
            event.provider
        );
    }
}

/// Collects published events for assertions in tests.
#[derive(Default)]
pub struct RecordingEvents(Mutex<Vec<BookCoverUpdatedEvent>>);

impl RecordingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<BookCoverUpdatedEvent> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventBus for RecordingEvents {
    fn publish(&self, event: BookCoverUpdatedEvent) {
        self.0.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Book, Fingerprint, ProviderId};

    #[test]
    fn recording_bus_captures_events_in_order() {
        let bus = RecordingEvents::new();
        let book = Book {
            isbn13: Some("9780000000002".to_string()),
            ..Default::default()
        };
        let fingerprint = Fingerprint::for_book(&book).unwrap();

        bus.publish(BookCoverUpdatedEvent {
            fingerprint: fingerprint.clone(),
            final_location: "/images/placeholder-book-cover.svg".to_string(),
            catalog_id: None,
            provider: ProviderId::Placeholder,
        });
        bus.publish(BookCoverUpdatedEvent {
            fingerprint,
            final_location: "https://cdn.example/x.jpg".to_string(),
            catalog_id: None,
            provider: ProviderId::Google,
        });

        let events = bus.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].provider, ProviderId::Placeholder);
        assert_eq!(events[1].provider, ProviderId::Google);
    }
}
