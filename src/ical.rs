use icalendar::{Calendar, Component, Event, EventLike};

use crate::models::OccurrenceItem;

#[derive(Clone, Default)]
pub struct ICalExporter;

impl ICalExporter {
    pub fn new() -> Self {
        Self
    }

    /// One event per occurrence. `public_url` prefixes the detail links.
    pub fn generate(&self, name: &str, items: &[OccurrenceItem], public_url: &str) -> Vec<u8> {
        if items.is_empty() {
            return Vec::new();
        }

        let mut calendar = Calendar::new();
        calendar.name(name);

        for item in items {
            let mut event = Event::new();
            event.summary(&item.class_name);
            event.starts(item.date.and_time(item.start_time));
            event.ends(item.date.and_time(item.end_time));
            event.description(&format!(
                "Coach: {}\nDetails: {}{}",
                item.coach,
                public_url.trim_end_matches('/'),
                item.details
            ));
            // stable across materialization: keyed by class and date
            event.uid(&format!(
                "{}-{}-{}@studio-booking",
                item.class_id,
                item.date.format("%Y%m%d"),
                item.instance_id
                    .filter(|_| item.special)
                    .map_or_else(|| "s".to_string(), |id| id.to_string())
            ));
            calendar.push(event);
        }

        calendar.to_string().into_bytes()
    }
}
