//! Core data models for volunteer events
//!
//! Field names follow the backend's camelCase JSON so records round-trip
//! through the cache unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store key under which the events list is cached
pub const EVENTS_CACHE_KEY: &str = "events";

/// Geographic position of an event
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Latitude coordinate
    pub latitude: f64,
    /// Longitude coordinate
    pub longitude: f64,
}

/// A volunteer event as returned by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique identifier for the event
    pub id: String,
    /// Human-readable name of the event
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// When the event starts
    pub date_time: DateTime<Utc>,
    /// Where the event takes place
    pub position: Position,
    /// Hosted photo, if one was uploaded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// How many volunteers the event needs in total
    pub volunteers_needed: u32,
    /// Users who signed up, in sign-up order
    #[serde(default)]
    pub volunteers_ids: Vec<String>,
}

impl Event {
    /// Number of volunteer slots still open
    pub fn spots_remaining(&self) -> u32 {
        let taken = u32::try_from(self.volunteers_ids.len()).unwrap_or(u32::MAX);
        self.volunteers_needed.saturating_sub(taken)
    }

    /// Whether every volunteer slot is taken
    pub fn is_full(&self) -> bool {
        self.spots_remaining() == 0
    }

    /// Whether `user_id` already signed up
    pub fn has_volunteer(&self, user_id: &str) -> bool {
        self.volunteers_ids.iter().any(|id| id == user_id)
    }
}

/// Payload for creating a new event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    pub name: String,
    pub description: String,
    pub date_time: DateTime<Utc>,
    pub position: Position,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub volunteers_needed: u32,
}

/// Returns events starting at or after `now`, earliest first
///
/// Events with the same start time keep their original order.
pub fn upcoming(events: &[Event], now: DateTime<Utc>) -> Vec<Event> {
    let mut result: Vec<Event> = events
        .iter()
        .filter(|event| event.date_time >= now)
        .cloned()
        .collect();
    result.sort_by_key(|event| event.date_time);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(id: &str, hour: u32) -> Event {
        Event {
            id: id.to_string(),
            name: format!("Event {}", id),
            description: String::new(),
            date_time: Utc.with_ymd_and_hms(2025, 12, 1, hour, 0, 0).unwrap(),
            position: Position {
                latitude: 51.0447,
                longitude: -114.0719,
            },
            image_url: None,
            volunteers_needed: 2,
            volunteers_ids: Vec::new(),
        }
    }

    #[test]
    fn test_event_deserializes_backend_json() {
        let json = r#"{
            "id": "1",
            "name": "Beach Cleanup",
            "description": "Bring gloves",
            "dateTime": "2025-12-01T14:30:00.000Z",
            "position": {"latitude": 51.0447, "longitude": -114.0719},
            "volunteersNeeded": 4,
            "volunteersIds": []
        }"#;

        let event: Event = serde_json::from_str(json).expect("Failed to deserialize Event");

        assert_eq!(event.id, "1");
        assert_eq!(event.name, "Beach Cleanup");
        assert_eq!(
            event.date_time,
            Utc.with_ymd_and_hms(2025, 12, 1, 14, 30, 0).unwrap()
        );
        assert!((event.position.latitude - 51.0447).abs() < 0.0001);
        assert!((event.position.longitude - (-114.0719)).abs() < 0.0001);
        assert_eq!(event.volunteers_needed, 4);
        assert!(event.volunteers_ids.is_empty());
        assert!(event.image_url.is_none());
    }

    #[test]
    fn test_event_serializes_camel_case_fields() {
        let mut e = event("7", 9);
        e.image_url = Some("https://img.example/7.jpg".to_string());

        let value = serde_json::to_value(&e).unwrap();

        assert_eq!(value["dateTime"], "2025-12-01T09:00:00Z");
        assert_eq!(value["volunteersNeeded"], 2);
        assert_eq!(value["imageUrl"], "https://img.example/7.jpg");
        assert!(value["volunteersIds"].is_array());
        assert!(value.get("date_time").is_none());
    }

    #[test]
    fn test_missing_image_url_is_omitted() {
        let value = serde_json::to_value(event("1", 9)).unwrap();
        assert!(value.get("imageUrl").is_none());
    }

    #[test]
    fn test_spots_remaining_and_full() {
        let mut e = event("1", 9);
        assert_eq!(e.spots_remaining(), 2);
        assert!(!e.is_full());

        e.volunteers_ids = vec!["u1".to_string(), "u2".to_string()];
        assert_eq!(e.spots_remaining(), 0);
        assert!(e.is_full());
    }

    #[test]
    fn test_spots_remaining_saturates_when_oversubscribed() {
        let mut e = event("1", 9);
        e.volunteers_ids = vec!["a".into(), "b".into(), "c".into()];
        assert_eq!(e.spots_remaining(), 0);
    }

    #[test]
    fn test_has_volunteer() {
        let mut e = event("1", 9);
        e.volunteers_ids.push("u1".to_string());
        assert!(e.has_volunteer("u1"));
        assert!(!e.has_volunteer("u2"));
    }

    #[test]
    fn test_upcoming_filters_past_and_sorts() {
        let events = vec![event("late", 18), event("past", 6), event("early", 10)];
        let now = Utc.with_ymd_and_hms(2025, 12, 1, 8, 0, 0).unwrap();

        let result = upcoming(&events, now);

        let ids: Vec<&str> = result.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
    }

    #[test]
    fn test_upcoming_includes_event_starting_now_and_keeps_tie_order() {
        let events = vec![event("a", 10), event("b", 10)];
        let now = Utc.with_ymd_and_hms(2025, 12, 1, 10, 0, 0).unwrap();

        let result = upcoming(&events, now);

        let ids: Vec<&str> = result.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
