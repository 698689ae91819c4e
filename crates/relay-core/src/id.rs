//! Type-safe identifiers for the hub's domain entities.
//!
//! This module provides an `Id<Marker>` newtype that serializes as a plain
//! string but prevents mixing up, say, an `EventId` and a `ParticipantId` at
//! compile time. Values are UUIDs under the hood so they line up with the
//! `uuid` primary-key columns of the relational schema the repository trait
//! mirrors.

use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A type-safe wrapper around a UUID, tagged with a phantom entity marker.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Id<T> {
    value: Uuid,
    _phantom: PhantomData<T>,
}

impl<T> Serialize for Id<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.value.serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for Id<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Uuid::deserialize(deserializer)?;
        Ok(Self::from_uuid(value))
    }
}

impl<T> Id<T> {
    /// Generates a fresh random id.
    pub fn new() -> Self {
        Self {
            value: Uuid::new_v4(),
            _phantom: PhantomData,
        }
    }

    /// Wraps an existing UUID as this id type.
    pub fn from_uuid(value: Uuid) -> Self {
        Self {
            value,
            _phantom: PhantomData,
        }
    }

    /// Parses an id from its string representation.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` is not a valid UUID.
    pub fn parse(value: &str) -> Result<Self, uuid::Error> {
        Ok(Self::from_uuid(Uuid::parse_str(value)?))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.value
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.value)
    }
}

impl<T> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl<T> From<Uuid> for Id<T> {
    fn from(value: Uuid) -> Self {
        Self::from_uuid(value)
    }
}

// Type markers for the hub's entities. These are never constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventMarker;
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SegmentMarker;
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuestionMarker;
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParticipantMarker;
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserMarker;

pub type EventId = Id<EventMarker>;
pub type SegmentId = Id<SegmentMarker>;
pub type QuestionId = Id<QuestionMarker>;
pub type ParticipantId = Id<ParticipantMarker>;
/// Identifies the signed-in user behind a presenter or host, distinct from
/// the per-event `ParticipantId` so the same person can hold the presenter
/// role across segments without being keyed by a participant row.
pub type UserId = Id<UserMarker>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_json() {
        let id: EventId = Id::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: EventId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn distinct_ids_are_unique() {
        let a: EventId = Id::new();
        let b: EventId = Id::new();
        assert_ne!(a, b);
    }

    #[test]
    fn parse_rejects_non_uuid() {
        assert!(EventId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn parse_round_trips_display() {
        let id: SegmentId = Id::new();
        let reparsed = SegmentId::parse(&id.to_string()).unwrap();
        assert_eq!(id, reparsed);
    }
}
