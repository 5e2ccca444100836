//! Topic registry - the closed set of domain event kinds.
//!
//! Adding an event kind is a code change: the gateway subscribes every
//! connection to every topic, so the set must stay small and enumerable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::EventBusError;

/// A kind of domain event published on the bus.
///
/// The string form (`as_str`) is the wire name: it is the broker
/// destination, the `eventType` field of the envelope, and the label of the
/// push sent to WebSocket clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "classroom.created")]
    ClassroomCreated,
    #[serde(rename = "classroom.updated")]
    ClassroomUpdated,
    #[serde(rename = "classroom.deleted")]
    ClassroomDeleted,
    #[serde(rename = "classroom.member.updated")]
    ClassroomMemberUpdated,
    #[serde(rename = "assignment.updated")]
    AssignmentUpdated,
    #[serde(rename = "assignment_submission.updated")]
    AssignmentSubmissionUpdated,
    #[serde(rename = "exam.updated")]
    ExamUpdated,
    #[serde(rename = "message.created")]
    MessageCreated,
    #[serde(rename = "message.updated")]
    MessageUpdated,
    #[serde(rename = "message.deleted")]
    MessageDeleted,
    #[serde(rename = "chatroom.created")]
    ChatroomCreated,
    #[serde(rename = "post.updated")]
    PostUpdated,
    #[serde(rename = "schedule.updated")]
    ScheduleUpdated,
    #[serde(rename = "notification.updated")]
    NotificationUpdated,
}

impl Topic {
    /// Every registered topic, in declaration order.
    pub const ALL: [Topic; 14] = [
        Topic::ClassroomCreated,
        Topic::ClassroomUpdated,
        Topic::ClassroomDeleted,
        Topic::ClassroomMemberUpdated,
        Topic::AssignmentUpdated,
        Topic::AssignmentSubmissionUpdated,
        Topic::ExamUpdated,
        Topic::MessageCreated,
        Topic::MessageUpdated,
        Topic::MessageDeleted,
        Topic::ChatroomCreated,
        Topic::PostUpdated,
        Topic::ScheduleUpdated,
        Topic::NotificationUpdated,
    ];

    /// Wire name of the topic.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::ClassroomCreated => "classroom.created",
            Topic::ClassroomUpdated => "classroom.updated",
            Topic::ClassroomDeleted => "classroom.deleted",
            Topic::ClassroomMemberUpdated => "classroom.member.updated",
            Topic::AssignmentUpdated => "assignment.updated",
            Topic::AssignmentSubmissionUpdated => "assignment_submission.updated",
            Topic::ExamUpdated => "exam.updated",
            Topic::MessageCreated => "message.created",
            Topic::MessageUpdated => "message.updated",
            Topic::MessageDeleted => "message.deleted",
            Topic::ChatroomCreated => "chatroom.created",
            Topic::PostUpdated => "post.updated",
            Topic::ScheduleUpdated => "schedule.updated",
            Topic::NotificationUpdated => "notification.updated",
        }
    }

    /// Iterates over every registered topic.
    pub fn all() -> impl Iterator<Item = Topic> {
        Self::ALL.into_iter()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = EventBusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .find(|topic| topic.as_str() == s)
            .ok_or_else(|| EventBusError::UnknownTopic(s.to_string()))
    }
}
