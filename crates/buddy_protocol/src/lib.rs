/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::{Deserialize, Serialize};

/// Domain events travelling on the in-process bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    PostCreated,
    PostShared,
    PostDeleted,
    ReactionAdded,
    ReactionChanged,
    ReactionRemoved,
    CommentAdded,
    QuizAttemptSubmitted,
    MessageSent,
    ConnectionAccepted,
    ConnectionRemoved,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PostCreated => "postCreated",
            Self::PostShared => "postShared",
            Self::PostDeleted => "postDeleted",
            Self::ReactionAdded => "reactionAdded",
            Self::ReactionChanged => "reactionChanged",
            Self::ReactionRemoved => "reactionRemoved",
            Self::CommentAdded => "commentAdded",
            Self::QuizAttemptSubmitted => "quizAttemptSubmitted",
            Self::MessageSent => "messageSent",
            Self::ConnectionAccepted => "connectionAccepted",
            Self::ConnectionRemoved => "connectionRemoved",
        }
    }
}

/// Extra data some events carry beyond the common envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EventPayload {
    Reaction {
        reaction: Option<String>,
        previous: Option<String>,
    },
    QuizAttempt {
        #[serde(rename = "quizId")]
        quiz_id: String,
        score: f64,
    },
    Connection {
        #[serde(rename = "peerId")]
        peer_id: String,
    },
    Message {
        #[serde(rename = "threadId")]
        thread_id: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusEvent {
    pub event_type: EventType,
    pub item_id: Option<String>,
    pub actor_id: String,
    pub community_id: Option<String>,
    pub occurred_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<EventPayload>,
}

impl BusEvent {
    pub fn new(event_type: EventType, actor_id: &str, occurred_at: i64) -> Self {
        Self {
            event_type,
            item_id: None,
            actor_id: actor_id.to_string(),
            community_id: None,
            occurred_at,
            payload: None,
        }
    }

    pub fn with_item(mut self, item_id: &str) -> Self {
        self.item_id = Some(item_id.to_string());
        self
    }

    pub fn with_community(mut self, community_id: Option<&str>) -> Self {
        self.community_id = community_id.map(|c| c.to_string());
        self
    }

    pub fn with_payload(mut self, payload: EventPayload) -> Self {
        self.payload = Some(payload);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedQuery {
    pub community_id: Option<String>,
    pub cursor: Option<String>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalizedQuery {
    pub community_id: Option<String>,
    pub mood: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePostRequest {
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_visibility")]
    pub visibility: String,
    #[serde(default)]
    pub community_tag: Option<String>,
}

fn default_visibility() -> String {
    "public".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePostResponse {
    pub ok: bool,
    pub post_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionRequest {
    #[serde(rename = "type")]
    pub reaction: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRequest {
    pub text: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentListQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizAttemptRequest {
    pub score: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSentRequest {
    #[serde(default)]
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwardPointsRequest {
    pub user_id: String,
    pub points: i64,
    #[serde(default)]
    pub action_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    pub fn ok() -> Self {
        Self { ok: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: ErrorDetail,
}

impl ErrorResponse {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: ErrorDetail {
                code: code.to_string(),
                message: message.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_event_uses_camel_case_envelope() {
        let ev = BusEvent::new(EventType::PostCreated, "u1", 42)
            .with_item("p1")
            .with_community(Some("mit"));
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["eventType"], "postCreated");
        assert_eq!(v["itemId"], "p1");
        assert_eq!(v["actorId"], "u1");
        assert_eq!(v["communityId"], "mit");
        assert_eq!(v["occurredAt"], 42);
        assert!(v.get("payload").is_none());
    }

    #[test]
    fn quiz_payload_is_tagged() {
        let ev = BusEvent::new(EventType::QuizAttemptSubmitted, "u1", 1).with_payload(
            EventPayload::QuizAttempt {
                quiz_id: "q1".to_string(),
                score: 7.5,
            },
        );
        let raw = serde_json::to_string(&ev).unwrap();
        assert!(raw.contains(r#""kind":"quizAttempt""#));
        assert!(raw.contains(r#""quizId":"q1""#));
        let back: BusEvent = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, ev);
    }

    #[test]
    fn create_post_defaults_to_public() {
        let req: CreatePostRequest = serde_json::from_str(r#"{"content":"hi"}"#).unwrap();
        assert_eq!(req.visibility, "public");
        assert!(req.tags.is_empty());
        assert!(req.community_tag.is_none());
    }

    #[test]
    fn reaction_request_reads_type_field() {
        let req: ReactionRequest = serde_json::from_str(r#"{"type":"love"}"#).unwrap();
        assert_eq!(req.reaction, "love");
    }
}
