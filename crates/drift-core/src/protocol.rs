//! Wire events exchanged with clients (JSON framing).
//!
//! Clients speak JSON text frames over the WebSocket; both directions use
//! externally tagged enums so a frame always carries a `type` field.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Events sent by clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Grant consent for this connection.
    #[serde(rename = "agree")]
    Agree,

    /// Ask to be paired with a waiting stranger.
    #[serde(rename = "find")]
    Find,

    /// Leave the current conversation (or the waiting queue).
    #[serde(rename = "stop")]
    Stop,

    /// Leave the current conversation and immediately look for a new one.
    #[serde(rename = "next")]
    Next,

    /// Send a text message to the current partner.
    #[serde(rename = "message")]
    Message { text: String },

    /// Report the current partner for abuse.
    #[serde(rename = "report")]
    Report,

    /// Offer a photo to the current partner (data URL payload).
    #[serde(rename = "photo_offer")]
    PhotoOffer { data: String },

    /// Offer a video to the current partner (data URL payload).
    #[serde(rename = "video_offer")]
    VideoOffer { data: String },

    #[serde(rename = "photo_accept")]
    PhotoAccept,

    #[serde(rename = "photo_decline")]
    PhotoDecline,

    #[serde(rename = "video_accept")]
    VideoAccept,

    #[serde(rename = "video_decline")]
    VideoDecline,
}

/// Events sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Consent is required before any chat action.
    #[serde(rename = "need_agree")]
    NeedAgree,

    /// Consent recorded for this connection.
    #[serde(rename = "agreed_ok")]
    AgreedOk,

    /// This identity is temporarily banned; the connection will be closed.
    #[serde(rename = "banned")]
    Banned,

    /// No partner available yet; the caller was queued.
    #[serde(rename = "searching")]
    Searching,

    /// A partner was found.
    #[serde(rename = "matched")]
    Matched,

    /// The caller's own stop/next tore the conversation down.
    #[serde(rename = "stopped")]
    Stopped,

    /// The partner left the conversation.
    #[serde(rename = "partner_left")]
    PartnerLeft,

    /// A text message from the partner.
    #[serde(rename = "message")]
    Message { text: String },

    /// The report was recorded and the conversation torn down.
    #[serde(rename = "report_received")]
    ReportReceived,

    /// Enough distinct reporters: the recipient is now banned.
    #[serde(rename = "reported_and_banned")]
    ReportedAndBanned,

    /// The partner offered a photo; accept or decline.
    #[serde(rename = "photo_request")]
    PhotoRequest,

    /// The partner offered a video; accept or decline.
    #[serde(rename = "video_request")]
    VideoRequest,

    /// The photo offer was submitted to the partner.
    #[serde(rename = "photo_sent")]
    PhotoSent,

    /// The video offer was submitted to the partner.
    #[serde(rename = "video_sent")]
    VideoSent,

    /// An accepted photo payload.
    #[serde(rename = "photo_deliver")]
    PhotoDeliver { data: String },

    /// An accepted video payload.
    #[serde(rename = "video_deliver")]
    VideoDeliver { data: String },
}

/// The two media channels. Identical in shape, independent in state:
/// a pending photo offer never shadows a pending video offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    /// Data URL prefix a payload of this kind must carry.
    pub fn expected_prefix(self) -> &'static str {
        match self {
            MediaKind::Photo => "data:image/",
            MediaKind::Video => "data:video/",
        }
    }

    /// Whether `payload` carries the expected media-type tag.
    pub fn accepts(self, payload: &str) -> bool {
        payload.starts_with(self.expected_prefix())
    }

    pub fn request_event(self) -> ServerEvent {
        match self {
            MediaKind::Photo => ServerEvent::PhotoRequest,
            MediaKind::Video => ServerEvent::VideoRequest,
        }
    }

    pub fn sent_event(self) -> ServerEvent {
        match self {
            MediaKind::Photo => ServerEvent::PhotoSent,
            MediaKind::Video => ServerEvent::VideoSent,
        }
    }

    pub fn deliver_event(self, data: String) -> ServerEvent {
        match self {
            MediaKind::Photo => ServerEvent::PhotoDeliver { data },
            MediaKind::Video => ServerEvent::VideoDeliver { data },
        }
    }
}

/// Decode a client text frame.
pub fn decode_client_event(text: &str) -> Result<ClientEvent> {
    serde_json::from_str(text).map_err(|e| Error::MalformedFrame(e.to_string()))
}
