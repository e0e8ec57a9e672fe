//! Conversion logic between payload DTOs and domain entities.
//!
//! Every identifier is validated here; payloads that fail validation never
//! reach the rest of the core.

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::domain::{
    Attachment, CustomFields, DomainError, Message, MessageId, RoomId, RoomSummary, Sender,
    Setting, Timestamp, UnreadCount, UserId,
};
use crate::error::FrameError;
use crate::infrastructure::dto::websocket as dto;

fn validated<T>(field: &'static str, raw: String) -> Result<T, FrameError>
where
    T: TryFrom<String, Error = DomainError>,
{
    T::try_from(raw).map_err(|source| FrameError::InvalidField { field, source })
}

/// Deserialize a JSON value into a payload DTO
pub fn decode_payload<T: DeserializeOwned>(value: Value) -> Result<T, FrameError> {
    Ok(serde_json::from_value(value)?)
}

/// Decode a JSON array, converting each element and skipping invalid ones.
///
/// A single malformed room or message must not hide the rest of the list, so
/// invalid elements are logged and dropped. A non-array value is an error.
pub fn decode_list<D, T>(value: Value) -> Result<Vec<T>, FrameError>
where
    D: DeserializeOwned,
    T: TryFrom<D, Error = FrameError>,
{
    let Value::Array(items) = value else {
        return Err(FrameError::Shape("expected an array".to_string()));
    };
    let mut converted = Vec::with_capacity(items.len());
    for item in items {
        match decode_payload::<D>(item).and_then(T::try_from) {
            Ok(entity) => converted.push(entity),
            Err(e) => tracing::warn!("Dropping invalid list element: {}", e),
        }
    }
    Ok(converted)
}

// ========================================
// DTO → Domain Entity
// ========================================

impl From<dto::AttachmentDto> for Attachment {
    fn from(dto: dto::AttachmentDto) -> Self {
        Self {
            title: dto.title,
            url: dto
                .title_link
                .or(dto.image_url)
                .or(dto.audio_url)
                .or(dto.video_url),
            mime_type: dto.image_type.or(dto.audio_type).or(dto.video_type),
        }
    }
}

impl TryFrom<dto::MessageDto> for Message {
    type Error = FrameError;

    fn try_from(dto: dto::MessageDto) -> Result<Self, Self::Error> {
        let name = dto.u.name.unwrap_or_else(|| dto.u.username.clone());
        Ok(Self {
            id: validated::<MessageId>("message id", dto.id)?,
            room_id: validated::<RoomId>("room id", dto.rid)?,
            timestamp: Timestamp::new(dto.ts.date),
            sender: Sender {
                id: validated::<UserId>("sender id", dto.u.id)?,
                username: dto.u.username,
                name,
            },
            body: dto.msg,
            attachments: dto.attachments.into_iter().map(Attachment::from).collect(),
            error: false,
        })
    }
}

fn parse_soft_close(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

impl From<dto::CustomFieldsDto> for CustomFields {
    fn from(dto: dto::CustomFieldsDto) -> Self {
        let soft_close = dto.softclose.as_deref().and_then(|raw| {
            let parsed = parse_soft_close(raw);
            if parsed.is_none() {
                tracing::warn!("Ignoring unparseable softclose date '{}'", raw);
            }
            parsed
        });
        Self {
            project_accepted: dto.project_accepted,
            soft_close,
            extra: dto.extra,
        }
    }
}

impl TryFrom<dto::RoomDto> for RoomSummary {
    type Error = FrameError;

    fn try_from(dto: dto::RoomDto) -> Result<Self, Self::Error> {
        Ok(Self {
            id: validated::<RoomId>("room id", dto.id)?,
            name: dto.name,
            unread: dto.unread,
            messages_count: dto.messages_count,
            last_message: dto.last_message.map(Message::try_from).transpose()?,
            updated_at: dto.updated_at.map(|d| Timestamp::new(d.date)),
            custom_fields: dto.custom_fields.into(),
        })
    }
}

impl TryFrom<dto::UnreadDto> for UnreadCount {
    type Error = FrameError;

    fn try_from(dto: dto::UnreadDto) -> Result<Self, Self::Error> {
        Ok(Self {
            room_id: validated::<RoomId>("room id", dto.rid)?,
            unread: dto.unread,
        })
    }
}

impl TryFrom<dto::SettingDto> for Setting {
    type Error = FrameError;

    fn try_from(dto: dto::SettingDto) -> Result<Self, Self::Error> {
        if dto.id.trim().is_empty() {
            return Err(FrameError::Shape("setting without id".to_string()));
        }
        Ok(Self {
            id: dto.id,
            value: dto.value,
        })
    }
}

// ========================================
// Domain Entity → DTO
// ========================================

impl From<&Attachment> for dto::AttachmentDto {
    fn from(model: &Attachment) -> Self {
        Self {
            title: model.title.clone(),
            title_link: model.url.clone(),
            ..Default::default()
        }
    }
}

impl From<&Message> for dto::OutgoingMessageDto {
    fn from(model: &Message) -> Self {
        Self {
            id: model.id.as_str().to_string(),
            rid: model.room_id.as_str().to_string(),
            msg: model.body.clone(),
            attachments: model.attachments.iter().map(dto::AttachmentDto::from).collect(),
        }
    }
}
