//! Telegram to image-uploader adapter
//!
//! Converts Telegram messages into inbound events. Photos are downloaded into
//! a uniquely named temporary file whose removal the uploader takes over.

use crate::event::{InboundEvent, SessionContext, UserId};
use crate::plugin::ImageUploader;
use crate::utils::retry_telegram_operation;
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{PhotoSize, ReplyParameters};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Safe extraction of user ID from a message.
/// Returns 0 if the user information is missing.
pub fn get_user_id_safe(msg: &Message) -> i64 {
    msg.from.as_ref().map_or(0, |u| u.id.0.cast_signed())
}

/// Conversation identifiers for a Telegram message
#[must_use]
pub fn session_from_message(msg: &Message) -> SessionContext {
    SessionContext {
        session_id: msg.chat.id.0.to_string(),
        message_ref: msg.id.0.to_string(),
        user_id: UserId::from(get_user_id_safe(msg)),
    }
}

/// Turn one message into the events the uploader receives, in dispatch order
///
/// A photo caption is emitted as text before the image, so it replaces any
/// older pending text and the image completes the pair with the caption.
#[must_use]
pub fn message_events(
    session: &SessionContext,
    photo_path: Option<&Path>,
    text: Option<&str>,
) -> Vec<InboundEvent> {
    let mut events = Vec::with_capacity(2);
    if let Some(text) = text.filter(|t| !t.trim().is_empty()) {
        events.push(InboundEvent::text(session.clone(), text));
    }
    if let Some(path) = photo_path {
        events.push(InboundEvent::image(session.clone(), path.to_string_lossy()));
    }
    events
}

/// Dispatch one Telegram message to the uploader and send its replies
///
/// # Errors
///
/// Returns an error if the photo cannot be downloaded or a reply cannot be sent.
pub async fn handle_message(bot: Bot, msg: Message, uploader: Arc<ImageUploader>) -> Result<()> {
    let session = session_from_message(&msg);

    let photo_path = match msg.photo().and_then(<[PhotoSize]>::last) {
        Some(photo) => {
            let path = download_photo(&bot, photo).await?;
            info!(user_id = %session.user_id, path = %path.display(), "Photo received");
            Some(path)
        }
        None => None,
    };
    let text = if photo_path.is_some() {
        msg.caption()
    } else {
        msg.text()
    };
    debug!(user_id = %session.user_id, has_text = text.is_some(), "Message received");

    for event in message_events(&session, photo_path.as_deref(), text) {
        if let Some(reply) = uploader.on_event(event).await {
            bot.send_message(msg.chat.id, reply.content)
                .reply_parameters(ReplyParameters::new(msg.id))
                .await?;
        }
    }

    Ok(())
}

async fn download_photo(bot: &Bot, photo: &PhotoSize) -> Result<PathBuf> {
    let path = std::env::temp_dir().join(format!("image-relay-{}.jpg", Uuid::new_v4()));
    let dst_path = path.as_path();

    let result = retry_telegram_operation(|| async {
        let file = bot.get_file(photo.file.id.clone()).await?;
        let mut dst = tokio::fs::File::create(dst_path).await?;
        bot.download_file(&file.path, &mut dst).await?;
        Ok(())
    })
    .await;

    if let Err(e) = result {
        if let Err(rm) = tokio::fs::remove_file(&path).await {
            if rm.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %rm, "Failed to remove partial download");
            }
        }
        return Err(e);
    }

    Ok(path)
}
