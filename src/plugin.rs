//! Image uploader component
//!
//! Routes inbound events: images go through the image host and the pairing
//! store, text goes straight to the pairing store. A completed pair is
//! forwarded in a detached task so the upload reply never waits on it.

use crate::config::{Settings, SettingsError};
use crate::event::{EventKind, InboundEvent, Reply};
use crate::forward::{Downstream, Forwarder, ReplySink};
use crate::pairing::{CombinedMessage, PairingStore};
use crate::upload::{ImageHost, SmmsClient};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Reply prefix for a successful upload, followed by a newline and the URL
pub const UPLOAD_SUCCESS_PREFIX: &str = "Image uploaded successfully:";
/// Reply for a failed upload
pub const UPLOAD_FAILED_REPLY: &str = "Image upload failed, please try again later";

/// Chat host component that uploads images and pairs them with text
pub struct ImageUploader {
    host: Arc<dyn ImageHost>,
    store: Arc<PairingStore>,
    forwarder: Arc<Forwarder>,
}

impl ImageUploader {
    /// Registration name
    pub const NAME: &'static str = "image_uploader";
    /// Dispatch priority, higher runs earlier
    pub const PRIORITY: i32 = 800;
    /// Registration description
    pub const DESCRIPTION: &'static str = "Uploads images to sm.ms and pairs them with user text";
    /// Component version
    pub const VERSION: &'static str = env!("CARGO_PKG_VERSION");

    /// Assemble the component from its collaborators
    #[must_use]
    pub fn new(
        host: Arc<dyn ImageHost>,
        store: Arc<PairingStore>,
        forwarder: Arc<Forwarder>,
    ) -> Self {
        Self {
            host,
            store,
            forwarder,
        }
    }

    /// Build the component from settings, failing activation without a usable sm.ms key
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::MissingKey` for a missing or blank key, or
    /// `SettingsError::Invalid` if the HTTP client cannot be built.
    pub fn from_settings(
        settings: &Settings,
        store: Arc<PairingStore>,
        downstream: Arc<dyn Downstream>,
        sink: Arc<dyn ReplySink>,
    ) -> Result<Self, SettingsError> {
        let key = settings.smms_key()?;
        let client = SmmsClient::new(key, &settings.smms_api_base, settings.upload_timeout()?)
            .map_err(|e| SettingsError::Invalid(e.to_string()))?;
        let forwarder = Forwarder::new(downstream, sink, settings.forward_timeout()?);

        info!(name = Self::NAME, priority = Self::PRIORITY, "Image uploader initialized");
        Ok(Self::new(Arc::new(client), store, Arc::new(forwarder)))
    }

    /// Pairing state shared with the rest of the process
    #[must_use]
    pub fn store(&self) -> &Arc<PairingStore> {
        &self.store
    }

    /// Handle one inbound event
    ///
    /// Returns the reply for image events. Text events yield `None` so the
    /// host continues its own handling.
    pub async fn on_event(&self, event: InboundEvent) -> Option<Reply> {
        match event.kind {
            EventKind::Image => Some(self.handle_image(event).await),
            EventKind::Text => {
                self.handle_text(event).await;
                None
            }
        }
    }

    async fn handle_image(&self, event: InboundEvent) -> Reply {
        let path = Path::new(&event.content);
        info!(user_id = %event.user_id(), path = %path.display(), "Processing image");

        let result = self.host.upload(path).await;
        remove_temp_file(path).await;

        match result {
            Ok(url) => {
                if let Some(combined) = self
                    .store
                    .submit_image(event.session.user_id.clone(), url.clone(), event.session)
                    .await
                {
                    self.spawn_forward(combined);
                }
                Reply::text(format!("{UPLOAD_SUCCESS_PREFIX}\n{url}"))
            }
            Err(e) => {
                error!(user_id = %event.session.user_id, error = %e, "Image upload failed");
                Reply::text(UPLOAD_FAILED_REPLY)
            }
        }
    }

    async fn handle_text(&self, event: InboundEvent) {
        let user_id = event.session.user_id.clone();
        if let Some(combined) = self
            .store
            .submit_text(user_id, event.content, event.session)
            .await
        {
            self.spawn_forward(combined);
        }
    }

    fn spawn_forward(&self, combined: CombinedMessage) {
        let forwarder = Arc::clone(&self.forwarder);
        tokio::spawn(async move {
            if let Err(e) = forwarder.forward(&combined).await {
                warn!(
                    user_id = %combined.user_id,
                    session_id = %combined.session.session_id,
                    error = %e,
                    "Forwarding paired message failed"
                );
            }
        });
    }
}

async fn remove_temp_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!(path = %path.display(), "Temporary image removed"),
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove temporary image"),
    }
}
