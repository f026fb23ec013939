use discord_rich_presence::activity::{Activity, Assets, Timestamps};
use discord_rich_presence::{DiscordIpc, DiscordIpcClient};
use thiserror::Error;

/// Every channel failure is recoverable by contract: the daemon reacts by
/// dropping back to `Disconnected` and retrying, never by exiting.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("presence channel unavailable: {0}")]
    Unavailable(String),
}

/// The two-line payload pushed to the presence service.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceUpdate {
    pub details: String,
    pub state_line: String,
    pub start_epoch: i64,
    pub image_key: String,
    pub tooltip: String,
}

/// Narrow seam to the external presence service. Only the daemon talks to
/// it, so no cross-process contention exists on this side.
pub trait PresenceChannel {
    fn connect(&mut self) -> Result<(), ChannelError>;
    fn update(&mut self, update: &PresenceUpdate) -> Result<(), ChannelError>;
    fn clear(&mut self) -> Result<(), ChannelError>;
    fn close(&mut self) -> Result<(), ChannelError>;
}

/// `PresenceChannel` over the local Discord IPC socket.
pub struct DiscordChannel {
    client_id: String,
    client: Option<DiscordIpcClient>,
}

impl DiscordChannel {
    pub fn new(client_id: String) -> Self {
        Self {
            client_id,
            client: None,
        }
    }

    fn connected(&mut self) -> Result<&mut DiscordIpcClient, ChannelError> {
        self.client
            .as_mut()
            .ok_or_else(|| ChannelError::Unavailable("not connected".to_string()))
    }
}

impl PresenceChannel for DiscordChannel {
    fn connect(&mut self) -> Result<(), ChannelError> {
        let mut client = DiscordIpcClient::new(&self.client_id);
        client.connect().map_err(|err| {
            ChannelError::Unavailable(format!(
                "Discord IPC connect failed (is the Discord client open?): {err}"
            ))
        })?;
        self.client = Some(client);
        Ok(())
    }

    fn update(&mut self, update: &PresenceUpdate) -> Result<(), ChannelError> {
        let activity = Activity::new()
            .details(&update.details)
            .state(&update.state_line)
            .timestamps(Timestamps::new().start(update.start_epoch.max(0)))
            .assets(
                Assets::new()
                    .large_image(&update.image_key)
                    .large_text(&update.tooltip),
            );
        let client = self.connected()?;
        if let Err(err) = client.set_activity(activity) {
            self.client = None;
            return Err(ChannelError::Unavailable(err.to_string()));
        }
        Ok(())
    }

    fn clear(&mut self) -> Result<(), ChannelError> {
        let client = self.connected()?;
        if let Err(err) = client.clear_activity() {
            self.client = None;
            return Err(ChannelError::Unavailable(err.to_string()));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), ChannelError> {
        if let Some(mut client) = self.client.take() {
            client
                .close()
                .map_err(|err| ChannelError::Unavailable(err.to_string()))?;
        }
        Ok(())
    }
}
