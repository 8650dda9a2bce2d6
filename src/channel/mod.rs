mod events;
mod ws;

pub use events::{
    AuthenticatePayload,
    ChannelEvent,
    ChannelEventKind,
    FileSharedPayload,
    FileSharedWithYouPayload,
    FileUploadedPayload,
    ShareFilePayload,
    StartUploadPayload,
    UploadProgressPayload,
};
pub use ws::{ConnectionStatus, ReconnectPolicy, WsEventChannel, WsEventChannelHandle};

use async_trait::async_trait;
use tokio::sync::broadcast;
use crate::core::{Result, SessionError};

/// Push notification connection shared by the store and the presentation layer.
///
/// Delivery is at most once per physical connection: whatever is published
/// while disconnected, or while a subscriber lags behind, is lost.
#[async_trait]
pub trait EventChannel: Send + Sync {
    async fn emit(&self, event: ChannelEvent) -> Result<()>;

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent>;

    fn is_connected(&self) -> bool;

    /// Receive only events of `kind`. Dropping the receiver unregisters it.
    fn on(&self, kind: ChannelEventKind) -> FilteredEventReceiver {
        FilteredEventReceiver::new(self.subscribe(), move |event| event.kind() == kind)
    }
}

/// 过滤的事件接收器
pub struct FilteredEventReceiver {
    receiver: broadcast::Receiver<ChannelEvent>,
    filter: Box<dyn Fn(&ChannelEvent) -> bool + Send + Sync>,
}

impl FilteredEventReceiver {
    pub fn new<F>(receiver: broadcast::Receiver<ChannelEvent>, filter: F) -> Self
    where
        F: Fn(&ChannelEvent) -> bool + Send + Sync + 'static,
    {
        Self {
            receiver,
            filter: Box::new(filter),
        }
    }

    pub async fn recv(&mut self) -> Result<ChannelEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if (self.filter)(&event) {
                return Ok(event);
            }
        }
    }
}

/// Channel for running without a notification service.
pub struct OfflineChannel {
    event_tx: broadcast::Sender<ChannelEvent>,
}

impl OfflineChannel {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(1);
        Self { event_tx }
    }
}

impl Default for OfflineChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventChannel for OfflineChannel {
    async fn emit(&self, _event: ChannelEvent) -> Result<()> {
        Err(SessionError::ChannelDisconnected)
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.event_tx.subscribe()
    }

    fn is_connected(&self) -> bool {
        false
    }
}
