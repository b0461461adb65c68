use std::any::Any;
use std::collections::HashMap;
use std::sync::mpsc::{sync_channel, Receiver, SendError, SyncSender};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum MessageBusError {
    #[error("Channel with id {0} already exists")]
    ChannelExists(Uuid),
    #[error("Channel with id {0} not found")]
    ChannelNotFound(Uuid),
    #[error("Channel with id {0} already has a subscriber")]
    AlreadySubscribed(Uuid),
    #[error("Send error: {0}")]
    SendError(#[from] SendError<Box<dyn Message>>),
}

pub trait Message: Any + Send + Sync + 'static {}
pub type MessageSender = Arc<SyncSender<Box<dyn Message>>>;
pub type MessageReceiver = Receiver<Box<dyn Message>>;

impl dyn Message {
    pub fn cast<T: 'static>(&self) -> Option<&T> {
        (self as &dyn Any).downcast_ref::<T>()
    }
}

struct Channel {
    bound: usize,
    sender: MessageSender,
    // Taken by the single subscriber.
    receiver: Option<MessageReceiver>,
}

/// Bounded channels addressed by uuid. One subscriber per channel, any
/// number of publishers.
#[derive(Default)]
pub struct MessageBus {
    channels: HashMap<Uuid, Channel>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_channel(&mut self, bound: usize) -> Result<Uuid, MessageBusError> {
        self.create_channel_with_uuid(bound, Uuid::new_v4())
    }

    pub fn create_channel_with_uuid(
        &mut self,
        bound: usize,
        uuid: Uuid,
    ) -> Result<Uuid, MessageBusError> {
        if self.channels.contains_key(&uuid) {
            return Err(MessageBusError::ChannelExists(uuid));
        }
        let (tx, rx) = sync_channel::<Box<dyn Message>>(bound);
        self.channels.insert(
            uuid,
            Channel {
                bound,
                sender: Arc::new(tx),
                receiver: Some(rx),
            },
        );
        Ok(uuid)
    }

    pub fn subscribe(&mut self, id: Uuid) -> Result<MessageReceiver, MessageBusError> {
        self.channels
            .get_mut(&id)
            .ok_or(MessageBusError::ChannelNotFound(id))?
            .receiver
            .take()
            .ok_or(MessageBusError::AlreadySubscribed(id))
    }

    pub fn publish(&self, id: Uuid) -> Result<MessageSender, MessageBusError> {
        self.channels
            .get(&id)
            .map(|channel| channel.sender.clone())
            .ok_or(MessageBusError::ChannelNotFound(id))
    }

    pub fn bound(&self, id: Uuid) -> Option<usize> {
        self.channels.get(&id).map(|channel| channel.bound)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.channels.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Forgets the channel. Handed out senders and receivers stay usable.
    pub fn stop(&mut self, id: Uuid) {
        self.channels.remove(&id);
    }

    pub fn stop_all(&mut self) {
        self.channels.clear();
    }
}
