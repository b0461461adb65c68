use crate::utils::message_bus::{MessageBus, MessageBusError, MessageReceiver, MessageSender};
use crate::utils::mutex_utils::TryLockWithTimeout;
use log::{debug, error};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

const LOCK_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum ThreadManagerError {
    #[error("Failed to lock message bus: {0}")]
    LockError(String),
    #[error("Message bus error: {0}")]
    MessageBusError(#[from] MessageBusError),
    #[error("Failed to spawn thread: {0}")]
    SpawnError(#[from] std::io::Error),
    #[error("Thread with id {0} not found")]
    ThreadNotFound(Uuid),
    #[error("Thread with id {0} panicked")]
    ThreadPanicked(Uuid),
}

/// Owns the threads of the process and the message bus they talk over.
#[derive(Default)]
pub struct ThreadManager {
    threads: HashMap<Uuid, JoinHandle<()>>,
    message_bus: Arc<Mutex<MessageBus>>,
}

impl ThreadManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_message_bus(&self) -> Result<MutexGuard<'_, MessageBus>, ThreadManagerError> {
        self.message_bus
            .try_lock_with_timeout(LOCK_TIMEOUT)
            .map_err(|e| ThreadManagerError::LockError(e.to_string()))
    }

    /// Creates a channel and hands out both of its ends.
    pub fn get_message_bus_channel_pair(
        &self,
        bound: usize,
    ) -> Result<(MessageSender, MessageReceiver), ThreadManagerError> {
        let mut message_bus = self.lock_message_bus()?;
        let id = message_bus.create_channel(bound)?;
        let tx = message_bus.publish(id)?;
        let rx = message_bus.subscribe(id)?;
        Ok((tx, rx))
    }

    pub fn start_thread<F>(&mut self, function: F) -> Result<Uuid, ThreadManagerError>
    where
        F: FnOnce() + Send + 'static,
    {
        let id = Uuid::new_v4();
        self.start_named_thread(format!("netfabric-{}", &id.simple().to_string()[..8]), id, function)
    }

    fn start_named_thread<F>(&mut self, name: String, id: Uuid, function: F) -> Result<Uuid, ThreadManagerError>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new().name(name).spawn(function)?;
        debug!("Started thread {}", id);
        self.threads.insert(id, handle);
        Ok(id)
    }

    pub fn is_thread_running(&self, id: &Uuid) -> Result<bool, ThreadManagerError> {
        self.threads
            .get(id)
            .map(|handle| !handle.is_finished())
            .ok_or(ThreadManagerError::ThreadNotFound(*id))
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn join_thread(&mut self, id: &Uuid) -> Result<(), ThreadManagerError> {
        let handle = self
            .threads
            .remove(id)
            .ok_or(ThreadManagerError::ThreadNotFound(*id))?;
        handle
            .join()
            .map_err(|_| ThreadManagerError::ThreadPanicked(*id))
    }

    /// Joins every thread, returning the first failure after all of them
    /// finished.
    pub fn join_all(&mut self) -> Result<(), ThreadManagerError> {
        let mut result = Ok(());
        for (id, handle) in self.threads.drain() {
            if handle.join().is_err() {
                error!("Thread {} panicked", id);
                if result.is_ok() {
                    result = Err(ThreadManagerError::ThreadPanicked(id));
                }
            }
        }
        result
    }
}
