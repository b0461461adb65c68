use crate::components::bgp::bgp_bestroute::BestPath;
use crate::components::bgp::bgp_config::{ConfigError, RibConfig};
use crate::components::bgp::bgp_peers::{PeerInfo, PeerRegistry};
use crate::components::bgp::bgp_rib::{new_table, RibError, RibTable, RouteUpdate, TableOverview};
use crate::components::bgp::outbound::{OutboundStore, RibTransaction, SinkError, Target};
use crate::components::bgp::rib_support::RibSupportRegistry;
use crate::components::bgp::table::TableKey;
use crate::components::route::{PeerId, RouteKey, RouterId};
use crate::utils::message_bus::{Message, MessageBusError, MessageReceiver, MessageSender};
use crate::utils::mutex_utils::{TryLockWithTimeout, TryRwLockWithTimeout};
use crate::utils::thread_manager::{ThreadManager, ThreadManagerError};
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, TryLockError};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

const LOCK_TIMEOUT: Duration = Duration::from_millis(100);
// Host calls may wait for a worker to finish a whole batch.
const HOST_LOCK_TIMEOUT: Duration = Duration::from_secs(2);
const REPORT_INTERVAL: u64 = 1000;

pub type SharedTable = Arc<Mutex<Box<dyn RibTable>>>;
pub type SharedPeers = Arc<RwLock<PeerRegistry>>;
pub type SharedOutbound = Arc<Mutex<OutboundStore>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RibCommand {
    Update(Vec<RouteUpdate>),
    /// Flush every path the router contributed.
    PeerDown(RouterId),
    /// Send the current best paths to a peer that came up.
    PeerUp(PeerId),
    Stop,
}
impl Message for RibCommand {}

#[derive(Error, Debug)]
pub enum RibWorkerError {
    #[error("Failed to lock resource: {0}")]
    LockError(String),
    #[error("RIB error: {0}")]
    Rib(#[from] RibError),
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Message bus error: {0}")]
    MessageBusError(#[from] MessageBusError),
    #[error("Thread manager error: {0}")]
    ThreadManagerError(#[from] ThreadManagerError),
    #[error("Table {0} is not carried by this RIB")]
    UnknownTable(TableKey),
}

impl<T> From<PoisonError<T>> for RibWorkerError {
    fn from(err: PoisonError<T>) -> Self {
        RibWorkerError::LockError(err.to_string())
    }
}

impl<T> From<TryLockError<T>> for RibWorkerError {
    fn from(err: TryLockError<T>) -> Self {
        RibWorkerError::LockError(err.to_string())
    }
}

/// Sequential processor of one table. Commands are staged into a
/// transaction and committed to the shared outbound store.
pub struct RibWorker {
    table: SharedTable,
    peers: SharedPeers,
    outbound: SharedOutbound,
    receiver: MessageReceiver,
    processed: u64,
}

impl RibWorker {
    pub fn new(
        table: SharedTable,
        peers: SharedPeers,
        outbound: SharedOutbound,
        receiver: MessageReceiver,
    ) -> Self {
        Self {
            table,
            peers,
            outbound,
            receiver,
            processed: 0,
        }
    }

    pub fn run(mut self) {
        let table = match self.table.try_lock_with_timeout(LOCK_TIMEOUT) {
            Ok(table) => table.table_key(),
            Err(e) => {
                error!("RIB worker could not read its table: {}", e);
                return;
            }
        };
        info!("RIB worker for {} started", table);

        while let Ok(message) = self.receiver.recv() {
            let Some(command) = message.cast::<RibCommand>() else {
                error!("Received an invalid message type. Stopping RIB worker for {}...", table);
                break;
            };
            if *command == RibCommand::Stop {
                break;
            }
            match self.handle(command) {
                Ok(committed) => debug!("{}: committed {} operations", table, committed),
                Err(e) => warn!("{}: failed to process command: {}", table, e),
            }
        }

        info!("RIB worker for {} stopped after {} commands", table, self.processed);
    }

    /// Returns the number of outbound operations committed.
    pub fn handle(&mut self, command: &RibCommand) -> Result<usize, RibWorkerError> {
        // Every lock the commit needs is taken before the table changes, so a
        // timeout leaves the table untouched. Peer state must not change
        // between staging and commit.
        let peers = self.peers.try_read_with_timeout(LOCK_TIMEOUT)?;
        let mut outbound = self.outbound.try_lock_with_timeout(LOCK_TIMEOUT)?;
        let mut table = self.table.try_lock_with_timeout(LOCK_TIMEOUT)?;

        let mut transaction = RibTransaction::new();
        let result = match command {
            RibCommand::Update(updates) => table.apply(updates.clone(), &*peers, &mut transaction),
            RibCommand::PeerDown(router_id) => table.remove_peer(*router_id, &*peers, &mut transaction),
            RibCommand::PeerUp(peer) => table.initialize_peer(*peer, &*peers, &mut transaction),
            RibCommand::Stop => Ok(0),
        };
        drop(table);

        // Whatever was staged before a failure still goes out.
        let committed = transaction.commit(&mut *outbound);
        drop(outbound);
        drop(peers);
        result?;
        let committed = committed?;

        self.processed += 1;
        if self.processed % REPORT_INTERVAL == 0 {
            info!("RIB worker processed {} commands", self.processed);
        }
        Ok(committed)
    }
}

struct WorkerHandle {
    sender: MessageSender,
    thread_id: Uuid,
    table: SharedTable,
}

/// Hosts one worker per configured table and routes commands to them.
pub struct Rib {
    thread_manager: ThreadManager,
    supports: RibSupportRegistry,
    workers: BTreeMap<TableKey, WorkerHandle>,
    peers: SharedPeers,
    outbound: SharedOutbound,
}

impl Rib {
    pub fn from_config(config: &RibConfig) -> Result<Self, RibWorkerError> {
        config.validate()?;

        let mut supports = RibSupportRegistry::new();
        for table in &config.tables {
            supports.register(RibSupportRegistry::support_for(table.table, table.add_path));
        }

        let peers = Arc::new(RwLock::new(config.peer_registry()));
        let outbound = Arc::new(Mutex::new(OutboundStore::new()));
        let mut thread_manager = ThreadManager::new();
        let mut workers = BTreeMap::new();

        for table_config in &config.tables {
            let table_key = table_config.table;
            let Some(support) = supports.get(table_key) else {
                continue;
            };
            let table: SharedTable = Arc::new(Mutex::new(new_table(
                support,
                config.local_as,
                config.med_comparison,
                table_config.path_selection,
            )));
            let (sender, receiver) = thread_manager.get_message_bus_channel_pair(config.channel_bound)?;
            let worker = RibWorker::new(table.clone(), peers.clone(), outbound.clone(), receiver);
            let thread_id = thread_manager.start_thread(move || worker.run())?;
            workers.insert(
                table_key,
                WorkerHandle {
                    sender,
                    thread_id,
                    table,
                },
            );
        }
        info!("RIB started with {} tables", workers.len());

        Ok(Self {
            thread_manager,
            supports,
            workers,
            peers,
            outbound,
        })
    }

    pub fn tables(&self) -> Vec<TableKey> {
        self.supports.tables().collect()
    }

    /// Routes every update to the worker of its table. Updates for tables
    /// this RIB does not carry are dropped. Returns the number dispatched.
    pub fn update(&self, updates: Vec<RouteUpdate>) -> Result<usize, RibWorkerError> {
        let mut per_table: BTreeMap<TableKey, Vec<RouteUpdate>> = BTreeMap::new();
        for update in updates {
            if self.workers.contains_key(&update.table) {
                per_table.entry(update.table).or_default().push(update);
            } else {
                warn!("Skipping update for unsupported table {}", update.table);
            }
        }

        let mut dispatched = 0;
        for (table, updates) in per_table {
            dispatched += updates.len();
            self.send(table, RibCommand::Update(updates))?;
        }
        Ok(dispatched)
    }

    pub fn add_peer(&self, peer: PeerId, info: PeerInfo) -> Result<(), RibWorkerError> {
        self.peers.try_write_with_timeout(HOST_LOCK_TIMEOUT)?.add_peer(peer, info);
        self.broadcast(RibCommand::PeerUp(peer))
    }

    /// Marks the peer down, forgets what was sent to it and withdraws what
    /// it contributed.
    pub fn peer_down(&self, peer: PeerId) -> Result<(), RibWorkerError> {
        self.peers.try_write_with_timeout(HOST_LOCK_TIMEOUT)?.set_disconnected(peer);
        let cleared = self
            .outbound
            .try_lock_with_timeout(HOST_LOCK_TIMEOUT)?
            .clear(Target::AdjRibOut(peer));
        info!("Peer {} down, dropped {} advertised routes", peer, cleared);
        self.broadcast(RibCommand::PeerDown(peer.router_id()))
    }

    pub fn peer_up(&self, peer: PeerId) -> Result<(), RibWorkerError> {
        self.peers.try_write_with_timeout(HOST_LOCK_TIMEOUT)?.set_connected(peer);
        info!("Peer {} up", peer);
        self.broadcast(RibCommand::PeerUp(peer))
    }

    pub fn outbound(&self) -> SharedOutbound {
        self.outbound.clone()
    }

    pub fn best_path(&self, table: TableKey, key: &RouteKey) -> Result<Option<BestPath>, RibWorkerError> {
        let worker = self
            .workers
            .get(&table)
            .ok_or(RibWorkerError::UnknownTable(table))?;
        let table = worker.table.try_lock_with_timeout(HOST_LOCK_TIMEOUT)?;
        Ok(table.best_path(key))
    }

    /// Every path selected for `key`, best first.
    pub fn best_paths(&self, table: TableKey, key: &RouteKey) -> Result<Vec<BestPath>, RibWorkerError> {
        let worker = self
            .workers
            .get(&table)
            .ok_or(RibWorkerError::UnknownTable(table))?;
        let table = worker.table.try_lock_with_timeout(HOST_LOCK_TIMEOUT)?;
        Ok(table.best_paths(key))
    }

    pub fn overview(&self) -> Result<Vec<TableOverview>, RibWorkerError> {
        let mut overview = Vec::with_capacity(self.workers.len());
        for worker in self.workers.values() {
            overview.push(worker.table.try_lock_with_timeout(HOST_LOCK_TIMEOUT)?.overview());
        }
        Ok(overview)
    }

    pub fn is_running(&self, table: TableKey) -> Result<bool, RibWorkerError> {
        let worker = self
            .workers
            .get(&table)
            .ok_or(RibWorkerError::UnknownTable(table))?;
        Ok(self.thread_manager.is_thread_running(&worker.thread_id)?)
    }

    /// Stops every worker once it drained the commands already queued.
    pub fn shutdown(&mut self) -> Result<(), RibWorkerError> {
        for (table, worker) in &self.workers {
            if let Err(e) = worker.sender.send(Box::new(RibCommand::Stop)) {
                warn!("Worker for {} already gone: {}", table, e);
            }
        }
        self.thread_manager.join_all()?;
        info!("RIB stopped");
        Ok(())
    }

    fn send(&self, table: TableKey, command: RibCommand) -> Result<(), RibWorkerError> {
        let worker = self
            .workers
            .get(&table)
            .ok_or(RibWorkerError::UnknownTable(table))?;
        worker
            .sender
            .send(Box::new(command))
            .map_err(MessageBusError::SendError)?;
        Ok(())
    }

    fn broadcast(&self, command: RibCommand) -> Result<(), RibWorkerError> {
        for table in self.workers.keys() {
            self.send(*table, command.clone())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::bgp::bgp_peers::PeerRole;
    use crate::components::bgp::rib_support::UnicastRibSupport;
    use crate::components::bgp::bgp_selector::{MedComparison, PathSelectionMode};
    use crate::components::route::{PathAttributes, PathElement, Route, NON_PATH_ID};
    use ip_network::IpNetwork;
    use std::collections::BTreeSet;

    fn peer(last: u8) -> PeerId {
        PeerId::from(std::net::Ipv4Addr::new(10, 0, 0, last))
    }

    fn key() -> RouteKey {
        RouteKey::from(IpNetwork::from_str_truncate("203.0.113.0/24").unwrap())
    }

    fn worker(receiver: MessageReceiver) -> (RibWorker, SharedOutbound) {
        let mut registry = PeerRegistry::new(65000, RouterId(1));
        for last in [1, 2] {
            registry.add_peer(
                peer(last),
                PeerInfo {
                    role: PeerRole::Ebgp,
                    remote_as: None,
                    tables: BTreeSet::from([TableKey::IPV4_UNICAST]),
                },
            );
        }
        let table: SharedTable = Arc::new(Mutex::new(new_table(
            Arc::new(UnicastRibSupport::ipv4()),
            65000,
            MedComparison::default(),
            PathSelectionMode::default(),
        )));
        let outbound = Arc::new(Mutex::new(OutboundStore::new()));
        let worker = RibWorker::new(table, Arc::new(RwLock::new(registry)), outbound.clone(), receiver);
        (worker, outbound)
    }

    fn announcement() -> RouteUpdate {
        RouteUpdate::announce(
            TableKey::IPV4_UNICAST,
            peer(1).router_id(),
            Route::new(
                key(),
                PathAttributes {
                    as_path: vec![PathElement::ASN(64500)],
                    ..Default::default()
                },
            ),
        )
    }

    #[test]
    fn test_handle_commits_transaction() -> Result<(), RibWorkerError> {
        let thread_manager = ThreadManager::new();
        let (_tx, rx) = thread_manager.get_message_bus_channel_pair(1)?;
        let (mut worker, outbound) = worker(rx);

        assert_eq!(worker.handle(&RibCommand::Update(vec![announcement()]))?, 2);
        {
            let store = outbound.lock().unwrap();
            assert_eq!(store.len(Target::LocRib), 1);
            assert_eq!(store.len(Target::AdjRibOut(peer(2))), 1);
        }

        let withdrawal = RouteUpdate::withdraw(TableKey::IPV4_UNICAST, peer(1).router_id(), key(), NON_PATH_ID);
        assert_eq!(worker.handle(&RibCommand::Update(vec![withdrawal]))?, 2);
        assert!(outbound.lock().unwrap().targets().is_empty());
        Ok(())
    }

    #[test]
    fn test_handle_surfaces_sink_error() -> Result<(), RibWorkerError> {
        let thread_manager = ThreadManager::new();
        let (_tx, rx) = thread_manager.get_message_bus_channel_pair(1)?;
        let (mut worker, outbound) = worker(rx);
        outbound.lock().unwrap().set_rejecting(peer(2), true);

        let result = worker.handle(&RibCommand::Update(vec![announcement()]));
        assert!(matches!(result, Err(RibWorkerError::Sink(SinkError::Rejected { .. }))));
        // the loc-rib write came before the rejected one
        assert_eq!(outbound.lock().unwrap().len(Target::LocRib), 1);
        Ok(())
    }

    #[test]
    fn test_lock_timeout_leaves_table_untouched() -> Result<(), RibWorkerError> {
        let thread_manager = ThreadManager::new();
        let (_tx, rx) = thread_manager.get_message_bus_channel_pair(1)?;
        let (mut worker, outbound) = worker(rx);
        let table = worker.table.clone();
        let command = RibCommand::Update(vec![announcement()]);

        {
            let _held = outbound.lock().unwrap();
            assert!(matches!(worker.handle(&command), Err(RibWorkerError::LockError(_))));
            assert!(table.lock().unwrap().best_path(&key()).is_none());
        }

        // the same update goes through once the store is free again
        assert_eq!(worker.handle(&command)?, 2);
        assert!(table.lock().unwrap().best_path(&key()).is_some());
        assert_eq!(outbound.lock().unwrap().len(Target::LocRib), 1);
        Ok(())
    }

    #[test]
    fn test_worker_thread_stops() -> Result<(), RibWorkerError> {
        let mut thread_manager = ThreadManager::new();
        let (tx, rx) = thread_manager.get_message_bus_channel_pair(4)?;
        let (worker, outbound) = worker(rx);
        let id = thread_manager.start_thread(move || worker.run())?;

        tx.send(Box::new(RibCommand::Update(vec![announcement()])))
            .map_err(MessageBusError::SendError)?;
        tx.send(Box::new(RibCommand::Stop))
            .map_err(MessageBusError::SendError)?;
        thread_manager.join_thread(&id)?;

        assert_eq!(outbound.lock().unwrap().len(Target::LocRib), 1);
        Ok(())
    }
}
