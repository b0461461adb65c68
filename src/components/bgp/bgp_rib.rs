use crate::components::bgp::bgp_bestroute::BestPath;
use crate::components::bgp::bgp_peers::PeerTracker;
use crate::components::bgp::bgp_rib_entry::{EntryPayload, RouteEntry, RouteList};
use crate::components::bgp::bgp_selector::{BestPathSelector, MedComparison, PathSelectionMode};
use crate::components::bgp::outbound::OutboundSink;
use crate::components::bgp::propagation::{Propagation, PropagationError};
use crate::components::bgp::rib_support::RibSupport;
use crate::components::bgp::table::TableKey;
use crate::components::route::{PathId, PeerId, Route, RouteKey, RouterId, NON_PATH_ID};
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

/// One announcement or withdrawal as produced by the inbound decoder.
/// `route: None` withdraws the path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteUpdate {
    pub table: TableKey,
    pub router_id: RouterId,
    pub route_key: RouteKey,
    pub path_id: PathId,
    pub route: Option<Route>,
}

impl RouteUpdate {
    pub fn announce(table: TableKey, router_id: RouterId, route: Route) -> Self {
        Self {
            table,
            router_id,
            route_key: route.key.clone(),
            path_id: route.path_id,
            route: Some(route),
        }
    }

    pub fn withdraw(table: TableKey, router_id: RouterId, route_key: RouteKey, path_id: PathId) -> Self {
        Self {
            table,
            router_id,
            route_key,
            path_id,
            route: None,
        }
    }

    pub fn is_withdrawal(&self) -> bool {
        self.route.is_none()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RibError {
    #[error("Propagation error: {0}")]
    Propagation(#[from] PropagationError),
}

/// Counters of one table, as shown by the overview printer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableOverview {
    pub table: TableKey,
    pub add_path: bool,
    pub destinations: usize,
    pub paths: usize,
    pub best_paths: usize,
    pub contributors: usize,
}

/// Keys touched by a batch, in first-touch order and without duplicates.
#[derive(Default)]
struct TouchedKeys {
    order: Vec<RouteKey>,
    seen: HashSet<RouteKey>,
}

impl TouchedKeys {
    fn touch(&mut self, key: &RouteKey) {
        if self.seen.insert(key.clone()) {
            self.order.push(key.clone());
        }
    }
}

/// The entries of one table.
#[derive(Debug)]
pub struct LocRib<P: EntryPayload> {
    support: Arc<dyn RibSupport>,
    local_as: u32,
    med_comparison: MedComparison,
    path_selection: PathSelectionMode,
    entries: HashMap<RouteKey, RouteEntry<P>>,
}

pub type SimpleLocRib = LocRib<Route>;
pub type ComplexLocRib = LocRib<RouteList>;

impl<P: EntryPayload> LocRib<P> {
    pub fn new(support: Arc<dyn RibSupport>, local_as: u32) -> Self {
        Self {
            support,
            local_as,
            med_comparison: MedComparison::default(),
            path_selection: PathSelectionMode::default(),
            entries: HashMap::new(),
        }
    }

    pub fn with_med_comparison(mut self, med_comparison: MedComparison) -> Self {
        self.med_comparison = med_comparison;
        self
    }

    /// Paths selected per destination. Only add-path tables select more
    /// than one.
    pub fn with_path_selection(mut self, path_selection: PathSelectionMode) -> Self {
        self.path_selection = path_selection;
        self
    }

    pub fn table_key(&self) -> TableKey {
        self.support.table_key()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, key: &RouteKey) -> Option<&RouteEntry<P>> {
        self.entries.get(key)
    }

    pub fn best_path(&self, key: &RouteKey) -> Option<&BestPath> {
        self.entries.get(key)?.best_path()
    }

    pub fn best_paths(&self, key: &RouteKey) -> &[BestPath] {
        self.entries
            .get(key)
            .map(|entry| entry.best_paths())
            .unwrap_or_default()
    }

    /// Applies a batch in two stages: every add and withdrawal first, then one
    /// selection and propagation per touched destination. Returns the number
    /// of destinations whose best path changed.
    ///
    /// A propagation failure does not stop the batch, the first one is
    /// returned once every touched destination was processed.
    pub fn apply(
        &mut self,
        updates: Vec<RouteUpdate>,
        tracker: &dyn PeerTracker,
        sink: &mut dyn OutboundSink,
    ) -> Result<usize, RibError> {
        let mut touched = TouchedKeys::default();
        for update in updates {
            self.stage(update, &mut touched);
        }
        trace!("Staged {} destinations of {}", touched.order.len(), self.table_key());
        self.converge(touched.order, tracker, sink)
    }

    /// Drops every path contributed by `router_id` and converges the
    /// destinations it took part in.
    pub fn remove_peer(
        &mut self,
        router_id: RouterId,
        tracker: &dyn PeerTracker,
        sink: &mut dyn OutboundSink,
    ) -> Result<usize, RibError> {
        let mut touched = Vec::new();
        for (key, entry) in self.entries.iter_mut() {
            if entry.contains(router_id) {
                entry.remove_router(router_id);
                touched.push(key.clone());
            }
        }
        debug!(
            "Removed peer {} from {} destinations of {}",
            router_id,
            touched.len(),
            self.table_key()
        );
        self.converge(touched, tracker, sink)
    }

    /// Sends every selected path to `peer`. Returns the number of routes
    /// written.
    pub fn initialize_peer(
        &self,
        peer: PeerId,
        tracker: &dyn PeerTracker,
        sink: &mut dyn OutboundSink,
    ) -> Result<usize, RibError> {
        let table = self.table_key();
        if !tracker.is_table_supported(peer, table) {
            debug!("Peer {} does not support {}, nothing to initialize", peer, table);
            return Ok(0);
        }
        let propagation = Propagation::new(self.support.as_ref(), tracker);
        let mut written = 0;
        for (key, entry) in &self.entries {
            written += propagation.initialize_peer(peer, key, entry, sink)?;
        }
        debug!("Initialized peer {} with {} routes of {}", peer, written, table);
        Ok(written)
    }

    pub fn overview(&self) -> TableOverview {
        let mut contributors = HashSet::new();
        let mut paths = 0;
        let mut best_paths = 0;
        for entry in self.entries.values() {
            contributors.extend(entry.contributors().iter().copied());
            paths += entry.path_count();
            best_paths += entry.best_paths().len();
        }
        TableOverview {
            table: self.table_key(),
            add_path: P::COMPLEX,
            destinations: self.entries.len(),
            paths,
            best_paths,
            contributors: contributors.len(),
        }
    }

    fn stage(&mut self, update: RouteUpdate, touched: &mut TouchedKeys) {
        let table = self.table_key();
        if update.table != table {
            warn!("Skipping update for table {}, this RIB carries {}", update.table, table);
            return;
        }
        if !self.support.accepts(&update.route_key) {
            warn!("Skipping destination {} not valid for {}", update.route_key, table);
            return;
        }
        let path_id = if P::COMPLEX { update.path_id } else { NON_PATH_ID };

        match update.route {
            Some(route) => {
                self.entries
                    .entry(update.route_key.clone())
                    .or_default()
                    .add_route(update.router_id, path_id, route);
            }
            None => match self.entries.get_mut(&update.route_key) {
                Some(entry) if entry.contains(update.router_id) => {
                    entry.remove_route(update.router_id, path_id);
                }
                _ => {
                    debug!(
                        "Ignoring withdrawal of {} from {}: not present",
                        update.route_key, update.router_id
                    );
                    return;
                }
            },
        }
        touched.touch(&update.route_key);
    }

    fn converge(
        &mut self,
        touched: Vec<RouteKey>,
        tracker: &dyn PeerTracker,
        sink: &mut dyn OutboundSink,
    ) -> Result<usize, RibError> {
        let local_as = self.local_as;
        let med_comparison = self.med_comparison;
        let path_selection = self.path_selection;
        let propagation = Propagation::new(self.support.as_ref(), tracker);
        let mut modified = 0;
        let mut first_error = None;

        for key in touched {
            let Some(entry) = self.entries.get_mut(&key) else {
                continue;
            };
            let selector = BestPathSelector::new(local_as)
                .with_med_comparison(med_comparison)
                .with_path_selection(path_selection);
            if entry.select_best_with(selector, self.support.as_ref()) {
                modified += 1;
                if let Err(err) = propagation.update_route(&key, entry, sink) {
                    warn!("Failed to propagate {}: {}", key, err);
                    first_error.get_or_insert(err);
                }
            }
            if entry.is_empty() {
                trace!("Removing empty entry {}", key);
                self.entries.remove(&key);
            }
        }

        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(modified),
        }
    }
}

/// Table-erased view of a [`LocRib`], so one worker can own either flavour.
pub trait RibTable: Send + std::fmt::Debug {
    fn table_key(&self) -> TableKey;

    fn apply(
        &mut self,
        updates: Vec<RouteUpdate>,
        tracker: &dyn PeerTracker,
        sink: &mut dyn OutboundSink,
    ) -> Result<usize, RibError>;

    fn remove_peer(
        &mut self,
        router_id: RouterId,
        tracker: &dyn PeerTracker,
        sink: &mut dyn OutboundSink,
    ) -> Result<usize, RibError>;

    fn initialize_peer(
        &self,
        peer: PeerId,
        tracker: &dyn PeerTracker,
        sink: &mut dyn OutboundSink,
    ) -> Result<usize, RibError>;

    fn best_path(&self, key: &RouteKey) -> Option<BestPath>;

    fn best_paths(&self, key: &RouteKey) -> Vec<BestPath>;

    fn overview(&self) -> TableOverview;
}

impl<P: EntryPayload> RibTable for LocRib<P> {
    fn table_key(&self) -> TableKey {
        LocRib::table_key(self)
    }

    fn apply(
        &mut self,
        updates: Vec<RouteUpdate>,
        tracker: &dyn PeerTracker,
        sink: &mut dyn OutboundSink,
    ) -> Result<usize, RibError> {
        LocRib::apply(self, updates, tracker, sink)
    }

    fn remove_peer(
        &mut self,
        router_id: RouterId,
        tracker: &dyn PeerTracker,
        sink: &mut dyn OutboundSink,
    ) -> Result<usize, RibError> {
        LocRib::remove_peer(self, router_id, tracker, sink)
    }

    fn initialize_peer(
        &self,
        peer: PeerId,
        tracker: &dyn PeerTracker,
        sink: &mut dyn OutboundSink,
    ) -> Result<usize, RibError> {
        LocRib::initialize_peer(self, peer, tracker, sink)
    }

    fn best_path(&self, key: &RouteKey) -> Option<BestPath> {
        LocRib::best_path(self, key).cloned()
    }

    fn best_paths(&self, key: &RouteKey) -> Vec<BestPath> {
        LocRib::best_paths(self, key).to_vec()
    }

    fn overview(&self) -> TableOverview {
        LocRib::overview(self)
    }
}

/// Builds the table for `support`, picking route lists for add-path tables.
pub fn new_table(
    support: Arc<dyn RibSupport>,
    local_as: u32,
    med_comparison: MedComparison,
    path_selection: PathSelectionMode,
) -> Box<dyn RibTable> {
    if support.is_complex() {
        Box::new(
            ComplexLocRib::new(support, local_as)
                .with_med_comparison(med_comparison)
                .with_path_selection(path_selection),
        )
    } else {
        Box::new(SimpleLocRib::new(support, local_as).with_med_comparison(med_comparison))
    }
}
