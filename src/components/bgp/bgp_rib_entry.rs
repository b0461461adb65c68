use crate::components::bgp::bgp_bestroute::BestPath;
use crate::components::bgp::bgp_selector::{BestPathSelector, PathSelectionMode};
use crate::components::bgp::rib_support::RibSupport;
use crate::components::route::{PathId, Route, RouterId, NON_PATH_ID};
use crate::utils::offset_table::OffsetTable;
use crate::utils::offset_values::OffsetValues;
use log::trace;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What one contributing router stores in an entry slot.
pub trait EntryPayload: Clone + fmt::Debug + Send + 'static {
    /// True when the payload keeps several paths per router (add-path).
    const COMPLEX: bool;

    fn from_route(path_id: PathId, local_path_id: PathId, route: Route) -> Self;

    /// Stores `route`, replacing any path with the same identity. A replaced
    /// path keeps its local path id and `local_path_id` is ignored.
    fn add(&mut self, path_id: PathId, local_path_id: PathId, route: Route);

    /// Drops the path and returns whether the slot has no paths left.
    fn remove(&mut self, path_id: PathId) -> bool;

    fn route(&self, path_id: PathId) -> Option<&Route>;

    /// Calls `f` with the remote path id, local path id and route of every
    /// path.
    fn for_each_path<F: FnMut(PathId, PathId, &Route)>(&self, f: F);

    fn path_count(&self) -> usize;
}

/// Simple flavour: one route per router, path ids are always [`NON_PATH_ID`].
impl EntryPayload for Route {
    const COMPLEX: bool = false;

    fn from_route(_path_id: PathId, _local_path_id: PathId, route: Route) -> Self {
        route
    }

    fn add(&mut self, _path_id: PathId, _local_path_id: PathId, route: Route) {
        *self = route;
    }

    fn remove(&mut self, _path_id: PathId) -> bool {
        true
    }

    fn route(&self, _path_id: PathId) -> Option<&Route> {
        Some(self)
    }

    fn for_each_path<F: FnMut(PathId, PathId, &Route)>(&self, mut f: F) {
        f(NON_PATH_ID, NON_PATH_ID, self)
    }

    fn path_count(&self) -> usize {
        1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ListedRoute {
    path_id: PathId,
    local_path_id: PathId,
    route: Route,
}

/// Add-path flavour: routes of one router, sorted by their remote path id and
/// tagged with the local path id they are advertised under.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RouteList(Vec<ListedRoute>);

impl RouteList {
    pub fn path_ids(&self) -> impl Iterator<Item = PathId> + '_ {
        self.0.iter().map(|listed| listed.path_id)
    }

    fn position(&self, path_id: PathId) -> Result<usize, usize> {
        self.0.binary_search_by_key(&path_id, |listed| listed.path_id)
    }
}

impl EntryPayload for RouteList {
    const COMPLEX: bool = true;

    fn from_route(path_id: PathId, local_path_id: PathId, route: Route) -> Self {
        Self(vec![ListedRoute {
            path_id,
            local_path_id,
            route,
        }])
    }

    fn add(&mut self, path_id: PathId, local_path_id: PathId, route: Route) {
        match self.position(path_id) {
            Ok(index) => self.0[index].route = route,
            Err(index) => self.0.insert(
                index,
                ListedRoute {
                    path_id,
                    local_path_id,
                    route,
                },
            ),
        }
    }

    fn remove(&mut self, path_id: PathId) -> bool {
        if let Ok(index) = self.position(path_id) {
            self.0.remove(index);
        }
        self.0.is_empty()
    }

    fn route(&self, path_id: PathId) -> Option<&Route> {
        self.position(path_id).ok().map(|index| &self.0[index].route)
    }

    fn for_each_path<F: FnMut(PathId, PathId, &Route)>(&self, mut f: F) {
        for listed in &self.0 {
            f(listed.path_id, listed.local_path_id, &listed.route);
        }
    }

    fn path_count(&self) -> usize {
        self.0.len()
    }
}

/// Candidate routes for one destination plus the outcome of the last
/// selection pass.
#[derive(Debug, Clone)]
pub struct RouteEntry<P: EntryPayload> {
    values: OffsetValues<P>,
    best_paths: Vec<BestPath>,
    /// Selected paths that still have to be advertised.
    new_best_paths: Vec<BestPath>,
    /// Previously selected paths that still have to be withdrawn.
    removed_best_paths: Vec<BestPath>,
    path_id_counter: PathId,
}

pub type SimpleRouteEntry = RouteEntry<Route>;
pub type ComplexRouteEntry = RouteEntry<RouteList>;

impl<P: EntryPayload> Default for RouteEntry<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: EntryPayload> RouteEntry<P> {
    pub fn new() -> Self {
        Self {
            values: OffsetValues::new(),
            best_paths: Vec::new(),
            new_best_paths: Vec::new(),
            removed_best_paths: Vec::new(),
            path_id_counter: NON_PATH_ID,
        }
    }

    /// Stores the route of `router_id` and returns the offset of its slot.
    /// A second add for the same router (and path id, for add-path entries)
    /// overwrites the first one.
    pub fn add_route(&mut self, router_id: RouterId, path_id: PathId, route: Route) -> usize {
        trace!("Added route from {} path {} {:?}", router_id, path_id, route.attributes);
        match self.values.offset_of(router_id) {
            Some(offset) => {
                let is_new = self.values.get_mut(offset).route(path_id).is_none();
                let local_path_id = if is_new { self.allocate_path_id() } else { NON_PATH_ID };
                self.values.get_mut(offset).add(path_id, local_path_id, route);
                offset
            }
            None => {
                let local_path_id = self.allocate_path_id();
                self.values
                    .insert(router_id, P::from_route(path_id, local_path_id, route))
            }
        }
    }

    /// Local path ids start at 1 and are never reused within the entry.
    fn allocate_path_id(&mut self) -> PathId {
        if !P::COMPLEX {
            return NON_PATH_ID;
        }
        self.path_id_counter += 1;
        self.path_id_counter
    }

    /// Returns whether the entry has no contributors left.
    ///
    /// # Panics
    /// When `router_id` does not contribute to this entry.
    pub fn remove_route(&mut self, router_id: RouterId, path_id: PathId) -> bool {
        let offset = self
            .values
            .offset_of(router_id)
            .unwrap_or_else(|| panic!("router id {} does not contribute to this entry", router_id));
        if self.values.get_mut(offset).remove(path_id) {
            self.values.remove(router_id);
        }
        self.values.is_empty()
    }

    /// Drops every path of `router_id`. Returns whether the entry is empty.
    pub fn remove_router(&mut self, router_id: RouterId) -> bool {
        self.values.remove(router_id);
        self.values.is_empty()
    }

    pub fn select_best(&mut self, local_as: u32, support: &dyn RibSupport) -> bool {
        self.select_best_with(BestPathSelector::new(local_as), support)
    }

    /// Runs `selector` over every path of the entry, with the attributes
    /// `support` extracts from each route. Returns true when the selection
    /// differs from the cached one.
    ///
    /// Simple entries select one path and queue the whole previous selection
    /// for removal. Add-path entries select as many paths as the selector's
    /// mode allows, and queue only the paths that dropped out.
    pub fn select_best_with(&mut self, selector: BestPathSelector, support: &dyn RibSupport) -> bool {
        let mut selector = match P::COMPLEX {
            true => selector,
            false => selector.with_path_selection(PathSelectionMode::Best),
        };
        for (router_id, payload) in self.values.iter() {
            payload.for_each_path(|path_id, local_path_id, route| {
                selector.process_path(
                    router_id,
                    path_id,
                    local_path_id,
                    route,
                    support.extract_attributes(route),
                )
            });
        }

        let selected = selector.results();
        let modified = selected != self.best_paths;
        trace!(
            "Previous best {:?}, current best {:?}, result {}",
            self.best_paths,
            selected,
            modified
        );
        if !modified {
            return false;
        }

        let previous = std::mem::replace(&mut self.best_paths, selected);
        if P::COMPLEX {
            self.new_best_paths = self
                .best_paths
                .iter()
                .filter(|path| !previous.contains(path))
                .cloned()
                .collect();
            let current = &self.best_paths;
            self.removed_best_paths.extend(
                previous
                    .into_iter()
                    .filter(|old| !current.iter().any(|path| path.is_same_path(old))),
            );
        } else {
            self.new_best_paths = self.best_paths.clone();
            self.removed_best_paths.extend(previous);
        }
        true
    }

    /// First selected path.
    pub fn best_path(&self) -> Option<&BestPath> {
        self.best_paths.first()
    }

    pub fn best_paths(&self) -> &[BestPath] {
        &self.best_paths
    }

    /// Hands out the paths queued for advertisement, at most once.
    pub fn take_new_best_paths(&mut self) -> Vec<BestPath> {
        std::mem::take(&mut self.new_best_paths)
    }

    /// Hands out the paths queued for removal, at most once.
    pub fn take_removed_best_paths(&mut self) -> Vec<BestPath> {
        std::mem::take(&mut self.removed_best_paths)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn path_count(&self) -> usize {
        self.values.iter().map(|(_, payload)| payload.path_count()).sum()
    }

    pub fn offsets(&self) -> &OffsetTable {
        self.values.offsets()
    }

    pub fn contributors(&self) -> &[RouterId] {
        self.values.offsets().router_ids()
    }

    pub fn contains(&self, router_id: RouterId) -> bool {
        self.values.offset_of(router_id).is_some()
    }

    pub fn payload_of(&self, router_id: RouterId) -> Option<&P> {
        self.values.value_of(router_id)
    }

    pub fn route_of(&self, router_id: RouterId, path_id: PathId) -> Option<&Route> {
        self.payload_of(router_id)?.route(path_id)
    }
}
