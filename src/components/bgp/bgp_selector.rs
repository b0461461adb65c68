use crate::components::bgp::bgp_bestroute::{BestPath, BestPathState};
use crate::components::route::{PathAttributes, PathId, PeerType, Route, RouterId};
use log::trace;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Which candidates get their MED compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MedComparison {
    /// MED is compared between routes from the same neighbour AS only.
    /// Candidates are grouped by neighbour AS first, so the outcome does not
    /// depend on scan order.
    #[default]
    SameNeighborAs,
    Always,
    Never,
}

/// How many paths an add-path table selects per destination. Tables without
/// add-path always select a single best path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathSelectionMode {
    #[default]
    Best,
    AllPaths,
    NPaths(usize),
}

impl PathSelectionMode {
    /// Maximum number of selected paths, `None` for no limit.
    pub fn limit(self) -> Option<usize> {
        match self {
            PathSelectionMode::Best => Some(1),
            PathSelectionMode::AllPaths => None,
            PathSelectionMode::NPaths(n) => Some(n),
        }
    }
}

#[derive(Debug)]
struct Candidate {
    router_id: RouterId,
    path_id: PathId,
    local_path_id: PathId,
    peer_type: PeerType,
    external: bool,
    igp_cost: u32,
    attributes: Arc<PathAttributes>,
    state: BestPathState,
}

impl Candidate {
    fn comparison_id(&self) -> RouterId {
        self.attributes.originator_id.unwrap_or(self.router_id)
    }

    /// `Less` when `self` is the preferred path.
    fn compare(&self, other: &Candidate, with_med: bool) -> Ordering {
        self.state
            .depreferenced
            .cmp(&other.state.depreferenced)
            .then_with(|| other.state.local_pref.cmp(&self.state.local_pref))
            .then_with(|| self.state.as_path_len.cmp(&other.state.as_path_len))
            .then_with(|| self.state.origin.cmp(&other.state.origin))
            .then_with(|| match with_med {
                true => self.state.multi_exit_disc.cmp(&other.state.multi_exit_disc),
                false => Ordering::Equal,
            })
            .then_with(|| other.external.cmp(&self.external))
            .then_with(|| self.igp_cost.cmp(&other.igp_cost))
            .then_with(|| self.comparison_id().cmp(&other.comparison_id()))
            .then_with(|| {
                self.attributes
                    .cluster_list
                    .len()
                    .cmp(&other.attributes.cluster_list.len())
            })
            .then_with(|| self.router_id.cmp(&other.router_id))
            .then_with(|| self.path_id.cmp(&other.path_id))
    }

    fn to_best_path(&self) -> BestPath {
        BestPath::new(
            self.router_id,
            self.path_id,
            self.local_path_id,
            self.peer_type,
            self.attributes.clone(),
            self.state.clone(),
        )
    }
}

/// Runs the BGP decision process over every candidate of one entry.
/// Every comparison stage is a total order, so the winner does not depend on
/// the order paths are fed in.
#[derive(Debug)]
pub struct BestPathSelector {
    local_as: u32,
    med_comparison: MedComparison,
    path_selection: PathSelectionMode,
    candidates: Vec<Candidate>,
}

impl BestPathSelector {
    pub fn new(local_as: u32) -> Self {
        Self {
            local_as,
            med_comparison: MedComparison::default(),
            path_selection: PathSelectionMode::default(),
            candidates: Vec::new(),
        }
    }

    pub fn with_med_comparison(mut self, med_comparison: MedComparison) -> Self {
        self.med_comparison = med_comparison;
        self
    }

    pub fn with_path_selection(mut self, path_selection: PathSelectionMode) -> Self {
        self.path_selection = path_selection;
        self
    }

    /// Adds one candidate. `attributes` are what the table's RIB support
    /// extracted from `route`; `None` skips the path.
    pub fn process_path(
        &mut self,
        router_id: RouterId,
        path_id: PathId,
        local_path_id: PathId,
        route: &Route,
        attributes: Option<Arc<PathAttributes>>,
    ) {
        let Some(attributes) = attributes else {
            trace!("Skipping {} path {}: no attributes", router_id, path_id);
            return;
        };
        let state = BestPathState::resolve(&attributes);
        trace!(
            "Processing router id {} path {} state {:?}",
            router_id,
            path_id,
            state
        );
        // A neighbour in our own AS means the session is internal whatever
        // the decoder reported.
        let external = route.peer_type == PeerType::External && state.peer_as != self.local_as;
        self.candidates.push(Candidate {
            router_id,
            path_id,
            local_path_id,
            peer_type: route.peer_type,
            external,
            igp_cost: route.igp_cost,
            attributes,
            state,
        });
    }

    pub fn result(&self) -> Option<BestPath> {
        let candidates: Vec<&Candidate> = self.candidates.iter().collect();
        self.best_of(&candidates).map(Candidate::to_best_path)
    }

    /// Selected paths in preference order, as many as the path selection
    /// mode allows. The first one is always [`result`](Self::result).
    pub fn results(&self) -> Vec<BestPath> {
        let limit = self.path_selection.limit().unwrap_or(usize::MAX);
        let mut remaining: Vec<&Candidate> = self.candidates.iter().collect();
        let mut selected = Vec::new();
        while selected.len() < limit {
            let Some(best) = self.best_of(&remaining) else {
                break;
            };
            selected.push(best.to_best_path());
            remaining.retain(|candidate| !std::ptr::eq(*candidate, best));
        }
        selected
    }

    fn best_of<'c>(&self, candidates: &[&'c Candidate]) -> Option<&'c Candidate> {
        match self.med_comparison {
            MedComparison::Always => candidates.iter().copied().min_by(|a, b| a.compare(b, true)),
            MedComparison::Never => candidates.iter().copied().min_by(|a, b| a.compare(b, false)),
            MedComparison::SameNeighborAs => {
                let mut group_winners: BTreeMap<u32, &'c Candidate> = BTreeMap::new();
                for candidate in candidates.iter().copied() {
                    group_winners
                        .entry(candidate.state.peer_as)
                        .and_modify(|winner| {
                            if candidate.compare(*winner, true).is_lt() {
                                *winner = candidate;
                            }
                        })
                        .or_insert(candidate);
                }
                group_winners
                    .into_values()
                    .min_by(|a, b| a.compare(b, false))
            }
        }
    }
}
