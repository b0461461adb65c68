use crate::components::bgp::table::TableKey;
use crate::components::route::{PathAttributes, PathId, PeerId, Route, RouteKey};
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Where a write lands: the local RIB or the adj-rib-out of one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Target {
    LocRib,
    AdjRibOut(PeerId),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Target::LocRib => write!(f, "loc-rib"),
            Target::AdjRibOut(peer) => write!(f, "adj-rib-out of {}", peer),
        }
    }
}

/// Location of one route inside a target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoutePath {
    pub table: TableKey,
    pub key: RouteKey,
    pub path_id: PathId,
}

impl fmt::Display for RoutePath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} path {}", self.table, self.key, self.path_id)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("Write to {target} rejected for {path}")]
    Rejected { target: Target, path: RoutePath },
    #[error("Lock error: {0}")]
    LockError(String),
}

/// Write-only destination of the propagation code.
pub trait OutboundSink {
    fn write(
        &mut self,
        target: Target,
        path: RoutePath,
        attributes: Arc<PathAttributes>,
        route: Route,
    ) -> Result<(), SinkError>;

    fn delete(&mut self, target: Target, path: RoutePath) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Write {
        target: Target,
        path: RoutePath,
        attributes: Arc<PathAttributes>,
        route: Route,
    },
    Delete {
        target: Target,
        path: RoutePath,
    },
}

/// Stages operations and applies them in order on [`commit`](Self::commit).
#[derive(Debug, Default)]
pub struct RibTransaction {
    operations: Vec<Operation>,
}

impl RibTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Applies every staged operation, including the ones after a failed
    /// one, and returns the first failure. Otherwise returns the number of
    /// operations applied.
    pub fn commit(self, sink: &mut dyn OutboundSink) -> Result<usize, SinkError> {
        let count = self.operations.len();
        let mut first_error = None;
        for operation in self.operations {
            let result = match operation {
                Operation::Write {
                    target,
                    path,
                    attributes,
                    route,
                } => sink.write(target, path, attributes, route),
                Operation::Delete { target, path } => sink.delete(target, path),
            };
            if let Err(err) = result {
                debug!("Commit failed: {}", err);
                first_error.get_or_insert(err);
            }
        }
        debug!("Committed {} operations", count);
        match first_error {
            Some(err) => Err(err),
            None => Ok(count),
        }
    }
}

impl OutboundSink for RibTransaction {
    fn write(
        &mut self,
        target: Target,
        path: RoutePath,
        attributes: Arc<PathAttributes>,
        route: Route,
    ) -> Result<(), SinkError> {
        self.operations.push(Operation::Write {
            target,
            path,
            attributes,
            route,
        });
        Ok(())
    }

    fn delete(&mut self, target: Target, path: RoutePath) -> Result<(), SinkError> {
        self.operations.push(Operation::Delete { target, path });
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRoute {
    pub attributes: Arc<PathAttributes>,
    pub route: Route,
}

/// In-memory view of the loc-rib and every adj-rib-out.
#[derive(Debug, Default)]
pub struct OutboundStore {
    targets: HashMap<Target, HashMap<RoutePath, StoredRoute>>,
    rejecting: HashSet<PeerId>,
}

impl OutboundStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every write and delete for `peer` fail.
    pub fn set_rejecting(&mut self, peer: PeerId, rejecting: bool) {
        if rejecting {
            self.rejecting.insert(peer);
        } else {
            self.rejecting.remove(&peer);
        }
    }

    pub fn get(&self, target: Target, path: &RoutePath) -> Option<&StoredRoute> {
        self.targets.get(&target)?.get(path)
    }

    pub fn routes(&self, target: Target) -> impl Iterator<Item = (&RoutePath, &StoredRoute)> {
        self.targets.get(&target).into_iter().flat_map(|routes| routes.iter())
    }

    pub fn len(&self, target: Target) -> usize {
        self.targets.get(&target).map(|routes| routes.len()).unwrap_or(0)
    }

    pub fn targets(&self) -> Vec<Target> {
        let mut targets: Vec<Target> = self
            .targets
            .iter()
            .filter(|(_, routes)| !routes.is_empty())
            .map(|(target, _)| *target)
            .collect();
        targets.sort();
        targets
    }

    /// Forgets everything written to `target`. Returns the number of routes
    /// dropped.
    pub fn clear(&mut self, target: Target) -> usize {
        self.targets
            .remove(&target)
            .map(|routes| routes.len())
            .unwrap_or(0)
    }

    fn check(&self, target: Target, path: &RoutePath) -> Result<(), SinkError> {
        match target {
            Target::AdjRibOut(peer) if self.rejecting.contains(&peer) => Err(SinkError::Rejected {
                target,
                path: path.clone(),
            }),
            _ => Ok(()),
        }
    }
}

impl OutboundSink for OutboundStore {
    fn write(
        &mut self,
        target: Target,
        path: RoutePath,
        attributes: Arc<PathAttributes>,
        route: Route,
    ) -> Result<(), SinkError> {
        self.check(target, &path)?;
        trace!("Write {} to {}", path, target);
        self.targets
            .entry(target)
            .or_default()
            .insert(path, StoredRoute { attributes, route });
        Ok(())
    }

    fn delete(&mut self, target: Target, path: RoutePath) -> Result<(), SinkError> {
        self.check(target, &path)?;
        trace!("Delete {} from {}", path, target);
        if let Some(routes) = self.targets.get_mut(&target) {
            routes.remove(&path);
        }
        Ok(())
    }
}
