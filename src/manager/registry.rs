use std::collections::{BTreeMap, HashMap};

use crate::connection::{Connection, ConnectionId};

/// A connection that identified itself as a node.
#[derive(Debug, Clone)]
pub struct NodeRef {
    pub id: ConnectionId,
    pub busy: bool,
    /// Job whose section this node is working on.
    pub job: Option<u64>,
    pub connection: Connection,
}

/// Every live connection, and the subset that are nodes.
///
/// Callers share it behind a single `RwLock`. Nodes are kept ordered by id so
/// dispatch always picks the oldest idle nodes first.
#[derive(Debug)]
pub struct Registry {
    connections: HashMap<ConnectionId, Connection>,
    nodes: BTreeMap<ConnectionId, NodeRef>,
    next_id: ConnectionId,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
            nodes: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Reserves the id for the next accepted socket.
    pub fn next_id(&mut self) -> ConnectionId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn add_connection(&mut self, connection: Connection) {
        self.connections.insert(connection.id(), connection);
    }

    /// Forgets a connection, including its node entry if it had one.
    pub fn remove_connection(&mut self, id: ConnectionId) -> Option<Connection> {
        if self.nodes.remove(&id).is_some() {
            tracing::info!(conn_id = id, "Node removed");
        }
        self.connections.remove(&id)
    }

    pub fn add_node(&mut self, connection: Connection) {
        let id = connection.id();
        self.nodes.insert(
            id,
            NodeRef {
                id,
                busy: false,
                job: None,
                connection,
            },
        );
        tracing::info!(conn_id = id, nodes = self.nodes.len(), "Node registered");
    }

    /// Marks a node free for the next section. Returns false for unknown ids.
    pub fn set_idle(&mut self, id: ConnectionId) -> bool {
        match self.nodes.get_mut(&id) {
            Some(node) => {
                node.busy = false;
                node.job = None;
                true
            }
            None => false,
        }
    }

    /// Claims exactly `count` idle nodes and marks them busy, or claims none.
    pub fn claim_idle(&mut self, count: usize) -> Option<Vec<(ConnectionId, Connection)>> {
        if count == 0 || self.idle_count() < count {
            return None;
        }
        let claimed: Vec<_> = self
            .nodes
            .values_mut()
            .filter(|node| !node.busy)
            .take(count)
            .map(|node| {
                node.busy = true;
                (node.id, node.connection.clone())
            })
            .collect();
        Some(claimed)
    }

    /// Records which job a claimed node is running.
    pub fn assign_job(&mut self, id: ConnectionId, job_id: u64) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.job = Some(job_id);
        }
    }

    pub fn idle_count(&self) -> usize {
        self.nodes.values().filter(|node| !node.busy).count()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: ConnectionId) -> Option<&NodeRef> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeRef> {
        self.nodes.values()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.connections.values().cloned().collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
