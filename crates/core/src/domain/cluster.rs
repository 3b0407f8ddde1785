// Cluster topology (external configuration)

use serde::{Deserialize, Serialize};

/// Partition of a cluster with uniform node hardware
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubCluster {
    pub name: String,
    pub sockets_per_node: i64,
    pub cores_per_socket: i64,
}

impl SubCluster {
    pub fn cores_per_node(&self) -> i64 {
        self.sockets_per_node * self.cores_per_socket
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    #[serde(default)]
    pub subclusters: Vec<SubCluster>,
}

impl Cluster {
    pub fn subcluster(&self, name: &str) -> Option<&SubCluster> {
        self.subclusters.iter().find(|sc| sc.name == name)
    }
}
