use serde::{Deserialize, Serialize};

pub type ClusterId = i64;

/// A data-source cluster that jobs query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub cluster_id: ClusterId,
    pub name: String,
    /// Endpoint the data source posts queries to.
    pub broker_url: String,
    #[serde(default)]
    pub description: Option<String>,
}
