use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: i64 },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("queue error: {0}")]
    Queue(#[from] lookout_queue::QueueError),
}

impl StoreError {
    pub fn job_not_found(id: i64) -> Self {
        StoreError::NotFound { kind: "job", id }
    }

    pub fn cluster_not_found(id: i64) -> Self {
        StoreError::NotFound { kind: "cluster", id }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) | StoreError::Io(_) => true,
            StoreError::Queue(e) => e.is_transient(),
            _ => false,
        }
    }
}
