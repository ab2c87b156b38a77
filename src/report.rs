use crate::{
    pool::{JobId, PoolStats},
    service::BatchResponse,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub started: String,
    pub finished: String,
    pub inputs: Vec<InputReport>,
    pub response: BatchResponse,
    pub pool: PoolStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputReport {
    pub id: JobId,
    pub path: String,
    pub bytes: u64,
    pub sha256: String,
}
