//! Post-upload verification gating local deletion.
//!
//! Size equality only: the size the store reported after the put and a
//! fresh `head_object` must both equal the size the stability gate confirmed.
//! This catches truncated and short transfers without downloading the object
//! again; same-size corruption is out of reach by construction.

use std::sync::Arc;

use crate::store::{PutReceipt, RemoteStore};

/// Outcome of one verification. Only `Match` allows deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Match { size: u64 },
    SizeMismatch { local: u64, remote: u64 },
    /// The remote metadata could not be read back.
    Unavailable { reason: String },
}

impl Verdict {
    pub fn passed(&self) -> bool {
        matches!(self, Verdict::Match { .. })
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Match { size } => write!(f, "sizes match ({} bytes)", size),
            Verdict::SizeMismatch { local, remote } => {
                write!(f, "size mismatch: local {} bytes, remote {} bytes", local, remote)
            }
            Verdict::Unavailable { reason } => write!(f, "remote metadata unavailable: {}", reason),
        }
    }
}

#[derive(Clone)]
pub struct VerificationCheck {
    store: Arc<dyn RemoteStore>,
}

impl VerificationCheck {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    /// Compare `local_size` against the put receipt and the object's current
    /// metadata. Never retries; the coordinator owns that decision.
    pub async fn verify(&self, key: &str, local_size: u64, receipt: &PutReceipt) -> Verdict {
        if receipt.size != local_size {
            return Verdict::SizeMismatch {
                local: local_size,
                remote: receipt.size,
            };
        }

        match self.store.head_object(key).await {
            Ok(info) if info.size == local_size => Verdict::Match { size: info.size },
            Ok(info) => Verdict::SizeMismatch {
                local: local_size,
                remote: info.size,
            },
            Err(e) => Verdict::Unavailable {
                reason: e.to_string(),
            },
        }
    }
}
