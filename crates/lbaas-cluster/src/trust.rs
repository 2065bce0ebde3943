//! Device trust between cluster members.
//!
//! Adding a peer takes the seed's trust lock, which another agent may be
//! holding for its own peer-add. Contention is retried a bounded number
//! of times before the operator is told to intervene.

use std::time::Duration;

use lbaas_driver::{ApplianceDriver, DriverError};
use tracing::{info, warn};

use crate::appliance::Appliance;
use crate::error::{ClusterError, ClusterResult};

pub const TRUST_ATTEMPTS: u32 = 5;
pub const TRUST_BACKOFF: Duration = Duration::from_secs(5);

/// Add `peer` to the seed's trust domain.
pub async fn add_peer(
    seed: &dyn ApplianceDriver,
    peer: &Appliance,
    username: &str,
    password: &str,
) -> ClusterResult<()> {
    for attempt in 1..=TRUST_ATTEMPTS {
        let result = seed
            .add_authority_device(peer.hostname(), username, password, peer.device_name())
            .await;
        match result {
            Ok(()) => {
                info!(seed = %seed.hostname(), peer = %peer.hostname(), "peer added to trust domain");
                return Ok(());
            }
            Err(e) if e.is_locked() => {
                warn!(
                    seed = %seed.hostname(),
                    peer = %peer.hostname(),
                    attempt,
                    "device trust locked by another writer"
                );
                if attempt < TRUST_ATTEMPTS {
                    tokio::time::sleep(TRUST_BACKOFF).await;
                }
            }
            Err(DriverError::Conflict(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
    Err(ClusterError::TrustLocked(format!(
        "could not add {} to the trust domain of {} after {TRUST_ATTEMPTS} attempts; \
         another agent holds the device trust lock, retry once its startup completes \
         or add the device manually",
        peer.hostname(),
        seed.hostname()
    )))
}

/// Reset each appliance to a standalone trust domain of its own.
pub async fn reset(appliances: &[std::sync::Arc<Appliance>]) -> ClusterResult<()> {
    for appliance in appliances {
        appliance
            .driver()
            .reset_trust(appliance.device_name())
            .await?;
        info!(host = %appliance.hostname(), "device trust reset");
    }
    Ok(())
}
