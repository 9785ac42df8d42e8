//! Decides whether a booting node takes over the token of a dead node.
//!
//! Two views of the cluster are reconciled. The membership oracle says which
//! instances are still running; a slot whose instance is gone is only a
//! *candidate*. The data store's gossip then confirms whether the ring itself
//! still sees the candidate's address as live before the slot is claimed.
//!
//! Candidates are scanned one at a time in priority order, since the first
//! confirmed-dead candidate ends the scan.

use crate::identity::gossip::{GossipProbe, GossipStatus};
use crate::identity::heartbeat::MembershipOracle;
use crate::identity::registry::SlotRegistry;
use crate::identity::sleeper::Sleeper;
use crate::identity::slot::{LocalNode, Slot};
use anyhow::Result;
use itertools::Itertools;
use log::{info, trace, warn};
use rand::rng;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use strum::{Display, EnumString};

/// Peers that must agree on a token's owner before it is trusted.
const REQUIRED_PEER_AGREEMENT: usize = 3;

/// Whose gossip is asked about a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum GossipSource {
    /// The candidate's own status endpoint.
    Candidate,
    /// Other nodes of the candidate's region, asked who owns the candidate's token.
    Peers,
}

/// What to do with a candidate nobody could give a gossip answer for.
///
/// Defaults to `Skip`. Under `Claim` a wrong status endpoint makes every live node look dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum UnreachablePolicy {
    /// Trust the registry and replace the candidate's recorded address.
    Claim,
    /// Leave the candidate alone and move on.
    Skip,
}

#[derive(Debug, Clone)]
pub struct ReplacementPolicy {
    /// Probe attempts per address; unreachable and unparseable answers share it.
    pub max_probe_attempts: u32,
    pub retry_delay: Duration,
    pub gossip_source: GossipSource,
    pub unreachable: UnreachablePolicy,
    /// Delete candidates that gossip still reports live: their instance is gone
    /// from membership, so the registry record is orphaned.
    pub purge_live_orphans: bool,
}

impl Default for ReplacementPolicy {
    fn default() -> Self {
        Self {
            max_probe_attempts: 3,
            retry_delay: Duration::from_secs(1),
            gossip_source: GossipSource::Candidate,
            unreachable: UnreachablePolicy::Skip,
            purge_live_orphans: false,
        }
    }
}

/// A dead slot taken over by the local node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    /// New record for the local node, carrying the dead slot's token.
    pub slot: Slot,
    /// Address the data store must be told it is replacing.
    pub replaced_ip: IpAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Dead { replaced_ip: IpAddr },
    Alive,
    Disputed,
    Unreachable,
}

/// Slots of the local rack whose instance is neither the local node nor running.
///
/// Real instances come before placeholders; listing order is kept otherwise.
fn dead_slot_candidates<'a>(
    slots: &'a [Slot],
    live_instances: &HashSet<String>,
    node: &LocalNode,
) -> Vec<&'a Slot> {
    let (real, placeholders): (Vec<_>, Vec<_>) = slots
        .iter()
        .filter(|slot| slot.rack == node.rack)
        .filter(|slot| !node.owns(slot))
        .filter(|slot| !live_instances.contains(&slot.instance_id))
        .partition(|slot| !slot.is_placeholder());

    real.into_iter().chain(placeholders).collect()
}

pub struct TokenReplacer<R, M, P, S> {
    node: LocalNode,
    policy: ReplacementPolicy,
    registry: Arc<R>,
    membership: Arc<M>,
    probe: Arc<P>,
    sleeper: Arc<S>,
}

impl<R, M, P, S> TokenReplacer<R, M, P, S>
where
    R: SlotRegistry + Send + Sync,
    M: MembershipOracle + Send + Sync,
    P: GossipProbe + Send + Sync,
    S: Sleeper + Send + Sync,
{
    pub fn new(
        node: LocalNode,
        policy: ReplacementPolicy,
        registry: Arc<R>,
        membership: Arc<M>,
        probe: Arc<P>,
        sleeper: Arc<S>,
    ) -> Self {
        Self {
            node,
            policy,
            registry,
            membership,
            probe,
            sleeper,
        }
    }

    /// Looks for a dead slot in the local rack and claims it.
    ///
    /// On success the dead slot has been deleted from the registry; inserting the
    /// returned slot is left to the caller. Registry and membership failures are
    /// returned as errors, probe failures never are.
    pub async fn grab_existing_token(&self) -> Result<Option<Replacement>> {
        let (slots, live_instances) = futures::try_join!(
            self.registry.list_slots(&self.node.app_name),
            self.membership.live_instance_ids(&self.node.rack),
        )?;

        let candidates = dead_slot_candidates(&slots, &live_instances, &self.node);

        if candidates.is_empty() {
            info!("No dead slots found in rack {}", self.node.rack);
            return Ok(None);
        }

        info!(
            "Found [{}] dead slot candidates in rack {}: {}",
            candidates.len(),
            self.node.rack,
            candidates.iter().map(|slot| slot.id).join(", ")
        );

        for candidate in candidates {
            let replaced_ip = match self.confirm_liveness(candidate, &slots).await {
                Verdict::Dead { replaced_ip } => replaced_ip,
                Verdict::Alive => {
                    info!("Gossip still reports {candidate} as live, not replacing it");
                    if self.policy.purge_live_orphans {
                        self.purge_orphan(candidate).await?;
                    }
                    continue;
                }
                Verdict::Disputed => {
                    warn!("Gossip disagrees about the owner of {candidate}, not replacing it");
                    continue;
                }
                Verdict::Unreachable => match self.policy.unreachable {
                    UnreachablePolicy::Claim => {
                        warn!("No gossip answer for {candidate}, trusting the registry");
                        candidate.host_ip
                    }
                    UnreachablePolicy::Skip => {
                        warn!("No gossip answer for {candidate}, skipping it");
                        continue;
                    }
                },
            };

            if !self.registry.delete_slot(candidate).await? {
                warn!("{candidate} was removed by another node before it could be claimed");
                continue;
            }

            info!("Replacing {candidate}, replace address {replaced_ip}");

            return Ok(Some(Replacement {
                slot: candidate.reissue_to(&self.node),
                replaced_ip,
            }));
        }

        info!("No replaceable slot found in rack {}", self.node.rack);
        Ok(None)
    }

    async fn purge_orphan(&self, candidate: &Slot) -> Result<()> {
        if self.registry.delete_slot(candidate).await? {
            info!("Purged orphaned {candidate}");
        }
        Ok(())
    }

    async fn confirm_liveness(&self, candidate: &Slot, slots: &[Slot]) -> Verdict {
        match self.policy.gossip_source {
            GossipSource::Candidate => self.ask_candidate(candidate).await,
            GossipSource::Peers => {
                let mut peers: Vec<IpAddr> = slots
                    .iter()
                    .filter(|slot| slot.region == candidate.region)
                    .filter(|slot| slot.token != candidate.token)
                    .map(|slot| slot.host_ip)
                    .collect();

                // Spread the load so restarts don't always hit the same peers
                peers.shuffle(&mut rng());

                if peers.is_empty() {
                    return self.ask_candidate(candidate).await;
                }

                self.ask_peers(candidate, &peers).await
            }
        }
    }

    async fn ask_candidate(&self, candidate: &Slot) -> Verdict {
        match self.fetch_status(candidate.host_ip).await {
            Some(status) if status.is_live(candidate.host_ip) => Verdict::Alive,
            Some(_) => Verdict::Dead {
                replaced_ip: candidate.host_ip,
            },
            None => Verdict::Unreachable,
        }
    }

    async fn ask_peers(&self, candidate: &Slot, peers: &[IpAddr]) -> Verdict {
        let required = peers.len().min(REQUIRED_PEER_AGREEMENT);
        let mut agreed: Option<(IpAddr, bool)> = None;
        let mut matches = 0;

        for &peer in peers {
            let Some(status) = self.fetch_status(peer).await else {
                continue;
            };

            let owner = status
                .owner_of(&candidate.token)
                .unwrap_or(candidate.host_ip);
            let answer = (owner, status.is_live(owner));

            match agreed {
                Some(previous) if previous != answer => {
                    warn!(
                        "Peer {peer} reports {answer:?} for token {} but others reported {previous:?}",
                        candidate.token
                    );
                    return Verdict::Disputed;
                }
                Some(_) => {}
                None => agreed = Some(answer),
            }

            matches += 1;
            if matches == required {
                return match answer {
                    (_, true) => Verdict::Alive,
                    (owner, false) => Verdict::Dead { replaced_ip: owner },
                };
            }
        }

        Verdict::Unreachable
    }

    /// Fetches and parses a status, retrying up to the policy's attempt budget.
    async fn fetch_status(&self, ip: IpAddr) -> Option<GossipStatus> {
        let max_attempts = self.policy.max_probe_attempts.max(1);

        for attempt in 1..=max_attempts {
            let result = self
                .probe
                .fetch_status(ip)
                .await
                .and_then(|raw| GossipStatus::parse(&raw));

            match result {
                Ok(status) => {
                    trace!("Gossip status from {ip} received on attempt {attempt}");
                    return Some(status);
                }
                Err(e) => warn!("Gossip probe of {ip} failed ({attempt}/{max_attempts}): {e:#}"),
            }

            if attempt < max_attempts {
                self.sleeper.pause(self.policy.retry_delay).await;
            }
        }

        None
    }
}
