use crate::identity::allocation::TokenAllocator;
use crate::identity::gossip::GossipProbe;
use crate::identity::heartbeat::MembershipOracle;
use crate::identity::registry::SlotRegistry;
use crate::identity::replacement::{Replacement, TokenReplacer};
use crate::identity::sleeper::Sleeper;
use crate::identity::slot::{LocalNode, Slot};
use anyhow::{Result, bail};
use log::info;
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use strum::Display;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SlotOrigin {
    /// The registry already had a slot for this instance.
    Reused,
    /// Taken over from a dead node.
    Replaced,
    /// Brand-new token.
    Allocated,
}

/// The slot this node runs with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ResolvedIdentity {
    pub slot: Slot,
    /// Set when the data store has to start in replace mode.
    #[schema(value_type = Option<String>)]
    pub replaced_ip: Option<IpAddr>,
    pub origin: SlotOrigin,
}

/// Works out which slot the local node owns at boot.
///
/// A slot already registered for this instance wins (process restart), then a
/// dead slot of the rack, and only then a brand-new token.
pub struct IdentityResolver<R, M, P, S> {
    node: LocalNode,
    registry: Arc<R>,
    replacer: TokenReplacer<R, M, P, S>,
    allocator: TokenAllocator,
}

impl<R, M, P, S> IdentityResolver<R, M, P, S>
where
    R: SlotRegistry + Send + Sync,
    M: MembershipOracle + Send + Sync,
    P: GossipProbe + Send + Sync,
    S: Sleeper + Send + Sync,
{
    pub fn new(
        node: LocalNode,
        registry: Arc<R>,
        replacer: TokenReplacer<R, M, P, S>,
        allocator: TokenAllocator,
    ) -> Self {
        Self {
            node,
            registry,
            replacer,
            allocator,
        }
    }

    pub async fn resolve(&self) -> Result<ResolvedIdentity> {
        // Kept for allocation: slots purged during the scan may still hold their token
        let slots = self.registry.list_slots(&self.node.app_name).await?;

        if let Some(existing) = slots.iter().find(|slot| self.node.owns(slot)) {
            let slot = self.reuse(existing).await?;
            return Ok(ResolvedIdentity {
                slot,
                replaced_ip: None,
                origin: SlotOrigin::Reused,
            });
        }

        if let Some(Replacement { slot, replaced_ip }) =
            self.replacer.grab_existing_token().await?
        {
            self.claim(&slot).await?;
            return Ok(ResolvedIdentity {
                slot,
                replaced_ip: Some(replaced_ip),
                origin: SlotOrigin::Replaced,
            });
        }

        let slot = self.allocator.allocate(&slots, &self.node)?;
        info!("Allocated new {slot}");
        self.claim(&slot).await?;

        Ok(ResolvedIdentity {
            slot,
            replaced_ip: None,
            origin: SlotOrigin::Allocated,
        })
    }

    async fn reuse(&self, existing: &Slot) -> Result<Slot> {
        if existing.host_ip == self.node.host_ip && existing.hostname == self.node.hostname {
            info!("Reusing {existing}");
            return Ok(existing.clone());
        }

        // Records are never updated in place
        let updated = existing.reissue_to(&self.node);
        info!(
            "Re-registering {existing} under {} ({})",
            updated.hostname, updated.host_ip
        );

        if !self.registry.delete_slot(existing).await? {
            bail!("{existing} disappeared while it was being re-registered");
        }
        self.claim(&updated).await?;

        Ok(updated)
    }

    async fn claim(&self, slot: &Slot) -> Result<()> {
        if !self.registry.insert_slot(slot).await? {
            bail!("slot {} was claimed by another node", slot.id);
        }

        info!("Claimed {slot}");
        Ok(())
    }
}
