use crate::identity::slot::{LocalNode, Slot};
use anyhow::{Context, Result, bail};
use chrono::Utc;

/// A position on the Murmur3 ring.
pub type Token = i128;

const MURMUR3_MIN_TOKEN: Token = i64::MIN as Token;
const MURMUR3_MAX_TOKEN: Token = i64::MAX as Token;

/// Offset applied to every token and slot id of a region so regions sharing a
/// ring never collide.
///
/// Absolute value of the region name's 31-multiplier string hash, taken over
/// UTF-16 code units.
pub fn region_offset(region: &str) -> i64 {
    let hash = region
        .encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(i32::from(unit)));

    (hash as i64).abs()
}

/// Token of `position` on a ring split evenly into `ring_size` positions.
pub fn initial_token(ring_size: u32, position: u32, offset: i64) -> Result<Token> {
    if ring_size == 0 {
        bail!("ring size must be positive");
    }
    if position >= ring_size {
        bail!("position {position} does not fit a ring of {ring_size} positions");
    }

    let step = (MURMUR3_MAX_TOKEN - MURMUR3_MIN_TOKEN) / Token::from(ring_size);

    Ok(MURMUR3_MIN_TOKEN + step * Token::from(position) + Token::from(offset))
}

/// Hands out brand-new tokens when there's no dead slot to take over.
//
// Implementation
// Positions are interleaved across racks: the first node of the i-th rack takes
// position i, every later node of a rack takes the rack's highest position plus the
// rack count. Consecutive ring positions therefore always belong to different racks.
// Slot ids are the position shifted by the region offset.
//
pub struct TokenAllocator {
    racks: Vec<String>,
    nodes_per_rack: u32,
}

impl TokenAllocator {
    pub fn new(racks: Vec<String>, nodes_per_rack: u32) -> Result<Self> {
        if racks.is_empty() {
            bail!("at least one rack is required");
        }
        if nodes_per_rack == 0 {
            bail!("nodes per rack must be positive");
        }

        Ok(Self {
            racks,
            nodes_per_rack,
        })
    }

    fn ring_size(&self) -> Result<u32> {
        u32::try_from(self.racks.len())?
            .checked_mul(self.nodes_per_rack)
            .context("ring size overflow")
    }

    pub fn allocate(&self, slots: &[Slot], node: &LocalNode) -> Result<Slot> {
        let offset = region_offset(&node.region);

        let rack_ids: Vec<i64> = slots
            .iter()
            .filter(|slot| slot.rack == node.rack)
            .map(|slot| slot.id)
            .collect();

        let highest = rack_ids.iter().copied().fold(offset, i64::max);
        let highest_position = highest - offset;

        let position = if rack_ids.is_empty() {
            let rack_index = self
                .racks
                .iter()
                .position(|rack| *rack == node.rack)
                .with_context(|| {
                    format!("rack {} is not one of {}", node.rack, self.racks.join(","))
                })?;

            rack_index as i64
        } else {
            self.racks.len() as i64 + highest_position
        };

        let ring_size = self.ring_size()?;
        let token = initial_token(ring_size, u32::try_from(position)?, offset)?;

        Ok(Slot {
            id: position + offset,
            app_name: node.app_name.clone(),
            instance_id: node.instance_id.clone(),
            hostname: node.hostname.clone(),
            host_ip: node.host_ip,
            rack: node.rack.clone(),
            region: node.region.clone(),
            token: token.to_string(),
            updated_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RACKS: [&str; 3] = ["us-east-1a", "us-east-1b", "us-east-1c"];

    fn allocator(nodes_per_rack: u32) -> TokenAllocator {
        TokenAllocator::new(RACKS.iter().map(|r| r.to_string()).collect(), nodes_per_rack)
            .unwrap()
    }

    fn node_in(rack: &str, instance_id: &str) -> LocalNode {
        LocalNode {
            rack: rack.to_string(),
            instance_id: instance_id.to_string(),
            ..LocalNode::example()
        }
    }

    #[test]
    fn test_region_offset() {
        assert_eq!(region_offset("us-east-1"), 1808575600);
        assert_eq!(region_offset("eu-west-1"), 372748112);
        assert_eq!(region_offset(""), 0);
    }

    #[test]
    fn test_region_offset_hashes_utf16_units() {
        // Outside the BMP: two surrogates, 0xD83D * 31 + 0xDE00
        assert_eq!(region_offset("\u{1F600}"), 1772899);
        assert_eq!(region_offset("é"), 233);
    }

    #[test]
    fn test_initial_token() -> Result<()> {
        assert_eq!(initial_token(6, 0, 0)?, i64::MIN as Token);
        assert_eq!(initial_token(6, 1, 0)?, i64::MIN as Token + 3074457345618258602);
        assert_eq!(initial_token(6, 3, 0)?, -2);
        assert_eq!(initial_token(6, 3, 10)?, 8);

        assert!(initial_token(6, 6, 0).is_err());
        assert!(initial_token(0, 0, 0).is_err());

        Ok(())
    }

    #[test]
    fn test_first_node_of_each_rack_takes_rack_index() -> Result<()> {
        let allocator = allocator(2);
        let offset = region_offset("us-east-1");

        for (index, rack) in RACKS.iter().enumerate() {
            let slot = allocator.allocate(&[], &node_in(rack, "i-new"))?;
            assert_eq!(slot.id, offset + index as i64);
            assert_eq!(
                slot.token,
                initial_token(6, index as u32, offset)?.to_string()
            );
        }

        Ok(())
    }

    #[test]
    fn test_interleaved_allocation_fills_the_ring() -> Result<()> {
        let allocator = allocator(2);
        let mut slots: Vec<Slot> = Vec::new();

        for round in 0..2 {
            for rack in RACKS {
                let node = node_in(rack, &format!("i-{rack}-{round}"));
                let slot = allocator.allocate(&slots, &node)?;
                slots.push(slot);
            }
        }

        let offset = region_offset("us-east-1");
        let positions: Vec<i64> = slots.iter().map(|slot| slot.id - offset).collect();
        assert_eq!(positions, vec![0, 1, 2, 3, 4, 5]);

        let tokens: Vec<Token> = slots
            .iter()
            .map(|slot| slot.token.parse().unwrap())
            .collect();
        assert!(tokens.windows(2).all(|pair| pair[0] < pair[1]));

        // Ring is full
        assert!(
            allocator
                .allocate(&slots, &node_in("us-east-1a", "i-extra"))
                .is_err()
        );

        Ok(())
    }

    #[test]
    fn test_allocation_copies_node_identity() -> Result<()> {
        let node = LocalNode::example();
        let slot = allocator(3).allocate(&[], &node)?;

        assert_eq!(slot.instance_id, node.instance_id);
        assert_eq!(slot.hostname, node.hostname);
        assert_eq!(slot.host_ip, node.host_ip);
        assert_eq!(slot.app_name, node.app_name);
        assert!(!slot.is_placeholder());

        Ok(())
    }

    #[test]
    fn test_unknown_rack_is_rejected() {
        assert!(
            allocator(2)
                .allocate(&[], &node_in("eu-west-1a", "i-new"))
                .is_err()
        );
    }

    #[test]
    fn test_invalid_layout_is_rejected() {
        assert!(TokenAllocator::new(vec![], 3).is_err());
        assert!(TokenAllocator::new(vec!["a".to_string()], 0).is_err());
    }
}
