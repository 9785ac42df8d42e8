//! Deterministic stand-ins for the engine's collaborators.

use crate::identity::gossip::GossipProbe;
use crate::identity::heartbeat::MembershipOracle;
use crate::identity::registry::SlotRegistry;
use crate::identity::sleeper::Sleeper;
use crate::identity::slot::Slot;
use anyhow::{Result, bail};
use std::collections::{HashSet, VecDeque};
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub struct FakeSlotRegistry {
    slots: Mutex<Vec<Slot>>,
    deleted: Mutex<Vec<Slot>>,
    inserted: Mutex<Vec<Slot>>,
    // ids another node deletes first
    contended: HashSet<i64>,
    unreachable: bool,
}

impl FakeSlotRegistry {
    pub fn new(slots: Vec<Slot>) -> Self {
        Self {
            slots: Mutex::new(slots),
            ..Default::default()
        }
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Default::default()
        }
    }

    pub fn with_contended(mut self, id: i64) -> Self {
        self.contended.insert(id);
        self
    }

    pub fn slots(&self) -> Vec<Slot> {
        self.slots.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<Slot> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn inserted(&self) -> Vec<Slot> {
        self.inserted.lock().unwrap().clone()
    }
}

impl SlotRegistry for FakeSlotRegistry {
    async fn list_slots(&self, app_name: &str) -> Result<Vec<Slot>> {
        if self.unreachable {
            bail!("registry unreachable");
        }

        Ok(self
            .slots
            .lock()
            .unwrap()
            .iter()
            .filter(|slot| slot.app_name == app_name)
            .cloned()
            .collect())
    }

    async fn delete_slot(&self, slot: &Slot) -> Result<bool> {
        let mut slots = self.slots.lock().unwrap();
        let Some(index) = slots.iter().position(|s| {
            s.app_name == slot.app_name && s.id == slot.id && s.instance_id == slot.instance_id
        }) else {
            return Ok(false);
        };

        let removed = slots.remove(index);

        if self.contended.contains(&slot.id) {
            return Ok(false);
        }

        self.deleted.lock().unwrap().push(removed);
        Ok(true)
    }

    async fn insert_slot(&self, slot: &Slot) -> Result<bool> {
        let mut slots = self.slots.lock().unwrap();
        if slots
            .iter()
            .any(|s| s.app_name == slot.app_name && s.id == slot.id)
        {
            return Ok(false);
        }

        slots.push(slot.clone());
        self.inserted.lock().unwrap().push(slot.clone());
        Ok(true)
    }
}

#[derive(Default)]
pub struct FakeMembership {
    live: HashSet<String>,
    unreachable: bool,
}

impl FakeMembership {
    pub fn new<I: IntoIterator<Item = S>, S: Into<String>>(live: I) -> Self {
        Self {
            live: live.into_iter().map(Into::into).collect(),
            unreachable: false,
        }
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Default::default()
        }
    }
}

impl MembershipOracle for FakeMembership {
    async fn live_instance_ids(&self, _rack: &str) -> Result<HashSet<String>> {
        if self.unreachable {
            bail!("membership oracle unreachable");
        }

        Ok(self.live.clone())
    }
}

/// Answers probes from a script, in call order. `None` entries, and every call
/// once the script runs out, behave like an unreachable node.
#[derive(Default)]
pub struct ScriptedGossipProbe {
    responses: Mutex<VecDeque<Option<String>>>,
    calls: Mutex<Vec<IpAddr>>,
}

impl ScriptedGossipProbe {
    pub fn new<I: IntoIterator<Item = Option<String>>>(responses: I) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<IpAddr> {
        self.calls.lock().unwrap().clone()
    }
}

impl GossipProbe for ScriptedGossipProbe {
    async fn fetch_status(&self, ip: IpAddr) -> Result<String> {
        self.calls.lock().unwrap().push(ip);

        match self.responses.lock().unwrap().pop_front().flatten() {
            Some(response) => Ok(response),
            None => bail!("connection refused by {ip}"),
        }
    }
}

#[derive(Default)]
pub struct RecordingSleeper {
    pauses: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn pauses(&self) -> Vec<Duration> {
        self.pauses.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    async fn pause(&self, duration: Duration) {
        self.pauses.lock().unwrap().push(duration);
    }
}
