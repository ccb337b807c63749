//! Locations: the entities events are recorded on.

use std::fmt;

use enum_map::EnumMap;
use strum_macros::Display;

use crate::memory::{Memory, MemoryPageManager, MemoryType};
use crate::thread::fork_join::TeamData;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display)]
pub enum LocationType {
    CpuThread,
    CpuMemory,
    Gpu,
    Metric,
}

pub struct Location {
    id: u32,
    location_type: LocationType,
    name: String,
    parent: Option<u32>,
    page_managers: EnumMap<MemoryType, Option<MemoryPageManager>>,
    team_data: Option<TeamData>,
}

impl Location {
    pub fn new(id: u32, location_type: LocationType, name: &str, parent: Option<u32>) -> Self {
        Location {
            id,
            location_type,
            name: name.to_string(),
            parent,
            page_managers: EnumMap::default(),
            team_data: None,
        }
    }

    /// The process-local id.
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn location_type(&self) -> LocationType {
        self.location_type
    }

    pub fn is_cpu_thread(&self) -> bool {
        self.location_type == LocationType::CpuThread
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<u32> {
        self.parent
    }

    /// The id of this location across all ranks.
    pub fn global_id(&self, rank: u32) -> u64 {
        ((self.id as u64) << 32) | rank as u64
    }

    /// The page manager for `memory_type`, created on first use.
    pub fn page_manager(
        &mut self,
        memory: &Memory,
        memory_type: MemoryType,
    ) -> Option<&mut MemoryPageManager> {
        let slot = &mut self.page_managers[memory_type];
        if slot.is_none() {
            *slot = Some(memory.create_page_manager()?);
            trace!("location {}: created {} page manager", self.id, memory_type);
        }
        slot.as_mut()
    }

    pub fn existing_page_manager(&self, memory_type: MemoryType) -> Option<&MemoryPageManager> {
        self.page_managers[memory_type].as_ref()
    }

    pub fn existing_page_manager_mut(
        &mut self,
        memory_type: MemoryType,
    ) -> Option<&mut MemoryPageManager> {
        self.page_managers[memory_type].as_mut()
    }

    /// The page managers created so far.
    pub fn page_managers(&self) -> impl Iterator<Item = (MemoryType, &MemoryPageManager)> + '_ {
        self.page_managers
            .iter()
            .filter_map(|(memory_type, page_manager)| Some((memory_type, page_manager.as_ref()?)))
    }

    /// Fork/join state, for CPU threads that took part in a thread team.
    pub fn team_data(&self) -> Option<&TeamData> {
        self.team_data.as_ref()
    }

    pub(crate) fn team_data_mut(&mut self) -> Option<&mut TeamData> {
        self.team_data.as_mut()
    }

    pub(crate) fn set_team_data(&mut self, team_data: TeamData) {
        self.team_data = Some(team_data);
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Location")
            .field("id", &self.id)
            .field("type", &self.location_type)
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("page_managers", &self.page_managers().count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_ids() {
        let location = Location::new(3, LocationType::CpuThread, "thread 3", Some(0));
        assert_eq!(location.global_id(0), 3 << 32);
        assert_eq!(location.global_id(5), (3 << 32) | 5);
        assert!(location.is_cpu_thread());
        assert_eq!(location.parent(), Some(0));
        assert!(!Location::new(4, LocationType::Gpu, "gpu", None).is_cpu_thread());
    }
}
