//! The thread team table of a location.
//!
//! Every CPU thread location keeps the thread teams it took part in as interim communicator
//! definitions in its own definitions memory, together with a hash table of `u32` buckets that
//! lives in the same memory. The hash covers the paradigm, the parent team and the team size,
//! but not the thread number, so all members of one team land in the same bucket of their
//! locations' tables. Unification relies on that.
//!
//! Definitions are addressed by [`InterimCommunicatorHandle`]s, which are movable memory
//! offsets. Definitions page managers are never moved, so a handle of one location can be
//! resolved through any of them.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::mem::size_of;

use crate::allocator::MovableMemory;
use crate::definitions::{CommunicatorHandle, Paradigm};
use crate::memory::Memory;
use crate::thread::location::Location;
use crate::util::Address;

/// A thread team of one location, before unification.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterimCommunicatorHandle(MovableMemory);

impl InterimCommunicatorHandle {
    pub fn movable(self) -> MovableMemory {
        self.0
    }
}

impl fmt::Display for InterimCommunicatorHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where unification got with a team definition.
#[repr(C, u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Unified {
    None,
    /// A member that is not the leader, pointing to the leader's definition.
    Leader(InterimCommunicatorHandle),
    Communicator(CommunicatorHandle),
}

impl Unified {
    pub fn is_none(self) -> bool {
        self == Unified::None
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub(crate) struct InterimCommunicatorDef {
    pub hash_next: Option<InterimCommunicatorHandle>,
    pub next: Option<InterimCommunicatorHandle>,
    pub sequence_number: u32,
    pub hash_value: u32,
    pub paradigm: Paradigm,
    pub parent: Option<InterimCommunicatorHandle>,
    pub unified: Unified,
    pub num_threads: u32,
    pub thread_num: u32,
    pub singleton_counter: u32,
}

impl InterimCommunicatorDef {
    /// Same team, regardless of the thread number.
    pub fn same_team(&self, other: &InterimCommunicatorDef) -> bool {
        self.hash_value == other.hash_value
            && self.parent == other.parent
            && self.paradigm == other.paradigm
            && self.num_threads == other.num_threads
    }
}

pub(crate) fn load(memory: &Memory, handle: InterimCommunicatorHandle) -> InterimCommunicatorDef {
    // Safety: handles are only made from allocations of `size_of::<InterimCommunicatorDef>()`
    // bytes, which are aligned to the allocator alignment.
    unsafe { memory.definition_address(handle.0).load() }
}

pub(crate) fn store(memory: &Memory, handle: InterimCommunicatorHandle, def: InterimCommunicatorDef) {
    // Safety: as in `load`.
    unsafe { memory.definition_address(handle.0).store(def) }
}

/// Fork/join state of a CPU thread location.
#[derive(Debug)]
pub struct TeamData {
    buckets: MovableMemory,
    mask: u32,
    head: Option<InterimCommunicatorHandle>,
    tail: Option<InterimCommunicatorHandle>,
    counter: u32,
    team_leader_counter: u32,
    /// Communicator of every team by sequence number, filled after unification.
    mapping: Vec<CommunicatorHandle>,
}

impl TeamData {
    pub fn number_of_buckets(&self) -> usize {
        self.mask as usize + 1
    }

    pub fn number_of_teams(&self) -> u32 {
        self.counter
    }

    /// In how many teams this location was thread 0.
    pub fn team_leader_counter(&self) -> u32 {
        self.team_leader_counter
    }

    pub fn mapping(&self) -> &[CommunicatorHandle] {
        &self.mapping
    }

    pub(crate) fn set_mapping(&mut self, mapping: Vec<CommunicatorHandle>) {
        self.mapping = mapping;
    }

    fn bucket(&self, memory: &Memory, hash_value: u32) -> Address {
        memory.definition_address(self.buckets) + ((hash_value & self.mask) as usize) * size_of::<u32>()
    }

    /// Head of the hash chain `hash_value` falls into.
    pub(crate) fn bucket_head(&self, memory: &Memory, hash_value: u32) -> Option<InterimCommunicatorHandle> {
        // Safety: the bucket array holds `mask + 1` initialised slots.
        unsafe { self.bucket(memory, hash_value).load() }
    }

    /// Team definitions in creation order.
    pub(crate) fn handles<'a>(
        &self,
        memory: &'a Memory,
    ) -> impl Iterator<Item = InterimCommunicatorHandle> + 'a {
        std::iter::successors(self.head, move |handle| load(memory, *handle).next)
    }
}

/// Give a CPU thread location its team table with `buckets` hash buckets. Returns whether the
/// location has a team table afterwards.
pub fn create_team_data(memory: &Memory, location: &mut Location, buckets: usize) -> bool {
    if location.team_data().is_some() {
        return true;
    }
    assert!(
        buckets.is_power_of_two() && buckets <= u32::MAX as usize,
        "invalid number of thread team buckets: {}",
        buckets
    );
    let size = buckets * size_of::<u32>();
    let Some(table) = memory.alloc_for_definitions(Some(location), size) else {
        return false;
    };
    // Safety: freshly allocated, `size` bytes.
    unsafe { memory.definition_address(table).zero_bytes(size) };
    location.set_team_data(TeamData {
        buckets: table,
        mask: (buckets - 1) as u32,
        head: None,
        tail: None,
        counter: 0,
        team_leader_counter: 0,
        mapping: vec![],
    });
    true
}

fn team_hash(paradigm: Paradigm, parent: Option<InterimCommunicatorHandle>, num_threads: u32) -> u32 {
    let mut hasher = DefaultHasher::new();
    paradigm.hash(&mut hasher);
    parent.hash(&mut hasher);
    num_threads.hash(&mut hasher);
    hasher.finish() as u32
}

/// The team `location` enters as thread `thread_num` of `num_threads`, forked from `parent`.
///
/// A single-threaded team forked from a single-threaded team is the parent itself, counted
/// in its singleton counter. Returns `None` when definition memory is exhausted.
pub fn get_team_handle(
    memory: &Memory,
    location: &mut Location,
    paradigm: Paradigm,
    parent: Option<InterimCommunicatorHandle>,
    num_threads: u32,
    thread_num: u32,
) -> Option<InterimCommunicatorHandle> {
    assert!(paradigm.is_fork_join(), "{} is not a fork/join paradigm", paradigm);
    assert!(
        thread_num < num_threads,
        "thread {} in a team of {}",
        thread_num,
        num_threads
    );

    if num_threads == 1 {
        if let Some(parent) = parent {
            let mut parent_def = load(memory, parent);
            if parent_def.num_threads == 1 {
                parent_def.singleton_counter += 1;
                store(memory, parent, parent_def);
                return Some(parent);
            }
        }
    }

    if location.team_data().is_none()
        && !create_team_data(memory, location, crate::util::constants::DEFAULT_TEAM_TABLE_BUCKETS)
    {
        return None;
    }

    let hash_value = team_hash(paradigm, parent, num_threads);
    let head = location.team_data()?.bucket_head(memory, hash_value);
    let mut next = head;
    while let Some(handle) = next {
        let def = load(memory, handle);
        if def.hash_value == hash_value
            && def.paradigm == paradigm
            && def.parent == parent
            && def.num_threads == num_threads
            && def.thread_num == thread_num
        {
            return Some(handle);
        }
        next = def.hash_next;
    }

    let handle = InterimCommunicatorHandle(
        memory.alloc_for_definitions(Some(&mut *location), size_of::<InterimCommunicatorDef>())?,
    );
    let location_id = location.id();
    let data = location.team_data_mut()?;
    store(
        memory,
        handle,
        InterimCommunicatorDef {
            hash_next: head,
            next: None,
            sequence_number: data.counter,
            hash_value,
            paradigm,
            parent,
            unified: Unified::None,
            num_threads,
            thread_num,
            singleton_counter: 0,
        },
    );
    // Safety: see `TeamData::bucket_head`.
    unsafe { data.bucket(memory, hash_value).store(Some(handle)) };
    match data.tail {
        Some(tail) => {
            let mut tail_def = load(memory, tail);
            tail_def.next = Some(handle);
            store(memory, tail, tail_def);
        }
        None => data.head = Some(handle),
    }
    data.tail = Some(handle);
    data.counter += 1;
    if thread_num == 0 {
        data.team_leader_counter += 1;
    }
    trace!(
        "location {}: new thread team {} ({} of {}, parent {:?})",
        location_id,
        handle,
        thread_num,
        num_threads,
        parent
    );
    Some(handle)
}

/// The team to return to when leaving `team`.
pub fn get_parent_team_handle(
    memory: &Memory,
    team: InterimCommunicatorHandle,
) -> Option<InterimCommunicatorHandle> {
    let mut def = load(memory, team);
    if def.singleton_counter > 0 {
        def.singleton_counter -= 1;
        store(memory, team, def);
        return Some(team);
    }
    def.parent
}

/// A copy of a team definition.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ThreadTeam {
    pub handle: InterimCommunicatorHandle,
    pub sequence_number: u32,
    pub paradigm: Paradigm,
    pub parent: Option<InterimCommunicatorHandle>,
    pub num_threads: u32,
    pub thread_num: u32,
    pub singleton_counter: u32,
    pub unified: Unified,
}

pub fn team(memory: &Memory, handle: InterimCommunicatorHandle) -> ThreadTeam {
    let def = load(memory, handle);
    ThreadTeam {
        handle,
        sequence_number: def.sequence_number,
        paradigm: def.paradigm,
        parent: def.parent,
        num_threads: def.num_threads,
        thread_num: def.thread_num,
        singleton_counter: def.singleton_counter,
        unified: def.unified,
    }
}

/// The teams of `location` in creation order.
pub fn teams(memory: &Memory, location: &Location) -> Vec<ThreadTeam> {
    match location.team_data() {
        Some(data) => data.handles(memory).map(|handle| team(memory, handle)).collect(),
        None => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::location::LocationType;
    use crate::util::options::{MemorySize, Options};

    fn memory(total_memory: usize) -> Memory {
        let mut options = Options::defaults();
        options.total_memory = MemorySize(total_memory);
        options.page_size = MemorySize(4096);
        Memory::new(&options)
    }

    fn thread(id: u32) -> Location {
        Location::new(id, LocationType::CpuThread, "thread", None)
    }

    #[test]
    fn lookup_is_stable() {
        let memory = memory(1 << 20);
        let mut location = thread(0);
        assert!(create_team_data(&memory, &mut location, 16));
        assert_eq!(location.team_data().map(TeamData::number_of_buckets), Some(16));

        let outer = get_team_handle(&memory, &mut location, Paradigm::OpenMp, None, 4, 0).unwrap();
        let again = get_team_handle(&memory, &mut location, Paradigm::OpenMp, None, 4, 0).unwrap();
        assert_eq!(outer, again);
        let other = get_team_handle(&memory, &mut location, Paradigm::OpenMp, None, 4, 1).unwrap();
        assert_ne!(outer, other);
        let nested =
            get_team_handle(&memory, &mut location, Paradigm::OpenMp, Some(outer), 2, 0).unwrap();

        let data = location.team_data().unwrap();
        assert_eq!(data.number_of_teams(), 3);
        assert_eq!(data.team_leader_counter(), 2);

        let teams = teams(&memory, &location);
        let order: Vec<_> = teams.iter().map(|t| t.handle).collect();
        assert_eq!(order, vec![outer, other, nested]);
        assert_eq!(teams[2].parent, Some(outer));
        assert_eq!(teams[1].sequence_number, 1);
        assert!(teams.iter().all(|t| t.unified.is_none()));
    }

    #[test]
    fn members_share_a_bucket() {
        let memory = memory(1 << 20);
        let mut leader = thread(0);
        let mut member = thread(1);
        let a = get_team_handle(&memory, &mut leader, Paradigm::OpenMp, None, 2, 0).unwrap();
        let b = get_team_handle(&memory, &mut member, Paradigm::OpenMp, None, 2, 1).unwrap();
        let (a_def, b_def) = (load(&memory, a), load(&memory, b));
        assert!(a_def.same_team(&b_def));
        let member_data = member.team_data().unwrap();
        assert_eq!(member_data.bucket_head(&memory, a_def.hash_value), Some(b));
    }

    #[test]
    fn singleton_teams() {
        let memory = memory(1 << 20);
        let mut location = thread(0);
        let single = get_team_handle(&memory, &mut location, Paradigm::OpenMp, None, 1, 0).unwrap();
        let nested =
            get_team_handle(&memory, &mut location, Paradigm::OpenMp, Some(single), 1, 0).unwrap();
        assert_eq!(nested, single);
        assert_eq!(team(&memory, single).singleton_counter, 1);
        assert_eq!(location.team_data().unwrap().number_of_teams(), 1);

        assert_eq!(get_parent_team_handle(&memory, nested), Some(single));
        assert_eq!(team(&memory, single).singleton_counter, 0);
        assert_eq!(get_parent_team_handle(&memory, single), None);
    }

    #[test]
    fn out_of_memory() {
        // Three pages: the bookkeeping, and two taken by the process definitions.
        let memory = memory(3 * 4096);
        assert!(memory.alloc_for_definitions(None, 4000).is_some());
        assert!(memory.alloc_for_definitions(None, 4000).is_some());
        let mut location = thread(0);
        assert!(!create_team_data(&memory, &mut location, 16));
        assert_eq!(
            get_team_handle(&memory, &mut location, Paradigm::OpenMp, None, 2, 0),
            None
        );
        assert!(memory.is_out_of_memory());
    }
}
