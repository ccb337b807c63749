//! Collating the thread teams of all locations into communicator definitions.
//!
//! Every location only knows the teams it was part of. A team is collated when its leader
//! (thread 0) is picked: the buckets of all CPU thread locations are searched for the other
//! members, a group of their global thread ids is defined, and the communicator of the team
//! is stored in the leader's definition. Members point at their leader until all teams are
//! done, then they are redirected to the leader's communicator.
//!
//! Leaders are picked parents first, so the parent communicator always exists. Locations are
//! visited in order and teams in creation order, which makes the definitions of ranks with
//! the same team structure identical.

use crate::definitions::{CommunicatorHandle, GroupType, LocalDefinitions, Paradigm};
use crate::ipc::Ipc;
use crate::memory::Memory;
use crate::thread::fork_join::team::{load, store, InterimCommunicatorHandle, Unified};
use crate::thread::location::Location;

fn group_types(paradigm: Paradigm) -> (GroupType, GroupType, &'static str) {
    match paradigm {
        Paradigm::OpenMp => (
            GroupType::OpenMpLocations,
            GroupType::OpenMpThreadTeam,
            "OpenMP",
        ),
        other => panic!("Fork-join threading component provided invalid paradigm: {}", other),
    }
}

/// Define the locations group of this rank and return the global thread id of every location,
/// `None` for locations that are not CPU threads.
fn define_fork_join_locations(
    locations: &[Location],
    definitions: &mut LocalDefinitions,
    ipc: &impl Ipc,
    group_type: GroupType,
    name: &str,
) -> Vec<Option<u32>> {
    let members: Vec<u64> = locations
        .iter()
        .filter(|location| location.is_cpu_thread())
        .map(|location| location.global_id(ipc.rank()))
        .collect();
    definitions.new_group(group_type, name, &members);
    let offset = ipc.exclusive_scan_sum(members.len() as u32);

    let mut next = offset;
    locations
        .iter()
        .map(|location| {
            location.is_cpu_thread().then(|| {
                next += 1;
                next - 1
            })
        })
        .collect()
}

/// The next leader whose parent is collated already.
fn find_next_thread_team(memory: &Memory, locations: &[Location]) -> Option<InterimCommunicatorHandle> {
    for location in locations.iter().filter(|l| l.is_cpu_thread()) {
        let Some(data) = location.team_data() else {
            continue;
        };
        for handle in data.handles(memory) {
            let def = load(memory, handle);
            if !def.paradigm.is_fork_join() || def.thread_num != 0 || !def.unified.is_none() {
                continue;
            }
            match def.parent {
                None => return Some(handle),
                Some(parent) if !load(memory, parent).unified.is_none() => return Some(handle),
                Some(_) => {}
            }
        }
    }
    None
}

/// Fill `members` with the global thread ids of the team of `leader`, and point every other
/// member at the leader.
fn find_thread_team_members(
    memory: &Memory,
    locations: &[Location],
    thread_ids: &[Option<u32>],
    leader: InterimCommunicatorHandle,
    members: &mut [u64],
) {
    let leader_def = load(memory, leader);
    for (location, thread_id) in locations.iter().zip(thread_ids) {
        let (Some(data), Some(thread_id)) = (location.team_data(), thread_id) else {
            continue;
        };
        let mut next = data.bucket_head(memory, leader_def.hash_value);
        while let Some(handle) = next {
            let mut def = load(memory, handle);
            if def.same_team(&leader_def) {
                if def.thread_num != 0 {
                    def.unified = Unified::Leader(leader);
                    store(memory, handle, def);
                }
                members[def.thread_num as usize] = *thread_id as u64;
                trace!(
                    "location {} is thread {} in team {}",
                    location.id(),
                    def.thread_num,
                    leader
                );
                break;
            }
            next = def.hash_next;
        }
    }
}

/// The communicator of a collated parent team.
fn parent_communicator(memory: &Memory, parent: InterimCommunicatorHandle) -> CommunicatorHandle {
    match load(memory, parent).unified {
        Unified::Communicator(communicator) => communicator,
        // The parent was not its team's leader.
        Unified::Leader(leader) => match load(memory, leader).unified {
            Unified::Communicator(communicator) => communicator,
            other => panic!("leader {} of parent team {} is {:?}", leader, parent, other),
        },
        Unified::None => panic!("parent team {} was not collated", parent),
    }
}

fn redirect_unified_to_collated(memory: &Memory, locations: &[Location]) {
    for location in locations.iter().filter(|l| l.is_cpu_thread()) {
        let Some(data) = location.team_data() else {
            continue;
        };
        for handle in data.handles(memory) {
            let mut def = load(memory, handle);
            if !def.paradigm.is_fork_join() {
                continue;
            }
            match def.unified {
                Unified::None => panic!("Thread team collation missed a thread team"),
                Unified::Communicator(_) => {}
                Unified::Leader(leader) => {
                    def.unified = load(memory, leader).unified;
                    store(memory, handle, def);
                }
            }
        }
    }
}

/// Collate the thread teams of all `locations` into groups and communicators.
///
/// Panics if the team tables are inconsistent, i.e. a team without its leader or a leader
/// whose parent never shows up.
pub fn pre_unify(
    memory: &Memory,
    locations: &mut [Location],
    definitions: &mut LocalDefinitions,
    ipc: &impl Ipc,
    paradigm: Paradigm,
) {
    let locations = &*locations;
    let (locations_group, team_group, name) = group_types(paradigm);
    let thread_ids = define_fork_join_locations(locations, definitions, ipc, locations_group, name);

    let total: u32 = locations
        .iter()
        .filter(|l| l.is_cpu_thread())
        .filter_map(|l| l.team_data())
        .map(|data| data.team_leader_counter())
        .sum();
    debug!("rank {}: collating {} thread teams", ipc.rank(), total);

    for i in 0..total {
        let leader = find_next_thread_team(memory, locations)
            .unwrap_or_else(|| panic!("There should be {} more thread teams!", total - i));
        let leader_def = load(memory, leader);

        let mut members = vec![0u64; leader_def.num_threads as usize];
        find_thread_team_members(memory, locations, &thread_ids, leader, &mut members);
        let group = definitions.new_group(team_group, "", &members);

        let parent = leader_def
            .parent
            .map(|parent| parent_communicator(memory, parent));
        let communicator = definitions.new_communicator(group, "", parent);
        trace!(
            "thread team {} ({} threads) is communicator {}",
            leader,
            leader_def.num_threads,
            communicator
        );

        let mut leader_def = load(memory, leader);
        leader_def.unified = Unified::Communicator(communicator);
        store(memory, leader, leader_def);
    }

    redirect_unified_to_collated(memory, locations);
}

/// Give every CPU thread location the mapping from its team sequence numbers to the
/// collated communicators.
pub fn post_unify(memory: &Memory, locations: &mut [Location]) {
    for location in locations.iter_mut().filter(|l| l.is_cpu_thread()) {
        let Some(data) = location.team_data() else {
            continue;
        };
        let mapping = data
            .handles(memory)
            .map(|handle| match load(memory, handle).unified {
                Unified::Communicator(communicator) => communicator,
                other => panic!("thread team {} was not unified: {:?}", handle, other),
            })
            .collect();
        if let Some(data) = location.team_data_mut() {
            data.set_mapping(mapping);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::SingleProcess;
    use crate::thread::fork_join::team::{get_parent_team_handle, get_team_handle, teams};
    use crate::thread::location::LocationType;
    use crate::util::options::Options;
    use crate::util::test_util::SequentialCollectives;

    fn threads(n: u32) -> Vec<Location> {
        (0..n)
            .map(|id| Location::new(id, LocationType::CpuThread, "thread", None))
            .collect()
    }

    #[test]
    fn one_level() {
        let memory = Memory::new(&Options::defaults());
        let mut locations = threads(3);
        locations.push(Location::new(3, LocationType::Gpu, "gpu", None));
        for (thread_num, location) in locations.iter_mut().take(3).enumerate() {
            get_team_handle(&memory, location, Paradigm::OpenMp, None, 3, thread_num as u32);
        }

        let mut definitions = LocalDefinitions::new();
        pre_unify(&memory, &mut locations, &mut definitions, &SingleProcess, Paradigm::OpenMp);
        post_unify(&memory, &mut locations);

        assert_eq!(definitions.groups().len(), 2);
        assert_eq!(definitions.groups()[0].group_type, GroupType::OpenMpLocations);
        assert_eq!(definitions.groups()[0].members, vec![0, 1 << 32, 2 << 32]);
        assert_eq!(definitions.groups()[1].members, vec![0, 1, 2]);
        assert_eq!(definitions.communicators().len(), 1);

        let communicator = definitions.communicators()[0].clone();
        for location in &locations[..3] {
            let mapping = location.team_data().unwrap().mapping();
            assert_eq!(mapping.len(), 1);
            assert_eq!(definitions.communicator(mapping[0]), &communicator);
            assert!(matches!(
                teams(&memory, location)[0].unified,
                Unified::Communicator(_)
            ));
        }
    }

    #[test]
    fn nested_under_a_member() {
        let memory = Memory::new(&Options::defaults());
        let mut locations = threads(4);
        let outer: Vec<_> = (0..2)
            .map(|i| {
                get_team_handle(&memory, &mut locations[i], Paradigm::OpenMp, None, 2, i as u32)
                    .unwrap()
            })
            .collect();
        // Thread 1 of the outer team forks a team with locations 1 and 3 ...
        let parent = Some(outer[1]);
        get_team_handle(&memory, &mut locations[3], Paradigm::OpenMp, parent, 2, 1);
        get_team_handle(&memory, &mut locations[1], Paradigm::OpenMp, parent, 2, 0);
        // ... and thread 0 one with locations 0 and 2.
        let parent = Some(outer[0]);
        get_team_handle(&memory, &mut locations[2], Paradigm::OpenMp, parent, 2, 1);
        get_team_handle(&memory, &mut locations[0], Paradigm::OpenMp, parent, 2, 0);

        let mut definitions = LocalDefinitions::new();
        pre_unify(&memory, &mut locations, &mut definitions, &SingleProcess, Paradigm::OpenMp);
        post_unify(&memory, &mut locations);

        assert_eq!(definitions.communicators().len(), 3);
        let root = locations[0].team_data().unwrap().mapping()[0];
        assert_eq!(locations[1].team_data().unwrap().mapping()[0], root);
        assert_eq!(definitions.communicator(root).parent, None);

        let inner_of_1 = locations[1].team_data().unwrap().mapping()[1];
        assert_eq!(locations[3].team_data().unwrap().mapping()[0], inner_of_1);
        assert_eq!(definitions.communicator(inner_of_1).parent, Some(root));
        assert_eq!(
            definitions.group(definitions.communicator(inner_of_1).group).members,
            vec![1, 3]
        );

        let inner_of_0 = locations[0].team_data().unwrap().mapping()[1];
        assert_eq!(locations[2].team_data().unwrap().mapping()[0], inner_of_0);
        assert_ne!(inner_of_0, inner_of_1);
    }

    /// Rank-local outcome of unifying the same team structure.
    struct RankResult {
        definitions: LocalDefinitions,
        mappings: Vec<Vec<CommunicatorHandle>>,
        teams: usize,
    }

    fn unify_rank(ipc: &SequentialCollectives) -> RankResult {
        let memory = Memory::new(&Options::defaults());
        let mut locations = threads(4);
        let omp = Paradigm::OpenMp;

        // Serial region with recursion into singleton teams.
        let single = get_team_handle(&memory, &mut locations[0], omp, None, 1, 0).unwrap();
        for _ in 0..3 {
            let nested = get_team_handle(&memory, &mut locations[0], omp, Some(single), 1, 0);
            assert_eq!(nested, Some(single));
        }
        for _ in 0..3 {
            assert_eq!(get_parent_team_handle(&memory, single), Some(single));
        }
        assert_eq!(get_parent_team_handle(&memory, single), None);

        // A parallel region, where thread 2 forks a nested team with location 3.
        let outer: Vec<_> = (0..4)
            .map(|i| get_team_handle(&memory, &mut locations[i], omp, None, 4, i as u32).unwrap())
            .collect();
        get_team_handle(&memory, &mut locations[2], omp, Some(outer[2]), 2, 0).unwrap();
        get_team_handle(&memory, &mut locations[3], omp, Some(outer[2]), 2, 1).unwrap();

        let mut definitions = LocalDefinitions::new();
        pre_unify(&memory, &mut locations, &mut definitions, ipc, omp);
        post_unify(&memory, &mut locations);

        let teams = locations
            .iter()
            .map(|l| l.team_data().unwrap().number_of_teams() as usize)
            .sum();
        let mappings = locations
            .iter()
            .map(|l| l.team_data().unwrap().mapping().to_vec())
            .collect();
        RankResult {
            definitions,
            mappings,
            teams,
        }
    }

    #[test]
    fn identical_ranks_agree() {
        let world = SequentialCollectives::world(3);
        let results: Vec<RankResult> = world.iter().map(unify_rank).collect();

        for (rank, result) in results.iter().enumerate() {
            // single, 4 x outer, 2 x inner
            assert_eq!(result.teams, 7);
            // One communicator per distinct team: the singleton is not duplicated.
            assert_eq!(result.definitions.communicators().len(), 3);
            assert_eq!(result.mappings, results[0].mappings);
            assert_eq!(
                result.definitions.communicators(),
                results[0].definitions.communicators()
            );

            let offset = 4 * rank as u64;
            let groups = result.definitions.groups();
            assert_eq!(groups.len(), 4);
            assert_eq!(groups[0].group_type, GroupType::OpenMpLocations);
            assert_eq!(groups[1].members, vec![offset]);
            assert_eq!(
                groups[2].members,
                (0..4).map(|i| offset + i).collect::<Vec<_>>()
            );
            assert_eq!(groups[3].members, vec![offset + 2, offset + 3]);
        }

        let mapping = &results[0].mappings;
        let (single, outer, inner) = (mapping[0][0], mapping[0][1], mapping[2][1]);
        assert!(mapping.iter().all(|m| m.contains(&outer)));
        assert_eq!(mapping[3], vec![outer, inner]);
        let definitions = &results[0].definitions;
        assert_eq!(definitions.communicator(single).parent, None);
        assert_eq!(definitions.communicator(inner).parent, Some(outer));
    }

    #[test]
    #[should_panic(expected = "more thread teams")]
    fn orphaned_team() {
        let memory = Memory::new(&Options::defaults());
        let mut locations = threads(2);
        // A leader whose parent team is never collated.
        let other = get_team_handle(&memory, &mut locations[1], Paradigm::OpenMp, None, 2, 1);
        get_team_handle(&memory, &mut locations[0], Paradigm::OpenMp, other, 2, 0);
        let mut definitions = LocalDefinitions::new();
        pre_unify(&memory, &mut locations, &mut definitions, &SingleProcess, Paradigm::OpenMp);
    }

    #[test]
    #[should_panic(expected = "invalid paradigm")]
    fn not_fork_join() {
        let memory = Memory::new(&Options::defaults());
        let mut definitions = LocalDefinitions::new();
        pre_unify(&memory, &mut threads(1), &mut definitions, &SingleProcess, Paradigm::Pthread);
    }
}
