//! Local definitions produced by unification.
//!
//! Only the two kinds of definitions the thread team unification defines are kept: groups and
//! communicators. Both are deduplicated by content, so defining the same group twice yields
//! the same handle.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;

use strum_macros::Display;

/// The programming model an event or definition belongs to.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display)]
pub enum Paradigm {
    Measurement,
    User,
    Compiler,
    Sampling,
    Memory,
    Libwrap,
    Mpi,
    Shmem,
    #[strum(serialize = "OpenMP")]
    OpenMp,
    Pthread,
    OrphanThread,
    Cuda,
    OpenCl,
    OpenAcc,
    Io,
    Kokkos,
    Hip,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParadigmClass {
    Mpp,
    ThreadForkJoin,
    ThreadCreateWait,
    Accelerator,
    Misc,
}

impl Paradigm {
    pub fn class(self) -> ParadigmClass {
        match self {
            Paradigm::Mpi | Paradigm::Shmem => ParadigmClass::Mpp,
            Paradigm::OpenMp => ParadigmClass::ThreadForkJoin,
            Paradigm::Pthread | Paradigm::OrphanThread => ParadigmClass::ThreadCreateWait,
            Paradigm::Cuda
            | Paradigm::OpenCl
            | Paradigm::OpenAcc
            | Paradigm::Kokkos
            | Paradigm::Hip => ParadigmClass::Accelerator,
            _ => ParadigmClass::Misc,
        }
    }

    pub fn is_fork_join(self) -> bool {
        self.class() == ParadigmClass::ThreadForkJoin
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display)]
pub enum GroupType {
    Locations,
    OpenMpLocations,
    OpenMpThreadTeam,
}

macro_rules! define_handle {
    ($name: ident) => {
        /// A 1-based index into the local definitions.
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(NonZeroU32);

        impl $name {
            fn from_index(index: usize) -> Self {
                // A definition list never gets near u32::MAX entries.
                $name(NonZeroU32::MIN.saturating_add(index as u32))
            }

            fn index(self) -> usize {
                self.0.get() as usize - 1
            }

            /// The sequence number of the definition.
            pub fn id(self) -> u32 {
                self.0.get() - 1
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}", self.id())
            }
        }
    };
}

define_handle!(GroupHandle);
define_handle!(CommunicatorHandle);

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GroupDef {
    pub group_type: GroupType,
    pub name: String,
    pub members: Vec<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommunicatorDef {
    pub group: GroupHandle,
    pub name: String,
    pub parent: Option<CommunicatorHandle>,
}

#[derive(Default, Debug)]
pub struct LocalDefinitions {
    groups: Vec<GroupDef>,
    group_index: HashMap<GroupDef, GroupHandle>,
    communicators: Vec<CommunicatorDef>,
    communicator_index: HashMap<CommunicatorDef, CommunicatorHandle>,
}

impl LocalDefinitions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_group(&mut self, group_type: GroupType, name: &str, members: &[u64]) -> GroupHandle {
        let def = GroupDef {
            group_type,
            name: name.to_string(),
            members: members.to_vec(),
        };
        if let Some(handle) = self.group_index.get(&def) {
            return *handle;
        }
        let handle = GroupHandle::from_index(self.groups.len());
        trace!("new group {} {:?}", handle, def);
        self.groups.push(def.clone());
        self.group_index.insert(def, handle);
        handle
    }

    pub fn new_communicator(
        &mut self,
        group: GroupHandle,
        name: &str,
        parent: Option<CommunicatorHandle>,
    ) -> CommunicatorHandle {
        let def = CommunicatorDef {
            group,
            name: name.to_string(),
            parent,
        };
        if let Some(handle) = self.communicator_index.get(&def) {
            return *handle;
        }
        let handle = CommunicatorHandle::from_index(self.communicators.len());
        trace!("new communicator {} {:?}", handle, def);
        self.communicators.push(def.clone());
        self.communicator_index.insert(def, handle);
        handle
    }

    pub fn group(&self, handle: GroupHandle) -> &GroupDef {
        &self.groups[handle.index()]
    }

    pub fn communicator(&self, handle: CommunicatorHandle) -> &CommunicatorDef {
        &self.communicators[handle.index()]
    }

    pub fn groups(&self) -> &[GroupDef] {
        &self.groups
    }

    pub fn communicators(&self) -> &[CommunicatorDef] {
        &self.communicators
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paradigm_classes() {
        assert!(Paradigm::OpenMp.is_fork_join());
        assert!(!Paradigm::Pthread.is_fork_join());
        assert_eq!(Paradigm::Mpi.class(), ParadigmClass::Mpp);
        assert_eq!(Paradigm::OpenMp.to_string(), "OpenMP");
    }

    #[test]
    fn definitions_are_deduplicated() {
        let mut defs = LocalDefinitions::new();
        let a = defs.new_group(GroupType::OpenMpThreadTeam, "", &[0, 1]);
        let b = defs.new_group(GroupType::OpenMpThreadTeam, "", &[0, 2]);
        assert_ne!(a, b);
        assert_eq!(defs.new_group(GroupType::OpenMpThreadTeam, "", &[0, 1]), a);
        assert_eq!(a.id(), 0);
        assert_eq!(b.id(), 1);

        let root = defs.new_communicator(a, "", None);
        let child = defs.new_communicator(b, "", Some(root));
        assert_eq!(defs.new_communicator(a, "", None), root);
        assert_eq!(defs.communicator(child).parent, Some(root));
        assert_eq!(defs.communicators().len(), 2);
        assert_eq!(defs.group(b).members, vec![0, 2]);
    }
}
