//! Fork/join thread team identity.
//!
//! Thread teams are identified locally per location while the program runs (see [`team`]) and
//! collated into communicator definitions when the measurement is unified (see [`unify`]).
//!
//! A team definition goes through three states: created with `unified` unset, pointing at its
//! leader's definition during collation (members only), and finally pointing at the
//! communicator of the team.

pub mod team;
pub mod unify;

pub use self::team::{
    create_team_data, get_parent_team_handle, get_team_handle, team, teams,
    InterimCommunicatorHandle, TeamData, ThreadTeam, Unified,
};
pub use self::unify::{post_unify, pre_unify};

use crate::definitions::Paradigm;

/// The fork/join threading model of this measurement.
pub const FORK_JOIN_PARADIGM: Paradigm = Paradigm::OpenMp;
