//! The properties pseudo-substrate.
//!
//! Properties tell the analysis whether a class of events was recorded completely. They are
//! invalidated by events that happen while recording is disabled, so the callbacks of this
//! substrate only live in the disabled table.

use std::sync::atomic::{AtomicBool, Ordering};

use enum_map::{Enum, EnumMap};
use strum_macros::Display;

use crate::substrates::events::*;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Enum, Display)]
pub enum Property {
    MpiCommunicationComplete,
    ThreadForkJoinEventComplete,
    ThreadCreateWaitEventComplete,
    ThreadLockEventComplete,
    PthreadLocationReused,
}

/// How invalidations combine across processes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PropertyCondition {
    /// The property flips if any process invalidated it.
    Any,
    /// The property flips only if all processes invalidated it.
    All,
}

impl Property {
    pub fn initial_value(self) -> bool {
        !matches!(self, Property::PthreadLocationReused)
    }

    pub fn condition(self) -> PropertyCondition {
        PropertyCondition::Any
    }
}

lazy_static! {
    static ref INVALIDATED: EnumMap<Property, AtomicBool> = EnumMap::default();
}

pub fn invalidate(property: Property) {
    INVALIDATED[property].store(true, Ordering::Relaxed);
}

pub fn is_invalidated(property: Property) -> bool {
    INVALIDATED[property].load(Ordering::Relaxed)
}

/// The current value of `property`: its initial value, flipped once invalidated.
pub fn property_value(property: Property) -> bool {
    property.initial_value() != is_invalidated(property)
}

/// Forget all invalidations.
pub fn reset() {
    for flag in INVALIDATED.values() {
        flag.store(false, Ordering::Relaxed);
    }
}

fn invalidate_mpi(_: &EventData<'_>) {
    invalidate(Property::MpiCommunicationComplete);
}

fn invalidate_thread_lock(_: &EventData<'_>) {
    invalidate(Property::ThreadLockEventComplete);
}

fn invalidate_fork_join(_: &EventData<'_>) {
    invalidate(Property::ThreadForkJoinEventComplete);
}

fn invalidate_create_wait(_: &EventData<'_>) {
    invalidate(Property::ThreadCreateWaitEventComplete);
}

fn initialize(_: &MgmtData<'_>) {
    reset();
}

/// Callbacks for the disabled table.
pub fn event_callbacks() -> EventCallbacks {
    use SubstrateEvent::*;
    let mut callbacks: EventCallbacks = [None; NUM_EVENTS];
    let mut set = |events: &[SubstrateEvent], callback: SubstrateCallback| {
        for event in events {
            callbacks[*event as usize] = Some(callback);
        }
    };
    set(
        &[
            MpiSend,
            MpiRecv,
            MpiCollectiveBegin,
            MpiCollectiveEnd,
            MpiNonBlockingCollectiveRequest,
            MpiNonBlockingCollectiveComplete,
            MpiIrecvRequest,
            MpiRequestTested,
            MpiRequestCancelled,
            MpiIsend,
            MpiIrecv,
        ],
        invalidate_mpi,
    );
    set(&[ThreadAcquireLock, ThreadReleaseLock], invalidate_thread_lock);
    set(
        &[
            ThreadForkJoinFork,
            ThreadForkJoinJoin,
            ThreadForkJoinTeamBegin,
            ThreadForkJoinTeamEnd,
            ThreadForkJoinTaskCreate,
            ThreadForkJoinTaskSwitch,
            ThreadForkJoinTaskBegin,
            ThreadForkJoinTaskEnd,
        ],
        invalidate_fork_join,
    );
    set(
        &[
            ThreadCreateWaitCreate,
            ThreadCreateWaitWait,
            ThreadCreateWaitBegin,
            ThreadCreateWaitEnd,
        ],
        invalidate_create_wait,
    );
    callbacks
}

pub fn mgmt_callbacks() -> MgmtCallbacks {
    let mut callbacks: MgmtCallbacks = [None; NUM_MGMT_EVENTS];
    callbacks[MgmtEvent::InitSubstrate as usize] = Some(initialize);
    callbacks
}
