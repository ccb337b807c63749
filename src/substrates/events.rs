//! The events a substrate can subscribe to, and the data handed to its callbacks.

use bytemuck::NoUninit;
use strum::EnumCount;
use strum_macros::{Display, EnumCount as EnumCountMacro, EnumIter};

use crate::thread::location::Location;

/// Measurement events, in dispatch table row order.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display, EnumCountMacro, EnumIter)]
pub enum SubstrateEvent {
    EnableRecording,
    DisableRecording,
    OnTracingBufferFlushBegin,
    OnTracingBufferFlushEnd,
    EnterRegion,
    ExitRegion,
    Sample,
    CallingContextEnter,
    CallingContextExit,
    EnterRewindRegion,
    ExitRewindRegion,
    MpiSend,
    MpiRecv,
    MpiCollectiveBegin,
    MpiCollectiveEnd,
    MpiIsendComplete,
    MpiIrecvRequest,
    MpiRequestTested,
    MpiRequestCancelled,
    MpiIsend,
    MpiIrecv,
    RmaWinCreate,
    RmaWinDestroy,
    RmaCollectiveBegin,
    RmaCollectiveEnd,
    RmaTryLock,
    RmaAcquireLock,
    RmaRequestLock,
    RmaReleaseLock,
    RmaSync,
    RmaGroupSync,
    RmaPut,
    RmaGet,
    RmaAtomic,
    RmaWaitChange,
    RmaOpCompleteBlocking,
    RmaOpCompleteNonBlocking,
    RmaOpTest,
    RmaOpCompleteRemote,
    ThreadAcquireLock,
    ThreadReleaseLock,
    TriggerCounterInt64,
    TriggerCounterUint64,
    TriggerCounterDouble,
    TriggerParameterInt64,
    TriggerParameterUint64,
    TriggerParameterString,
    ThreadForkJoinFork,
    ThreadForkJoinJoin,
    ThreadForkJoinTeamBegin,
    ThreadForkJoinTeamEnd,
    ThreadForkJoinTaskCreate,
    ThreadForkJoinTaskSwitch,
    ThreadForkJoinTaskBegin,
    ThreadForkJoinTaskEnd,
    ThreadCreateWaitCreate,
    ThreadCreateWaitWait,
    ThreadCreateWaitBegin,
    ThreadCreateWaitEnd,
    TrackAlloc,
    TrackRealloc,
    TrackFree,
    WritePostMortemMetrics,
    ProgramBegin,
    ProgramEnd,
    IoCreateHandle,
    IoDestroyHandle,
    IoDuplicateHandle,
    IoSeek,
    IoChangeStatusFlags,
    IoDeleteFile,
    IoOperationBegin,
    IoOperationIssued,
    IoOperationTest,
    IoOperationComplete,
    IoOperationCancelled,
    IoAcquireLock,
    IoTryLock,
    IoReleaseLock,
    MpiNonBlockingCollectiveRequest,
    MpiNonBlockingCollectiveComplete,
    CommCreate,
    CommDestroy,
}

pub const NUM_EVENTS: usize = SubstrateEvent::COUNT;

/// Lifecycle events, in management table row order.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display, EnumCountMacro, EnumIter)]
pub enum MgmtEvent {
    InitSubstrate,
    InitializeMpp,
    EnsureGlobalId,
    DumpManifest,
    OnLocationCreation,
    OnLocationDeletion,
    OnCpuLocationActivation,
    OnCpuLocationDeactivation,
    CoreTaskCreate,
    CoreTaskComplete,
    WriteData,
    FinalizeSubstrate,
    PreUnifySubstrate,
    NewDefinitionHandle,
    AddAttribute,
    LeakedMemory,
    GetRequirement,
    IoParadigmEnter,
    IoParadigmLeave,
}

pub const NUM_MGMT_EVENTS: usize = MgmtEvent::COUNT;

/// Which of the two event tables dispatch uses.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, NoUninit)]
pub enum RecordingMode {
    Enabled,
    Disabled,
}

/// Arguments of a measurement event.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum EventArgs<'a> {
    None,
    Region(u32),
    /// A thread team event: the team, the thread number within it, and the team size.
    ThreadTeam {
        team: u32,
        thread_num: u32,
        team_size: u32,
    },
    Counter(u64),
    Values(&'a [u64]),
    Text(&'a str),
}

/// What a substrate event callback receives.
#[derive(Copy, Clone, Debug)]
pub struct EventData<'a> {
    pub event: SubstrateEvent,
    /// Local id of the recording location.
    pub location: u32,
    pub timestamp: u64,
    pub args: EventArgs<'a>,
}

impl<'a> EventData<'a> {
    pub fn new(event: SubstrateEvent, location: u32, timestamp: u64) -> Self {
        EventData {
            event,
            location,
            timestamp,
            args: EventArgs::None,
        }
    }

    pub fn with_args(self, args: EventArgs<'a>) -> Self {
        EventData { args, ..self }
    }
}

/// Arguments of a lifecycle event.
#[derive(Copy, Clone, Debug)]
pub enum MgmtArgs<'a> {
    None,
    /// The id given to the substrate by [`MgmtEvent::InitSubstrate`].
    SubstrateId(usize),
    Location {
        location: &'a Location,
        parent: Option<&'a Location>,
    },
    CpuLocationActivation {
        location: &'a Location,
        parent: Option<&'a Location>,
        fork_sequence_count: u32,
    },
}

/// What a management callback receives.
#[derive(Copy, Clone, Debug)]
pub struct MgmtData<'a> {
    pub event: MgmtEvent,
    pub args: MgmtArgs<'a>,
}

/// An event callback. Callbacks are plain functions, so dispatch needs no virtual calls.
pub type SubstrateCallback = fn(&EventData<'_>);

/// A management callback.
pub type MgmtCallback = fn(&MgmtData<'_>);

/// Callbacks of one substrate for every event, indexed by event.
pub type EventCallbacks = [Option<SubstrateCallback>; NUM_EVENTS];

/// Management callbacks of one substrate, indexed by management event.
pub type MgmtCallbacks = [Option<MgmtCallback>; NUM_MGMT_EVENTS];
