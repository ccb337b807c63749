use atomic::{Atomic, Ordering};
use probe::probe;

use crate::substrates::events::*;
use crate::substrates::plugins::SubstratePlugin;
use crate::substrates::properties;
use crate::substrates::table::{PackedTable, TableBuilder};
use crate::thread::location::Location;

/// A substrate compiled into the measurement, such as tracing or profiling.
#[derive(Clone)]
pub struct BuiltinSubstrate {
    pub name: &'static str,
    pub enabled: EventCallbacks,
    pub disabled: EventCallbacks,
    pub mgmt: MgmtCallbacks,
}

impl BuiltinSubstrate {
    /// A substrate without any callbacks.
    pub fn new(name: &'static str) -> Self {
        BuiltinSubstrate {
            name,
            enabled: [None; NUM_EVENTS],
            disabled: [None; NUM_EVENTS],
            mgmt: [None; NUM_MGMT_EVENTS],
        }
    }

    pub fn with_event(
        mut self,
        mode: RecordingMode,
        event: SubstrateEvent,
        callback: SubstrateCallback,
    ) -> Self {
        match mode {
            RecordingMode::Enabled => self.enabled[event as usize] = Some(callback),
            RecordingMode::Disabled => self.disabled[event as usize] = Some(callback),
        }
        self
    }

    pub fn with_mgmt(mut self, event: MgmtEvent, callback: MgmtCallback) -> Self {
        self.mgmt[event as usize] = Some(callback);
        self
    }

    fn check_required(&self) {
        for event in [MgmtEvent::InitSubstrate, MgmtEvent::FinalizeSubstrate] {
            if self.mgmt[event as usize].is_none() {
                panic!(
                    "Substrate '{}' does not provide the required management callback {}",
                    self.name, event
                );
            }
        }
    }
}

impl std::fmt::Debug for BuiltinSubstrate {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let count = |callbacks: &[Option<SubstrateCallback>]| {
            callbacks.iter().filter(|c| c.is_some()).count()
        };
        f.debug_struct("BuiltinSubstrate")
            .field("name", &self.name)
            .field("enabled", &count(&self.enabled))
            .field("disabled", &count(&self.disabled))
            .finish()
    }
}

/// The dispatch state of the process.
///
/// The tables are immutable once built. Switching between recording and not recording only
/// flips which event table [`Substrates::dispatch`] reads.
pub struct Substrates {
    enabled: PackedTable<SubstrateCallback>,
    disabled: PackedTable<SubstrateCallback>,
    mgmt: PackedTable<MgmtCallback>,
    mode: Atomic<RecordingMode>,
    plugins: Vec<Box<dyn SubstratePlugin>>,
    nr_substrates: usize,
    /// Substrate ids handed out by [`Substrates::initialize`].
    next_substrate_id: usize,
    plugin_group_id: Option<usize>,
}

impl Substrates {
    /// Collect the callbacks of the properties substrate, the enabled built-in substrates and
    /// the plugins, and pack them. Recording starts enabled.
    pub fn early_initialize(
        tracing: Option<&BuiltinSubstrate>,
        profiling: Option<&BuiltinSubstrate>,
        plugins: Vec<Box<dyn SubstratePlugin>>,
    ) -> Self {
        let builtins: Vec<&BuiltinSubstrate> = [tracing, profiling].into_iter().flatten().collect();
        let nr_substrates = 1 + builtins.len() + plugins.len();

        let mut enabled = TableBuilder::new(NUM_EVENTS, nr_substrates);
        let mut disabled = TableBuilder::new(NUM_EVENTS, nr_substrates);
        let mut mgmt = TableBuilder::new(NUM_MGMT_EVENTS, nr_substrates);

        disabled.append_callbacks(&properties::event_callbacks());
        mgmt.append_callbacks(&properties::mgmt_callbacks());

        for substrate in builtins {
            substrate.check_required();
            enabled.append_callbacks(&substrate.enabled);
            disabled.append_callbacks(&substrate.disabled);
            mgmt.append_callbacks(&substrate.mgmt);
        }

        for (table, mode) in [
            (&mut enabled, RecordingMode::Enabled),
            (&mut disabled, RecordingMode::Disabled),
        ] {
            for (i, plugin) in plugins.iter().enumerate() {
                let callbacks = plugin.event_callbacks(mode);
                warn_unknown_events(i, plugin.name(), callbacks);
                table.append_callbacks(callbacks);
            }
        }
        for plugin in plugins.iter() {
            let mut callbacks = plugin.mgmt_callbacks().to_vec();
            for event in [MgmtEvent::InitSubstrate, MgmtEvent::FinalizeSubstrate] {
                if let Some(callback) = callbacks.get_mut(event as usize) {
                    *callback = None;
                }
            }
            mgmt.append_callbacks(&callbacks);
        }

        debug!(
            "{} substrates registered, {} of them plugins",
            nr_substrates,
            plugins.len()
        );

        Substrates {
            enabled: enabled.pack(),
            disabled: disabled.pack(),
            mgmt: mgmt.pack(),
            mode: Atomic::new(RecordingMode::Enabled),
            plugins,
            nr_substrates,
            next_substrate_id: 0,
            plugin_group_id: None,
        }
    }

    pub fn nr_substrates(&self) -> usize {
        self.nr_substrates
    }

    pub fn plugins(&self) -> &[Box<dyn SubstratePlugin>] {
        &self.plugins
    }

    pub fn enable_recording(&self) {
        self.mode.store(RecordingMode::Enabled, Ordering::Release);
        probe!(scorep, enable_recording);
    }

    pub fn disable_recording(&self) {
        self.mode.store(RecordingMode::Disabled, Ordering::Release);
        probe!(scorep, disable_recording);
    }

    pub fn recording_mode(&self) -> RecordingMode {
        self.mode.load(Ordering::Acquire)
    }

    pub fn is_recording_enabled(&self) -> bool {
        self.recording_mode() == RecordingMode::Enabled
    }

    /// The packed event table of `mode`.
    pub fn table(&self, mode: RecordingMode) -> &PackedTable<SubstrateCallback> {
        match mode {
            RecordingMode::Enabled => &self.enabled,
            RecordingMode::Disabled => &self.disabled,
        }
    }

    pub fn mgmt_table(&self) -> &PackedTable<MgmtCallback> {
        &self.mgmt
    }

    /// The callbacks `event` currently dispatches to.
    pub fn callbacks(&self, event: SubstrateEvent) -> &[Option<SubstrateCallback>] {
        self.table(self.recording_mode()).row(event as usize)
    }

    /// Hand `data` to every callback registered for its event in the active table.
    #[inline(always)]
    pub fn dispatch(&self, data: &EventData<'_>) {
        for callback in self
            .table(self.recording_mode())
            .callbacks(data.event as usize)
        {
            callback(data);
        }
    }

    #[inline(always)]
    pub fn dispatch_mgmt(&self, data: &MgmtData<'_>) {
        for callback in self.mgmt.callbacks(data.event as usize) {
            callback(data);
        }
    }

    fn dispatch_mgmt_args(&self, event: MgmtEvent, args: MgmtArgs<'_>) {
        self.dispatch_mgmt(&MgmtData { event, args });
    }

    /// Give every substrate its id: the built-in ones in management row order, then the
    /// plugin group.
    pub fn initialize(&mut self) {
        self.next_substrate_id = 0;
        for callback in self.mgmt.callbacks(MgmtEvent::InitSubstrate as usize) {
            callback(&MgmtData {
                event: MgmtEvent::InitSubstrate,
                args: MgmtArgs::SubstrateId(self.next_substrate_id),
            });
            self.next_substrate_id += 1;
        }
        if !self.plugins.is_empty() {
            self.plugin_group_id = Some(self.next_substrate_id);
            self.next_substrate_id += 1;
            for (i, plugin) in self.plugins.iter_mut().enumerate() {
                plugin.assign_id(i);
            }
        }
        info!(
            "initialized {} substrates",
            self.number_of_registered_substrates()
        );
    }

    pub fn number_of_registered_substrates(&self) -> usize {
        self.next_substrate_id
    }

    /// The id shared by all plugins, once initialized.
    pub fn plugin_group_id(&self) -> Option<usize> {
        self.plugin_group_id
    }

    pub fn initialize_mpp(&self) {
        self.dispatch_mgmt_args(MgmtEvent::InitializeMpp, MgmtArgs::None);
    }

    pub fn on_location_creation(&self, location: &Location, parent: Option<&Location>) {
        self.dispatch_mgmt_args(
            MgmtEvent::OnLocationCreation,
            MgmtArgs::Location { location, parent },
        );
    }

    pub fn on_location_deletion(&self, location: &Location) {
        self.dispatch_mgmt_args(
            MgmtEvent::OnLocationDeletion,
            MgmtArgs::Location {
                location,
                parent: None,
            },
        );
    }

    pub fn on_cpu_location_activation(
        &self,
        location: &Location,
        parent: Option<&Location>,
        fork_sequence_count: u32,
    ) {
        self.dispatch_mgmt_args(
            MgmtEvent::OnCpuLocationActivation,
            MgmtArgs::CpuLocationActivation {
                location,
                parent,
                fork_sequence_count,
            },
        );
    }

    pub fn on_cpu_location_deactivation(&self, location: &Location, parent: Option<&Location>) {
        self.dispatch_mgmt_args(
            MgmtEvent::OnCpuLocationDeactivation,
            MgmtArgs::Location { location, parent },
        );
    }

    pub fn pre_unify(&self) {
        self.dispatch_mgmt_args(MgmtEvent::PreUnifySubstrate, MgmtArgs::None);
    }

    pub fn write_data(&self) {
        self.dispatch_mgmt_args(MgmtEvent::WriteData, MgmtArgs::None);
    }

    /// Finalize the built-in substrates, then the plugins. Ids are handed out anew by the next
    /// [`Substrates::initialize`].
    pub fn finalize(&mut self) {
        self.dispatch_mgmt_args(MgmtEvent::FinalizeSubstrate, MgmtArgs::None);
        for plugin in self.plugins.iter_mut() {
            plugin.finalize();
        }
        self.next_substrate_id = 0;
        self.plugin_group_id = None;
    }
}

fn warn_unknown_events(index: usize, name: &str, callbacks: &[Option<SubstrateCallback>]) {
    if callbacks.len() > NUM_EVENTS && callbacks[NUM_EVENTS..].iter().any(Option::is_some) {
        warn!(
            "Substrate plugin nr {} ({}) provides more event functions than this measurement \
             knows ({} > {}). Ignoring the unknown ones.",
            index,
            name,
            callbacks.len(),
            NUM_EVENTS
        );
    }
}

impl std::fmt::Debug for Substrates {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Substrates")
            .field("nr_substrates", &self.nr_substrates)
            .field("mode", &self.recording_mode())
            .field("enabled", &self.enabled)
            .field("disabled", &self.disabled)
            .field("mgmt", &self.mgmt)
            .finish()
    }
}
