//! The measurement state of one process.

use crate::definitions::LocalDefinitions;
use crate::ipc::Ipc;
use crate::memory::Memory;
use crate::substrates::{
    BuiltinSubstrate, EventData, PluginRegistry, SubstratePlugin, Substrates,
};
use crate::thread::fork_join::{self, InterimCommunicatorHandle, FORK_JOIN_PARADIGM};
use crate::thread::location::{Location, LocationType};
use crate::util::logger;
use crate::util::options::Options;

/// Collects everything a [`Measurement`] is made of.
///
/// The options are read from the environment when the builder is created and can be
/// changed afterwards with [`MeasurementBuilder::set_option`].
pub struct MeasurementBuilder {
    pub options: Options,
    tracing: Option<BuiltinSubstrate>,
    profiling: Option<BuiltinSubstrate>,
    plugins: PluginRegistry,
}

impl MeasurementBuilder {
    pub fn new() -> Self {
        Self::with_options(Options::default())
    }

    /// A builder that ignores the environment.
    pub fn with_options(options: Options) -> Self {
        MeasurementBuilder {
            options,
            tracing: None,
            profiling: None,
            plugins: PluginRegistry::new(),
        }
    }

    /// Set an option by its snake case name, e.g. `total_memory`. Returns whether the value
    /// was taken.
    pub fn set_option(&mut self, name: &str, value: &str) -> bool {
        self.options.set_from_str(name, value)
    }

    /// The substrate used when `enable_tracing` is set.
    pub fn set_tracing_substrate(&mut self, substrate: BuiltinSubstrate) -> &mut Self {
        self.tracing = Some(substrate);
        self
    }

    /// The substrate used when `enable_profiling` is set.
    pub fn set_profiling_substrate(&mut self, substrate: BuiltinSubstrate) -> &mut Self {
        self.profiling = Some(substrate);
        self
    }

    /// Make a plugin loadable through `substrate_plugins`.
    pub fn register_plugin<F>(&mut self, name: &str, constructor: F) -> &mut Self
    where
        F: Fn() -> Box<dyn SubstratePlugin> + Send + Sync + 'static,
    {
        self.plugins.register(name, constructor);
        self
    }

    fn selected<'a>(
        enabled: bool,
        substrate: &'a Option<BuiltinSubstrate>,
        what: &str,
    ) -> Option<&'a BuiltinSubstrate> {
        match (enabled, substrate) {
            (true, None) => {
                debug!("{} is enabled, but no {} substrate is available", what, what);
                None
            }
            (true, Some(substrate)) => Some(substrate),
            (false, _) => None,
        }
    }

    pub fn build(self) -> Measurement {
        match logger::try_init() {
            Ok(_) => debug!("The measurement initialized the logger."),
            Err(_) => debug!(
                "The measurement failed to initialize the logger. Possibly a logger has been \
                 installed by the embedder."
            ),
        }
        let memory = Memory::new(&self.options);
        let plugins = self.plugins.load(&self.options.substrate_plugins);
        let mut substrates = Substrates::early_initialize(
            Self::selected(self.options.enable_tracing, &self.tracing, "tracing"),
            Self::selected(self.options.enable_profiling, &self.profiling, "profiling"),
            plugins,
        );
        substrates.initialize();
        info!(
            "measurement started with {} substrates",
            substrates.number_of_registered_substrates()
        );
        Measurement {
            options: self.options,
            memory,
            substrates,
            locations: vec![],
            definitions: LocalDefinitions::new(),
            finalized: false,
        }
    }
}

impl Default for MeasurementBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Measurement {
    options: Options,
    memory: Memory,
    substrates: Substrates,
    locations: Vec<Location>,
    definitions: LocalDefinitions,
    finalized: bool,
}

impl Measurement {
    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn substrates(&self) -> &Substrates {
        &self.substrates
    }

    pub fn definitions(&self) -> &LocalDefinitions {
        &self.definitions
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    pub fn location(&self, id: u32) -> Option<&Location> {
        self.locations.get(id as usize)
    }

    pub fn location_mut(&mut self, id: u32) -> Option<&mut Location> {
        self.locations.get_mut(id as usize)
    }

    /// Create a location and return its id. CPU threads get a thread team table.
    pub fn create_location(
        &mut self,
        location_type: LocationType,
        name: &str,
        parent: Option<u32>,
    ) -> u32 {
        let id = self.locations.len() as u32;
        let mut location = Location::new(id, location_type, name, parent);
        if location.is_cpu_thread()
            && !fork_join::create_team_data(
                &self.memory,
                &mut location,
                self.options.team_table_buckets,
            )
        {
            warn!("location {}: no memory for the thread team table", id);
        }
        let parent = parent.and_then(|parent| self.locations.get(parent as usize));
        self.substrates.on_location_creation(&location, parent);
        self.locations.push(location);
        id
    }

    /// A CPU location starts running on behalf of `parent`.
    pub fn activate_cpu_location(&self, id: u32, parent: Option<u32>, fork_sequence_count: u32) {
        if let Some(location) = self.location(id) {
            let parent = parent.and_then(|parent| self.location(parent));
            self.substrates
                .on_cpu_location_activation(location, parent, fork_sequence_count);
        }
    }

    pub fn deactivate_cpu_location(&self, id: u32, parent: Option<u32>) {
        if let Some(location) = self.location(id) {
            let parent = parent.and_then(|parent| self.location(parent));
            self.substrates.on_cpu_location_deactivation(location, parent);
        }
    }

    pub fn enable_recording(&self) {
        self.substrates.enable_recording();
    }

    pub fn disable_recording(&self) {
        self.substrates.disable_recording();
    }

    pub fn is_recording_enabled(&self) -> bool {
        self.substrates.is_recording_enabled()
    }

    #[inline(always)]
    pub fn dispatch(&self, data: &EventData<'_>) {
        self.substrates.dispatch(data);
    }

    /// The thread team location `id` enters as `thread_num` of `num_threads`. `None` if the
    /// location does not exist or definition memory is exhausted.
    pub fn team_begin(
        &mut self,
        id: u32,
        parent: Option<InterimCommunicatorHandle>,
        num_threads: u32,
        thread_num: u32,
    ) -> Option<InterimCommunicatorHandle> {
        let location = self.locations.get_mut(id as usize)?;
        fork_join::get_team_handle(
            &self.memory,
            location,
            FORK_JOIN_PARADIGM,
            parent,
            num_threads,
            thread_num,
        )
    }

    /// The team to continue in after leaving `team`.
    pub fn team_end(&self, team: InterimCommunicatorHandle) -> Option<InterimCommunicatorHandle> {
        fork_join::get_parent_team_handle(&self.memory, team)
    }

    pub fn initialize_mpp(&self) {
        self.substrates.initialize_mpp();
    }

    /// Turn the thread teams of all locations into communicator definitions. Collective over
    /// all ranks of `ipc`.
    pub fn unify(&mut self, ipc: &impl Ipc) {
        self.substrates.pre_unify();
        fork_join::pre_unify(
            &self.memory,
            &mut self.locations,
            &mut self.definitions,
            ipc,
            FORK_JOIN_PARADIGM,
        );
        fork_join::post_unify(&self.memory, &mut self.locations);
        debug!(
            "rank {}: {} groups, {} communicators",
            ipc.rank(),
            self.definitions.groups().len(),
            self.definitions.communicators().len()
        );
    }

    /// Write the data, say goodbye to every location and finalize the substrates. Only the
    /// first call has an effect.
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;
        self.substrates.write_data();
        for location in self.locations.iter() {
            self.substrates.on_location_deletion(location);
        }
        self.substrates.finalize();
        self.memory
            .dump_stats("Memory usage at the end of the measurement", &self.locations);
        info!("measurement finalized");
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::SingleProcess;
    use crate::thread::fork_join::Unified;
    use crate::util::test_util::serial_test;

    // Building a measurement resets the properties, so it must not overlap other tests doing so.
    fn measurement() -> Measurement {
        MeasurementBuilder::with_options(Options::defaults()).build()
    }

    #[test]
    fn locations_get_team_tables() {
        serial_test(|| {
            let mut measurement = measurement();
            let main = measurement.create_location(LocationType::CpuThread, "main", None);
            let gpu = measurement.create_location(LocationType::Gpu, "gpu", Some(main));
            assert_eq!((main, gpu), (0, 1));
            assert!(measurement.location(main).unwrap().team_data().is_some());
            assert!(measurement.location(gpu).unwrap().team_data().is_none());
            assert_eq!(measurement.location(gpu).unwrap().parent(), Some(main));
        })
    }

    #[test]
    fn recording_switch() {
        serial_test(|| {
            let measurement = measurement();
            assert!(measurement.is_recording_enabled());
            measurement.disable_recording();
            assert!(!measurement.is_recording_enabled());
            measurement.enable_recording();
            assert!(measurement.is_recording_enabled());
        })
    }

    #[test]
    fn unify_and_finalize() {
        serial_test(|| {
            let mut measurement = measurement();
            let main = measurement.create_location(LocationType::CpuThread, "main", None);
            let worker = measurement.create_location(LocationType::CpuThread, "worker", Some(main));
            let team = measurement.team_begin(main, None, 2, 0).unwrap();
            measurement.team_begin(worker, None, 2, 1).unwrap();
            assert_eq!(measurement.team_end(team), None);

            measurement.unify(&SingleProcess);
            let mapping = measurement.location(worker).unwrap().team_data().unwrap().mapping();
            assert_eq!(mapping.len(), 1);
            let team = fork_join::team(measurement.memory(), team);
            assert_eq!(team.unified, Unified::Communicator(mapping[0]));

            measurement.finalize();
            assert!(measurement.is_finalized());
            measurement.finalize();
        })
    }
}
