//! The measurement memory layer.
//!
//! One [`Allocator`] serves the whole process. Every location draws from it through its own
//! page managers, one per [`MemoryType`], created on first use. Definitions that do not belong
//! to a location go to the process definitions page manager, which is shared and therefore
//! behind a lock.
//!
//! Running out of memory is not fatal here: the first failing request reports the situation
//! together with the memory statistics, and [`Memory::is_out_of_memory`] lets callers stop
//! recording.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use enum_map::{Enum, EnumMap};
use strum_macros::Display;

use crate::allocator::{Allocator, MovableMemory, PageManager, PageManagerStats, SpinGuard};
use crate::thread::location::Location;
use crate::util::constants::ALLOCATOR_ALIGNMENT;
use crate::util::options::{MemoryStatsMode, Options};
use crate::util::Address;

/// The page managers a location can own.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Enum, Display)]
pub enum MemoryType {
    #[strum(serialize = "Location-Misc")]
    Misc,
    #[strum(serialize = "Location-Definitions")]
    Definitions,
    #[strum(serialize = "Location-Profiling")]
    Profiling,
}

/// The page manager type used throughout the measurement.
pub type MemoryPageManager = PageManager<SpinGuard>;

pub struct Memory {
    allocator: Arc<Allocator<SpinGuard>>,
    definitions: spin::Mutex<MemoryPageManager>,
    out_of_memory: AtomicBool,
    stats_mode: MemoryStatsMode,
}

impl Memory {
    /// Create the process allocator and the process definitions page manager.
    ///
    /// Panics if the allocator cannot be created from the configured sizes. Nothing can be
    /// measured without it.
    pub fn new(options: &Options) -> Self {
        let mut total_memory = options.total_memory.bytes();
        let page_size = options.page_size.bytes();
        if total_memory > u32::MAX as usize {
            warn!(
                "Too many memory requested. The measurement supports at most {} bytes, \
                 SCOREP_TOTAL_MEMORY={} will be reduced to that",
                u32::MAX,
                total_memory
            );
            total_memory = u32::MAX as usize;
        }
        assert!(
            total_memory >= page_size,
            "SCOREP_TOTAL_MEMORY={} is smaller than SCOREP_PAGE_SIZE={}",
            total_memory,
            page_size
        );

        let allocator = u32::try_from(page_size)
            .ok()
            .and_then(|page_size| Allocator::new(total_memory as u32, page_size, SpinGuard::new()))
            .unwrap_or_else(|| {
                panic!(
                    "Cannot create the measurement allocator with SCOREP_TOTAL_MEMORY={} and \
                     SCOREP_PAGE_SIZE={}",
                    total_memory, page_size
                )
            });
        let definitions = allocator.create_page_manager().unwrap_or_else(|| {
            panic!(
                "Cannot create the definitions page manager, SCOREP_TOTAL_MEMORY={} is too small",
                total_memory
            )
        });
        debug!(
            "measurement memory: {} bytes in pages of {} bytes",
            allocator.total_memory(),
            allocator.page_size()
        );

        Memory {
            allocator,
            definitions: spin::Mutex::new(definitions),
            out_of_memory: AtomicBool::new(false),
            stats_mode: options.development_memory_stats,
        }
    }

    pub fn allocator(&self) -> &Arc<Allocator<SpinGuard>> {
        &self.allocator
    }

    pub fn create_page_manager(&self) -> Option<MemoryPageManager> {
        let page_manager = self.allocator.create_page_manager();
        if page_manager.is_none() {
            self.handle_out_of_memory();
        }
        page_manager
    }

    pub fn create_moved_page_manager(&self) -> Option<MemoryPageManager> {
        let page_manager = self.allocator.create_moved_page_manager();
        if page_manager.is_none() {
            self.handle_out_of_memory();
        }
        page_manager
    }

    /// Report running out of memory. Only the first report is loud.
    pub fn handle_out_of_memory(&self) {
        if self.out_of_memory.swap(true, Ordering::AcqRel) {
            debug!("measurement memory is still exhausted");
            return;
        }
        let stats = self.allocator.stats();
        error!(
            "Out of memory. Please increase SCOREP_TOTAL_MEMORY={} and try again.",
            self.allocator.total_memory()
        );
        error!("Total memory: {}", stats.pages);
        error!("Maintenance memory: {}", stats.maintenance);
        if let Some(definitions) = self.definitions.try_lock() {
            error!("Definitions memory: {}", definitions.stats());
        }
    }

    pub fn is_out_of_memory(&self) -> bool {
        self.out_of_memory.load(Ordering::Acquire)
    }

    fn checked<T>(&self, result: Option<T>) -> Option<T> {
        if result.is_none() {
            self.handle_out_of_memory();
        }
        result
    }

    /// Allocate from the location's misc page manager.
    pub fn alloc_for_misc(&self, location: &mut Location, size: usize) -> Option<Address> {
        if size == 0 {
            return None;
        }
        let page_manager = location.page_manager(self, MemoryType::Misc)?;
        self.checked(page_manager.alloc(size))
    }

    /// Allocate from the location's misc page manager, aligned to `alignment`, which must be a
    /// power of two not below the allocator alignment.
    pub fn aligned_alloc_for_misc(
        &self,
        location: &mut Location,
        alignment: usize,
        size: usize,
    ) -> Option<Address> {
        if size == 0 || alignment < ALLOCATOR_ALIGNMENT || !alignment.is_power_of_two() {
            return None;
        }
        let page_manager = location.page_manager(self, MemoryType::Misc)?;
        self.checked(page_manager.aligned_alloc(alignment, size))
    }

    pub fn alloc_for_profile(&self, location: &mut Location, size: usize) -> Option<Address> {
        if size == 0 {
            return None;
        }
        let page_manager = location.page_manager(self, MemoryType::Profiling)?;
        self.checked(page_manager.alloc(size))
    }

    /// Allocate definition memory from the location's definitions page manager, or from the
    /// process definitions page manager if there is no location.
    pub fn alloc_for_definitions(
        &self,
        location: Option<&mut Location>,
        size: usize,
    ) -> Option<MovableMemory> {
        if size == 0 {
            return None;
        }
        let memory = match location {
            Some(location) => location
                .page_manager(self, MemoryType::Definitions)?
                .alloc_movable(size),
            None => self.definitions.lock().alloc_movable(size),
        };
        self.checked(memory)
    }

    /// Resolve definition memory. Without a page manager the offset is taken as is, which is
    /// right for every page manager that was not moved.
    pub fn get_address(
        &self,
        memory: MovableMemory,
        page_manager: Option<&MemoryPageManager>,
    ) -> Address {
        match page_manager {
            Some(page_manager) => page_manager.get_address_from_movable_memory(memory),
            None => self.definitions.lock().get_address_from_movable_memory(memory),
        }
    }

    /// Resolve definition memory of any location without locking. Definitions page managers
    /// are never moved, so the offset is relative to the allocator base.
    pub fn definition_address(&self, memory: MovableMemory) -> Address {
        let offset = memory.get() as usize;
        debug_assert!(offset >= self.allocator.page_size());
        debug_assert!(offset < self.allocator.total_memory());
        self.allocator.base() + offset
    }

    /// Give back all memory of one type of a location. The page manager stays.
    ///
    /// The thread team table of a location lives in its definitions memory for as long as the
    /// location exists, so definitions memory of a location with a team table is kept.
    /// Returns whether the memory was freed.
    pub fn free_memory_type(&self, location: &mut Location, memory_type: MemoryType) -> bool {
        if memory_type == MemoryType::Definitions && location.team_data().is_some() {
            warn!(
                "location {}: definitions memory holds the thread team table, not freed",
                location.id()
            );
            return false;
        }
        if let Some(page_manager) = location.existing_page_manager_mut(memory_type) {
            page_manager.free();
        }
        true
    }

    pub fn free_definition_memory(&self) {
        self.definitions.lock().free();
    }

    /// Bits needed to address any byte of definition memory.
    pub fn definition_handles_bit_width(&self) -> u32 {
        self.allocator.page_offset_bit_width() + self.allocator.n_pages_bit_width()
    }

    /// Collect the statistics of the allocator, the process definitions and the page managers
    /// of `locations`.
    pub fn report(&self, locations: &[Location]) -> MemoryReport {
        let stats = self.allocator.stats();
        let mut report = MemoryReport {
            total_memory: self.allocator.total_memory(),
            page_size: self.allocator.page_size(),
            number_of_pages: self.allocator.max_number_of_pages(),
            total: stats.pages,
            maintenance: stats.maintenance,
            definitions: self.definitions.lock().stats(),
            per_type: EnumMap::default(),
            per_location: vec![],
        };
        for location in locations {
            for (memory_type, page_manager) in location.page_managers() {
                let stats = page_manager.stats();
                report.per_type[memory_type] += stats;
                report.per_location.push((location.id(), memory_type, stats));
            }
        }
        report
    }

    /// Log the memory statistics as selected by `SCOREP_DEVELOPMENT_MEMORY_STATS`.
    pub fn dump_stats(&self, message: &str, locations: &[Location]) {
        if self.stats_mode == MemoryStatsMode::None {
            return;
        }
        let report = self.report(locations);
        info!("{}", message);
        info!("{}", report);
        if self.stats_mode == MemoryStatsMode::Full {
            for (id, memory_type, stats) in &report.per_location {
                info!("location {} {}: {}", id, memory_type, stats);
            }
        }
    }
}

/// A snapshot of the memory statistics.
#[derive(Clone, Debug)]
pub struct MemoryReport {
    pub total_memory: usize,
    pub page_size: usize,
    pub number_of_pages: u32,
    pub total: PageManagerStats,
    pub maintenance: PageManagerStats,
    pub definitions: PageManagerStats,
    /// Summed over all locations.
    pub per_type: EnumMap<MemoryType, PageManagerStats>,
    pub per_location: Vec<(u32, MemoryType, PageManagerStats)>,
}

impl fmt::Display for MemoryReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "runtime management memory tracking:")?;
        writeln!(f, "{:<45} {}", "SCOREP_TOTAL_MEMORY [bytes]", self.total_memory)?;
        writeln!(f, "{:<45} {}", "SCOREP_PAGE_SIZE [bytes]", self.page_size)?;
        writeln!(f, "{:<45} {}", "Number of pages", self.number_of_pages)?;
        writeln!(f, "{:<22} {}", "Total", self.total)?;
        writeln!(f, "{:<22} {}", "Maintenance", self.maintenance)?;
        write!(f, "{:<22} {}", "Definitions", self.definitions)?;
        for (memory_type, stats) in &self.per_type {
            write!(f, "\n{:<22} {}", memory_type.to_string(), stats)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::location::LocationType;
    use crate::util::options::MemorySize;

    fn options(total_memory: usize, page_size: usize) -> Options {
        let mut options = Options::defaults();
        options.total_memory = MemorySize(total_memory);
        options.page_size = MemorySize(page_size);
        options
    }

    #[test]
    fn definitions_without_location() {
        let memory = Memory::new(&options(1 << 20, 4096));
        let handle = memory.alloc_for_definitions(None, 100).unwrap();
        let addr = memory.get_address(handle, None);
        assert_eq!(addr, memory.allocator().base() + handle.get() as usize);
        assert!(memory.alloc_for_definitions(None, 0).is_none());
        assert!(!memory.is_out_of_memory());
    }

    #[test]
    fn location_page_managers_are_created_lazily() {
        let memory = Memory::new(&options(1 << 20, 4096));
        let mut location = Location::new(0, LocationType::CpuThread, "main", None);
        assert_eq!(location.page_managers().count(), 0);
        memory.alloc_for_misc(&mut location, 64).unwrap();
        memory.alloc_for_profile(&mut location, 64).unwrap();
        assert_eq!(location.page_managers().count(), 2);

        let report = memory.report(std::slice::from_ref(&location));
        assert_eq!(report.per_type[MemoryType::Misc].memory_used, 64);
        assert_eq!(report.per_type[MemoryType::Profiling].memory_used, 64);
        assert_eq!(report.per_type[MemoryType::Definitions].pages_allocated, 0);
        assert_eq!(report.per_location.len(), 2);

        assert!(memory.free_memory_type(&mut location, MemoryType::Misc));
        let report = memory.report(std::slice::from_ref(&location));
        assert_eq!(report.per_type[MemoryType::Misc].memory_used, 0);
    }

    #[test]
    fn aligned_misc_alignment_checks() {
        let memory = Memory::new(&options(1 << 20, 4096));
        let mut location = Location::new(0, LocationType::CpuThread, "main", None);
        assert!(memory.aligned_alloc_for_misc(&mut location, 32, 8).is_none());
        assert!(memory.aligned_alloc_for_misc(&mut location, 96, 8).is_none());
        let addr = memory.aligned_alloc_for_misc(&mut location, 256, 8).unwrap();
        assert!(addr.is_aligned_to(256));
    }

    #[test]
    fn out_of_memory_is_sticky() {
        let memory = Memory::new(&options(16 * 1024, 1024));
        let mut location = Location::new(0, LocationType::CpuThread, "main", None);
        while memory.alloc_for_misc(&mut location, 1000).is_some() {}
        assert!(memory.is_out_of_memory());
        memory.handle_out_of_memory();
        assert!(memory.is_out_of_memory());
    }

    #[test]
    fn definition_memory_is_freed() {
        let memory = Memory::new(&options(1 << 20, 4096));
        memory.alloc_for_definitions(None, 1000).unwrap();
        assert_eq!(memory.report(&[]).definitions.memory_used, 1000);
        memory.free_definition_memory();
        assert_eq!(memory.report(&[]).definitions.memory_used, 0);
    }

    #[test]
    fn team_tables_outlive_freed_memory() {
        use crate::definitions::Paradigm;
        use crate::thread::fork_join::{get_team_handle, team};

        let memory = Memory::new(&options(1 << 20, 4096));
        let mut leader = Location::new(0, LocationType::CpuThread, "leader", None);
        let mut other = Location::new(1, LocationType::CpuThread, "other", None);
        let handle = get_team_handle(&memory, &mut leader, Paradigm::OpenMp, None, 4, 0).unwrap();

        assert!(!memory.free_memory_type(&mut leader, MemoryType::Definitions));
        for _ in 0..64 {
            let addr = memory.alloc_for_misc(&mut other, 1024).unwrap();
            unsafe { std::ptr::write_bytes(addr.to_mut_ptr::<u8>(), 0xab, 1024) };
        }
        let team = team(&memory, handle);
        assert_eq!((team.num_threads, team.thread_num), (4, 0));

        // Locations without a team table give their definitions memory back.
        let mut gpu = Location::new(2, LocationType::Gpu, "gpu", None);
        memory.alloc_for_definitions(Some(&mut gpu), 100).unwrap();
        assert!(memory.free_memory_type(&mut gpu, MemoryType::Definitions));
        assert!(memory.free_memory_type(&mut leader, MemoryType::Misc));
    }

    #[test]
    fn handle_bit_width() {
        let memory = Memory::new(&options(1 << 20, 4096));
        assert_eq!(memory.definition_handles_bit_width(), 12 + 9);
    }

    #[test]
    #[should_panic]
    fn total_memory_below_page_size() {
        Memory::new(&options(1024, 4096));
    }
}
