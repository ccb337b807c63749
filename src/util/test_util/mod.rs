use crate::ipc::Ipc;
use std::cell::{Cell, RefCell};
use std::panic;
use std::rc::Rc;
use std::sync::Mutex;

lazy_static! {
    // A global lock to make tests serial.
    // If we do want more parallelism, we can allow each set of tests to have their own locks. But it seems unnecessary for now.
    static ref SERIAL_TEST_LOCK: Mutex<()> = Mutex::default();
}

// force some tests to be executed serially
pub fn serial_test<F>(f: F)
where
    F: FnOnce(),
{
    // If one test fails, the lock will become poisoned. We would want to continue for other tests anyway.
    let _guard = SERIAL_TEST_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    f();
}

// Always execute a cleanup closure no matter the test panics or not.
pub fn with_cleanup<T, C>(test: T, cleanup: C)
where
    T: FnOnce() + panic::UnwindSafe,
    C: FnOnce(),
{
    let res = panic::catch_unwind(test);
    cleanup();
    if let Err(e) = res {
        panic::resume_unwind(e);
    }
}

/// Shared state of all ranks of one [`SequentialCollectives`] world.
#[derive(Default)]
struct World {
    /// Contributions to the current exclusive scan, in rank order.
    scan_values: RefCell<Vec<u32>>,
}

/// A fake multi-process world inside one test.
///
/// Each rank gets its own handle. The test drives the ranks one after another in rank order,
/// so every collective only depends on the contributions of lower ranks, which have already
/// been made. That is exactly what an exclusive scan needs.
pub struct SequentialCollectives {
    rank: u32,
    size: u32,
    world: Rc<World>,
    /// How many scans this rank has taken part in.
    scans: Cell<usize>,
}

impl SequentialCollectives {
    /// One handle per rank of a world with `size` ranks.
    pub fn world(size: u32) -> Vec<SequentialCollectives> {
        let world = Rc::new(World::default());
        (0..size)
            .map(|rank| SequentialCollectives {
                rank,
                size,
                world: world.clone(),
                scans: Cell::new(0),
            })
            .collect()
    }
}

impl Ipc for SequentialCollectives {
    fn rank(&self) -> u32 {
        self.rank
    }

    fn size(&self) -> u32 {
        self.size
    }

    fn exclusive_scan_sum(&self, value: u32) -> u32 {
        let round = self.scans.get();
        self.scans.set(round + 1);
        let mut values = self.world.scan_values.borrow_mut();
        // Rank 0 opens a new round.
        if self.rank == 0 {
            values.clear();
        }
        assert_eq!(
            values.len(),
            self.rank as usize,
            "rank {} joined scan round {} out of order",
            self.rank,
            round
        );
        let prefix = values.iter().sum();
        values.push(value);
        prefix
    }
}
