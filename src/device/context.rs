use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use log::{info, trace, warn};
use rayon::{ThreadPool, ThreadPoolBuilder};

use super::Reservation;
use crate::{MlErr, Result, config::DeviceConfig};

/// A handle to a compute device.
///
/// Every buffer is bound to the device it was allocated on and every kernel runs inside the
/// device's own thread pool, so two devices never share workers nor memory accounting. Cloning
/// the handle is cheap and yields the same device.
#[derive(Clone)]
pub struct Device {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    pool: ThreadPool,
    capacity: Option<usize>,
    allocated: AtomicUsize,
}

impl Device {
    /// Creates a new `Device`.
    ///
    /// # Arguments
    /// * `config` - The device's configuration.
    ///
    /// # Returns
    /// A new `Device` instance or an error if the thread pool couldn't be built.
    pub fn new(config: &DeviceConfig) -> Result<Self> {
        let mut builder = ThreadPoolBuilder::new();

        if let Some(threads) = config.threads {
            builder = builder.num_threads(threads.get());
        }

        let name = config.name.clone();
        let thread_name = name.clone();
        let pool = builder
            .thread_name(move |i| format!("{thread_name}-{i}"))
            .build()
            .map_err(|e| MlErr::Device(e.to_string()))?;

        info!(
            device = name.as_str(),
            threads = pool.current_num_threads();
            "device ready"
        );

        let inner = Inner {
            name,
            pool,
            capacity: config.memory_limit,
            allocated: AtomicUsize::new(0),
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Creates a new `Device` with the default configuration.
    pub fn cpu() -> Result<Self> {
        Self::new(&DeviceConfig::default())
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the amount of workers kernels are spread over.
    pub fn threads(&self) -> usize {
        self.inner.pool.current_num_threads()
    }

    /// Returns the maximum amount of bytes this device can hold, if limited.
    pub fn capacity(&self) -> Option<usize> {
        self.inner.capacity
    }

    /// Returns the amount of bytes currently held by live buffers.
    pub fn allocated(&self) -> usize {
        self.inner.allocated.load(Ordering::Acquire)
    }

    /// Whether both handles refer to the same device.
    pub fn same(&self, other: &Device) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Reserves room for `len` elements on this device.
    ///
    /// # Returns
    /// A reservation that gives the bytes back when dropped, or `AllocationFailure` if the
    /// device's capacity would be exceeded or the size doesn't fit in memory at all.
    pub(crate) fn reserve(&self, len: usize) -> Result<Reservation> {
        let allocated = &self.inner.allocated;

        let Some(bytes) = len
            .checked_mul(size_of::<f32>())
            .filter(|&bytes| bytes <= isize::MAX as usize)
        else {
            let available = match self.inner.capacity {
                Some(capacity) => capacity.saturating_sub(self.allocated()),
                None => (isize::MAX as usize).saturating_sub(self.allocated()),
            };

            warn!(device = self.name(), elements = len; "allocation too large");
            return Err(MlErr::AllocationFailure {
                requested: len.saturating_mul(size_of::<f32>()),
                available,
            });
        };

        match self.inner.capacity {
            Some(capacity) => {
                let reserved =
                    allocated.fetch_update(Ordering::AcqRel, Ordering::Acquire, |curr| {
                        curr.checked_add(bytes).filter(|&total| total <= capacity)
                    });

                if let Err(curr) = reserved {
                    let available = capacity.saturating_sub(curr);
                    warn!(
                        device = self.name(),
                        requested = bytes,
                        available = available;
                        "allocation failure"
                    );

                    return Err(MlErr::AllocationFailure {
                        requested: bytes,
                        available,
                    });
                }
            }
            None => {
                allocated.fetch_add(bytes, Ordering::AcqRel);
            }
        }

        trace!(device = self.name(), bytes = bytes; "reserved");
        Ok(Reservation::new(self.clone(), bytes))
    }

    /// Gives back `bytes` previously reserved.
    pub(super) fn release(&self, bytes: usize) {
        self.inner.allocated.fetch_sub(bytes, Ordering::AcqRel);
    }

    /// Runs `op` on this device's workers, blocking until it finishes.
    pub(crate) fn run<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.inner.pool.install(op)
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.inner.name)
            .field("threads", &self.threads())
            .field("capacity", &self.inner.capacity)
            .field("allocated", &self.allocated())
            .finish()
    }
}
