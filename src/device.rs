//! Software device with a single in-order command stream
//!
//! Commands are enqueued asynchronously and drained by one stream thread,
//! which fans every command out over the device's pool of execution units.
//! Nothing enqueued is guaranteed to be finished until [Device::synchronize]
//! returns.

use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use crate::error::*;

type Command = Box<dyn FnOnce(&ThreadPool) + Send + 'static>;

static NEXT_DEVICE_ID: AtomicUsize = AtomicUsize::new(0);

/// Device-resident `f32` storage of fixed length
///
/// Cloning shares the storage, it does not copy it.
#[derive(Clone)]
pub struct DeviceBuffer {
    data: Arc<RwLock<Vec<f32>>>,
    len: usize,
    device_id: usize,
}

impl DeviceBuffer {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True when both handles point to the same storage
    pub fn same_storage(&self, other: &DeviceBuffer) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    // Inputs may be read twice by one command (`A + A`)
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Vec<f32>> {
        self.data.read_recursive()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Vec<f32>> {
        self.data.write()
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("len", &self.len)
            .field("device_id", &self.device_id)
            .finish()
    }
}

#[derive(Default)]
struct StreamState {
    pending: Mutex<usize>,
    idle: Condvar,
    fault: Mutex<Option<String>>,
}

impl StreamState {
    fn finish_one(&self) {
        let mut pending = self.pending.lock();
        *pending -= 1;
        if *pending == 0 {
            self.idle.notify_all();
        }
    }
}

pub struct Device {
    id: usize,
    ordinal: usize,
    num_units: usize,
    state: Arc<StreamState>,
    sender: Mutex<Option<mpsc::Sender<Command>>>,
    worker: Option<JoinHandle<()>>,
}

impl Device {
    /// Open the device with one execution unit per available CPU
    pub fn new(ordinal: usize) -> Result<Self> {
        Self::with_threads(ordinal, None)
    }

    /// Open the device with a fixed number of execution units
    pub fn with_threads(ordinal: usize, threads: Option<usize>) -> Result<Self> {
        let mut builder =
            ThreadPoolBuilder::new().thread_name(move |i| format!("add2-dev{}-unit{}", ordinal, i));
        if let Some(threads) = threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder.build().map_err(|e| Add2Error::DeviceInit {
            ordinal,
            message: e.to_string(),
        })?;
        let num_units = pool.current_num_threads();

        let state = Arc::new(StreamState::default());
        let (sender, receiver) = mpsc::channel::<Command>();
        let worker_state = Arc::clone(&state);
        let worker = thread::Builder::new()
            .name(format!("add2-dev{}-stream", ordinal))
            .spawn(move || stream_loop(ordinal, pool, receiver, worker_state))
            .map_err(|e| Add2Error::DeviceInit {
                ordinal,
                message: e.to_string(),
            })?;

        info!("Device {} ready with {} execution units", ordinal, num_units);
        Ok(Device {
            id: NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed),
            ordinal,
            num_units,
            state,
            sender: Mutex::new(Some(sender)),
            worker: Some(worker),
        })
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn num_units(&self) -> usize {
        self.num_units
    }

    /// Allocate `len` elements set to `value`
    pub fn alloc_filled(&self, len: usize, value: f32) -> Result<DeviceBuffer> {
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| Add2Error::Allocation {
                ordinal: self.ordinal,
                len,
            })?;
        data.resize(len, value);
        Ok(self.wrap(data))
    }

    pub fn alloc_zeros(&self, len: usize) -> Result<DeviceBuffer> {
        self.alloc_filled(len, 0.0)
    }

    /// Allocate without meaningful contents
    ///
    /// Elements are poisoned with NaN, so a cell no kernel has written never
    /// compares equal to anything.
    pub fn alloc_empty(&self, len: usize) -> Result<DeviceBuffer> {
        self.alloc_filled(len, ::std::f32::NAN)
    }

    /// Move host data onto the device
    pub fn htod_copy(&self, host: Vec<f32>) -> Result<DeviceBuffer> {
        Ok(self.wrap(host))
    }

    pub fn htod_sync_copy(&self, host: &[f32]) -> Result<DeviceBuffer> {
        let buf = self.alloc_zeros(host.len())?;
        buf.write().copy_from_slice(host);
        Ok(buf)
    }

    /// Copy a buffer back to the host after all enqueued work has finished
    pub fn dtoh(&self, buf: &DeviceBuffer) -> Result<Vec<f32>> {
        self.check_owner(buf, Step::Sync, "buffer")?;
        self.synchronize()?;
        Ok(buf.read().clone())
    }

    /// Block until every previously enqueued command has completed
    pub fn synchronize(&self) -> Result<()> {
        let mut pending = self.state.pending.lock();
        while *pending > 0 {
            self.state.idle.wait(&mut pending);
        }
        drop(pending);
        self.check_fault()
    }

    /// Enqueue a command on the stream and return without waiting
    ///
    /// A panic inside `command` faults the device.
    pub fn submit<F>(&self, command: F) -> Result<()>
    where
        F: FnOnce(&ThreadPool) + Send + 'static,
    {
        self.check_fault()?;
        let sender = self.sender.lock();
        let sender = match sender.as_ref() {
            Some(sender) => sender,
            None => return Err(self.fault_error("command stream is closed")),
        };
        *self.state.pending.lock() += 1;
        if sender.send(Box::new(command)).is_err() {
            self.state.finish_one();
            return Err(self.fault_error("stream worker has exited"));
        }
        Ok(())
    }

    /// Native element-wise addition, allocating its output like `a + b`
    pub fn add(&self, a: &DeviceBuffer, b: &DeviceBuffer) -> Result<DeviceBuffer> {
        self.check_owner(a, Step::Reference, "A")?;
        self.check_owner(b, Step::Reference, "B")?;
        if a.len() != b.len() {
            return Err(precondition(
                Step::Reference,
                format!("cannot add buffers of length {} and {}", a.len(), b.len()),
            ));
        }
        // Storage is materialized by the command itself, on the stream
        let out = self.unmaterialized(a.len());
        let (a, b, c) = (a.clone(), b.clone(), out.clone());
        self.submit(move |pool| {
            let (a, b) = (a.read(), b.read());
            let (a, b) = (&a[..], &b[..]);
            let sum: Vec<f32> = pool.install(|| {
                a.par_iter()
                    .zip(b.par_iter())
                    .with_min_len(4096)
                    .map(|(a, b)| a + b)
                    .collect()
            });
            *c.write() = sum;
        })?;
        Ok(out)
    }

    pub(crate) fn check_owner(&self, buf: &DeviceBuffer, step: Step, name: &str) -> Result<()> {
        if buf.device_id != self.id {
            return Err(precondition(
                step,
                format!("{} is not allocated on device {}", name, self.ordinal),
            ));
        }
        Ok(())
    }

    fn check_fault(&self) -> Result<()> {
        match self.state.fault.lock().as_ref() {
            Some(message) => Err(self.fault_error(message)),
            None => Ok(()),
        }
    }

    fn fault_error(&self, message: &str) -> Add2Error {
        Add2Error::DeviceFault {
            ordinal: self.ordinal,
            message: message.to_owned(),
        }
    }

    fn unmaterialized(&self, len: usize) -> DeviceBuffer {
        DeviceBuffer {
            len,
            data: Arc::new(RwLock::new(Vec::new())),
            device_id: self.id,
        }
    }

    fn wrap(&self, data: Vec<f32>) -> DeviceBuffer {
        DeviceBuffer {
            len: data.len(),
            data: Arc::new(RwLock::new(data)),
            device_id: self.id,
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        // Closing the channel lets the stream drain what is left and exit
        self.sender.lock().take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Stream worker of device {} panicked", self.ordinal);
            }
        }
    }
}

fn stream_loop(
    ordinal: usize,
    pool: ThreadPool,
    receiver: mpsc::Receiver<Command>,
    state: Arc<StreamState>,
) {
    for command in receiver {
        let faulted = state.fault.lock().is_some();
        if !faulted {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| command(&pool))) {
                let message = panic_message(&*payload);
                error!("Device {} faulted: {}", ordinal, message);
                *state.fault.lock() = Some(message);
            }
        }
        state.finish_one();
    }
    debug!("Stream of device {} closed", ordinal);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
