use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::value::{Complex, Value};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

struct ChanState<T> {
    buffer: VecDeque<T>,
    closed: bool,
    sent: u64,
    taken: u64,
}

/// Blocking FIFO with Go channel semantics. A capacity of zero makes every
/// send wait until a receiver has taken the value.
pub struct Chan<T> {
    state: Mutex<ChanState<T>>,
    readers: Condvar,
    writers: Condvar,
    cap: usize,
}

impl<T> Chan<T> {
    pub fn new(cap: usize) -> Self {
        Self {
            state: Mutex::new(ChanState {
                buffer: VecDeque::new(),
                closed: false,
                sent: 0,
                taken: 0,
            }),
            readers: Condvar::new(),
            writers: Condvar::new(),
            cap,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChanState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn send(&self, value: T) -> RuntimeResult<()> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(RuntimeError::SendOnClosed);
            }
            let room = if self.cap == 0 {
                state.buffer.is_empty()
            } else {
                state.buffer.len() < self.cap
            };
            if room {
                break;
            }
            state = self.writers.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        state.buffer.push_back(value);
        state.sent += 1;
        let ticket = state.sent;
        self.readers.notify_all();
        if self.cap == 0 {
            while state.taken < ticket {
                if state.closed {
                    state.buffer.pop_back();
                    return Err(RuntimeError::SendOnClosed);
                }
                state = self.writers.wait(state).unwrap_or_else(PoisonError::into_inner);
            }
        }
        Ok(())
    }

    /// Waits for a value. Returns `None` once the channel is closed and drained.
    pub fn recv(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if let Some(value) = state.buffer.pop_front() {
                state.taken += 1;
                self.writers.notify_all();
                return Some(value);
            }
            if state.closed {
                return None;
            }
            state = self.readers.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn close(&self) -> RuntimeResult<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(RuntimeError::CloseOfClosed);
        }
        state.closed = true;
        self.readers.notify_all();
        self.writers.notify_all();
        Ok(())
    }

    pub fn len(&self) -> usize {
        if self.cap == 0 {
            return 0;
        }
        self.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

macro_rules! chan_variants {
    ($mac:ident) => {
        $mac! {
            Bool(bool),
            Int(i64),
            Int8(i8),
            Int16(i16),
            Int32(i32),
            Int64(i64),
            Uint(u64),
            Uint8(u8),
            Uint16(u16),
            Uint32(u32),
            Uint64(u64),
            Uintptr(u64),
            Float32(f32),
            Float64(f64),
            Complex64(Complex<f32>),
            Complex128(Complex<f64>),
            String(Arc<str>),
        }
    };
}

macro_rules! define_chan_value {
    ($($variant:ident($native:ty)),* $(,)?) => {
        /// Type-erased channel handle. Scalar element kinds keep their values
        /// unboxed; everything else travels as [`Value`].
        #[derive(Clone)]
        pub enum ChanValue {
            $($variant(Arc<Chan<$native>>),)*
            Generic(Arc<Chan<Value>>),
        }

        impl ChanValue {
            /// Sends through the erased handle, unwrapping scalar values to
            /// the channel's storage type.
            pub fn send_value(&self, value: Value) -> RuntimeResult<()> {
                match (self, value) {
                    $((ChanValue::$variant(chan), Value::$variant(v)) => chan.send(v),)*
                    (ChanValue::Generic(chan), value) => chan.send(value),
                    (chan, value) => Err(RuntimeError::mismatch(format!(
                        "cannot send {} on channel of {}",
                        value.describe(),
                        chan.storage_name()
                    ))),
                }
            }

            pub fn recv_value(&self) -> Option<Value> {
                match self {
                    $(ChanValue::$variant(chan) => chan.recv().map(Value::$variant),)*
                    ChanValue::Generic(chan) => chan.recv(),
                }
            }

            pub fn close(&self) -> RuntimeResult<()> {
                match self {
                    $(ChanValue::$variant(chan) => chan.close(),)*
                    ChanValue::Generic(chan) => chan.close(),
                }
            }

            pub fn len(&self) -> usize {
                match self {
                    $(ChanValue::$variant(chan) => chan.len(),)*
                    ChanValue::Generic(chan) => chan.len(),
                }
            }

            pub fn is_empty(&self) -> bool {
                self.len() == 0
            }

            pub fn cap(&self) -> usize {
                match self {
                    $(ChanValue::$variant(chan) => chan.cap(),)*
                    ChanValue::Generic(chan) => chan.cap(),
                }
            }

            /// Address of the shared channel, used for `==` and map keys.
            pub fn id(&self) -> usize {
                match self {
                    $(ChanValue::$variant(chan) => Arc::as_ptr(chan) as *const u8 as usize,)*
                    ChanValue::Generic(chan) => Arc::as_ptr(chan) as *const u8 as usize,
                }
            }

            fn storage_name(&self) -> &'static str {
                match self {
                    $(ChanValue::$variant(_) => stringify!($native),)*
                    ChanValue::Generic(_) => "Value",
                }
            }
        }
    };
}

chan_variants!(define_chan_value);

impl PartialEq for ChanValue {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl fmt::Debug for ChanValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chan({}, cap {})", self.storage_name(), self.cap())
    }
}

#[cfg(test)]
mod tests;
