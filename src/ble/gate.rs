//! Single-slot operation gate
//!
//! At most one GATT operation may be pending per session. A caller claims the
//! slot with [`OperationGate::begin_operation`], issues the stack request with
//! the lock released, then blocks in [`OperationGuard::await_completion`] until
//! the dispatcher resolves the slot or the deadline passes. Dropping the guard
//! frees the slot on every exit path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::gatt::{GattCharacteristic, GattDescriptor};
use super::stack::GattLink;
use super::status::{ConnectionState, ErrorKind, OpResult};

/// Kind of the operation currently holding the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingOperation {
    #[default]
    None = 0,
    Connect = 1,
    DiscoverServices = 2,
    ReadCharacteristic = 3,
    WriteCharacteristic = 4,
    ReadDescriptor = 5,
    WriteDescriptor = 6,
    CharacteristicChanged = 7,
    ReliableWriteCompleted = 8,
    ReadRemoteRssi = 9,
    MtuChanged = 10,
}

/// Everything guarded by the gate's lock
#[derive(Default)]
pub(crate) struct SessionState {
    pub pending: PendingOperation,
    pub completed: bool,
    pub error: ErrorKind,
    pub extended_error: i32,
    pub state: ConnectionState,
    pub last_characteristic: Option<GattCharacteristic>,
    pub last_descriptor: Option<GattDescriptor>,
    pub rssi: i32,
    pub mtu: u16,
    pub link: Option<Arc<dyn GattLink>>,
    /// Set when the dispatcher tore the link down on a remote disconnect
    pub force_closed: bool,
}

impl SessionState {
    fn snapshot(&self) -> OpResult {
        OpResult {
            state: self.state,
            error: self.error,
            extended: self.extended_error,
        }
    }

    /// Clear per-operation results, keeping state bits and the link
    pub fn clear_results(&mut self) {
        self.pending = PendingOperation::None;
        self.completed = false;
        self.error = ErrorKind::Ok;
        self.extended_error = 0;
        self.last_characteristic = None;
        self.last_descriptor = None;
        self.rssi = 0;
    }
}

/// Mutex + condition variable rendezvous between the executor and the dispatcher
#[derive(Default)]
pub struct OperationGate {
    inner: Mutex<SessionState>,
    signal: Condvar,
}

impl OperationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `kind`. Fails immediately if another operation is pending.
    pub fn begin_operation(&self, kind: PendingOperation) -> Option<OperationGuard<'_>> {
        let mut st = self.inner.lock();
        if st.pending != PendingOperation::None {
            link_debug!("⛔ Gate busy with {:?}, refusing {:?}", st.pending, kind);
            return None;
        }
        st.pending = kind;
        st.completed = false;
        st.error = ErrorKind::Ok;
        Some(OperationGuard { gate: self, kind })
    }

    pub fn pending(&self) -> PendingOperation {
        self.inner.lock().pending
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn link(&self) -> Option<Arc<dyn GattLink>> {
        self.inner.lock().link.clone()
    }

    /// Run `f` with the lock held
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut st = self.inner.lock();
        f(&mut st)
    }

    /// Resolve the pending operation if it is `kind` and not yet completed.
    /// Returns false when the event is unsolicited.
    pub(crate) fn complete(&self, kind: PendingOperation, f: impl FnOnce(&mut SessionState)) -> bool {
        let mut st = self.inner.lock();
        if st.pending != kind || st.completed {
            return false;
        }
        f(&mut st);
        st.completed = true;
        self.signal.notify_all();
        true
    }
}

/// Holds the gate slot for one operation
pub struct OperationGuard<'a> {
    gate: &'a OperationGate,
    kind: PendingOperation,
}

impl OperationGuard<'_> {
    pub fn kind(&self) -> PendingOperation {
        self.kind
    }

    /// Block until the dispatcher completes the operation or `timeout` elapses.
    /// A missing callback is recorded as FAIL|TIMEOUT.
    pub fn await_completion(self, timeout: Duration) -> OpResult {
        let deadline = Instant::now() + timeout;
        let mut st = self.gate.inner.lock();
        while !st.completed {
            if self.gate.signal.wait_until(&mut st, deadline).timed_out() && !st.completed {
                link_warn!("⏱️ {:?} timed out after {:?}", self.kind, timeout);
                st.error = ErrorKind::Timeout;
                break;
            }
        }
        st.snapshot()
    }

    /// The stack refused the request synchronously
    pub fn reject(self) -> OpResult {
        let mut st = self.gate.inner.lock();
        link_debug!("🚫 Stack rejected {:?}", self.kind);
        st.error = ErrorKind::Fail;
        st.snapshot()
    }

    /// Finish without waiting, reporting success with the current state
    pub fn finish(self) -> OpResult {
        let st = self.gate.inner.lock();
        OpResult {
            state: st.state,
            error: ErrorKind::Ok,
            extended: st.extended_error,
        }
    }
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        let mut st = self.gate.inner.lock();
        if st.pending == self.kind {
            st.pending = PendingOperation::None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_second_begin_is_refused() {
        let gate = OperationGate::new();
        let guard = gate.begin_operation(PendingOperation::ReadCharacteristic).unwrap();
        assert!(gate.begin_operation(PendingOperation::WriteCharacteristic).is_none());
        drop(guard);
        assert_eq!(gate.pending(), PendingOperation::None);
        assert!(gate.begin_operation(PendingOperation::WriteCharacteristic).is_some());
    }

    #[test]
    fn test_timeout_records_fail_timeout() {
        let gate = OperationGate::new();
        let started = Instant::now();
        let result = gate
            .begin_operation(PendingOperation::DiscoverServices)
            .unwrap()
            .await_completion(Duration::from_millis(50));
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(result.error, ErrorKind::Timeout);
        assert_eq!(gate.pending(), PendingOperation::None);
    }

    #[test]
    fn test_completion_from_other_thread() {
        let gate = Arc::new(OperationGate::new());
        let guard = gate.begin_operation(PendingOperation::Connect).unwrap();

        let remote = Arc::clone(&gate);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            // wrong kind never resolves the wait
            assert!(!remote.complete(PendingOperation::ReadDescriptor, |_| {}));
            assert!(remote.complete(PendingOperation::Connect, |st| {
                st.state = ConnectionState::CONNECTED;
            }));
            // second completion of the same operation is ignored
            assert!(!remote.complete(PendingOperation::Connect, |st| {
                st.error = ErrorKind::Fail;
            }));
        });

        let result = guard.await_completion(Duration::from_secs(2));
        handle.join().unwrap();
        assert_eq!(result.error, ErrorKind::Ok);
        assert_eq!(result.state, ConnectionState::CONNECTED);
    }
}
