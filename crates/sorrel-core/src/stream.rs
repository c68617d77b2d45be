use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::ast::Value;
use crate::error::SorrelError;
use crate::vm::Vm;

/// Receives values pushed through a `Publisher`. The VM is threaded
/// through delivery so reactive procedure bodies can execute while a
/// value is being handed over.
pub trait Subscriber: Send + Sync {
    fn on_next(&self, vm: &mut Vm, value: Value) -> Result<(), SorrelError>;
    fn on_complete(&self, vm: &mut Vm, result: Value) -> Result<(), SorrelError>;
}

/// Buffered signal: a value, or terminal completion with its payload.
enum Signal {
    Next(Value),
    Done(Value),
}

struct PublisherState {
    subscriber: Option<Arc<dyn Subscriber>>,
    closed: bool,
    tx: Sender<Signal>,
    rx: Receiver<Signal>,
}

static NEXT_PUBLISHER_ID: AtomicUsize = AtomicUsize::new(1);

/// Single-subscriber buffered broadcast channel. Values written before a
/// subscription arrive are buffered in FIFO order and flushed on
/// `subscribe`, followed by buffered completion; afterwards the channel
/// forwards directly. Subscribing twice is a precondition violation and
/// is reported rather than silently overwriting the first subscriber.
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<Mutex<PublisherState>>,
    id: usize,
}

impl Publisher {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            inner: Arc::new(Mutex::new(PublisherState {
                subscriber: None,
                closed: false,
                tx,
                rx,
            })),
            id: NEXT_PUBLISHER_ID.fetch_add(1, Ordering::SeqCst),
        }
    }

    pub fn write(&self, vm: &mut Vm, value: Value) -> Result<(), SorrelError> {
        let subscriber = {
            let state = self.inner.lock().unwrap();
            if state.closed {
                return Ok(());
            }
            match &state.subscriber {
                Some(s) => Some(s.clone()),
                None => {
                    let _ = state.tx.send(Signal::Next(value.clone()));
                    None
                }
            }
        };
        match subscriber {
            Some(s) => s.on_next(vm, value),
            None => Ok(()),
        }
    }

    /// Close the channel with a completion payload. The channel goes
    /// terminal on the first call; later writes and completions are
    /// dropped, so a subscriber observes completion at most once.
    pub fn done(&self, vm: &mut Vm, result: Value) -> Result<(), SorrelError> {
        let subscriber = {
            let mut state = self.inner.lock().unwrap();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            match &state.subscriber {
                Some(s) => Some(s.clone()),
                None => {
                    let _ = state.tx.send(Signal::Done(result.clone()));
                    None
                }
            }
        };
        match subscriber {
            Some(s) => s.on_complete(vm, result),
            None => Ok(()),
        }
    }

    pub fn subscribe(
        &self,
        vm: &mut Vm,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<(), SorrelError> {
        let buffered = {
            let mut state = self.inner.lock().unwrap();
            if state.subscriber.is_some() {
                return Err(SorrelError::runtime(
                    "publisher already has a subscriber",
                ));
            }
            state.subscriber = Some(subscriber.clone());
            let mut buffered = Vec::new();
            while let Ok(signal) = state.rx.try_recv() {
                buffered.push(signal);
            }
            buffered
        };
        // Buffered values are delivered first, buffered completion last.
        let mut completion = None;
        for signal in buffered {
            match signal {
                Signal::Next(value) => subscriber.on_next(vm, value)?,
                Signal::Done(result) => completion = Some(result),
            }
        }
        if let Some(result) = completion {
            subscriber.on_complete(vm, result)?;
        }
        Ok(())
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner.lock().unwrap().subscriber.is_some()
    }

    pub fn same_channel(&self, other: &Publisher) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Publisher#{}", self.id)
    }
}

type Watcher = Box<dyn FnOnce(&Result<Value, SorrelError>) + Send>;

struct CompletionInner {
    result: Option<Result<Value, SorrelError>>,
    watchers: Vec<Watcher>,
}

/// Resolve-once completion cell for an in-flight procedure; stands in for
/// the start-once future of a suspend handle. Watchers registered before
/// resolution fire at resolve time, in registration order.
#[derive(Clone)]
pub struct Completion {
    inner: Arc<Mutex<CompletionInner>>,
}

impl Completion {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(CompletionInner {
                result: None,
                watchers: Vec::new(),
            })),
        }
    }

    /// First resolution wins; later calls are ignored.
    pub fn resolve(&self, result: Result<Value, SorrelError>) {
        let watchers = {
            let mut inner = self.inner.lock().unwrap();
            if inner.result.is_some() {
                return;
            }
            inner.result = Some(result.clone());
            std::mem::take(&mut inner.watchers)
        };
        for watcher in watchers {
            watcher(&result);
        }
    }

    pub fn on_done<F>(&self, f: F)
    where
        F: FnOnce(&Result<Value, SorrelError>) + Send + 'static,
    {
        let result = {
            let mut inner = self.inner.lock().unwrap();
            match inner.result.clone() {
                Some(result) => result,
                None => {
                    inner.watchers.push(Box::new(f));
                    return;
                }
            }
        };
        f(&result);
    }

    pub fn is_done(&self) -> bool {
        self.inner.lock().unwrap().result.is_some()
    }

    pub fn result(&self) -> Option<Result<Value, SorrelError>> {
        self.inner.lock().unwrap().result.clone()
    }

    /// Resolve `target` once both `a` and `b` have resolved; the first
    /// error wins, otherwise the join resolves empty.
    pub fn join_into(a: &Completion, b: &Completion, target: Completion) {
        struct JoinState {
            pending: usize,
            error: Option<SorrelError>,
        }
        let state = Arc::new(Mutex::new(JoinState {
            pending: 2,
            error: None,
        }));
        for side in [a, b] {
            let state = state.clone();
            let target = target.clone();
            side.on_done(move |result| {
                let mut guard = state.lock().unwrap();
                if let Err(err) = result {
                    if guard.error.is_none() {
                        guard.error = Some(err.clone());
                    }
                }
                guard.pending -= 1;
                if guard.pending == 0 {
                    let error = guard.error.take();
                    drop(guard);
                    target.resolve(match error {
                        Some(err) => Err(err),
                        None => Ok(Value::None),
                    });
                }
            });
        }
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.result() {
            None => write!(f, "Completion(pending)"),
            Some(Ok(v)) => write!(f, "Completion(ok: {})", v),
            Some(Err(e)) => write!(f, "Completion(err: {})", e),
        }
    }
}

/// The suspended computation behind a streaming procedure: a start-once
/// resume thunk plus an output channel, and an input channel when the
/// procedure declared `/in`.
pub type ResumeFn = Box<dyn FnOnce(&mut Vm, &Completion) -> Result<(), SorrelError> + Send>;

enum ResumeState {
    Ready(ResumeFn),
    Started(Completion),
}

#[derive(Clone)]
pub struct SuspendHandle {
    state: Arc<Mutex<ResumeState>>,
    out: Publisher,
    input: Option<Publisher>,
}

impl SuspendHandle {
    pub fn new(out: Publisher, input: Option<Publisher>, resume: ResumeFn) -> Self {
        Self {
            state: Arc::new(Mutex::new(ResumeState::Ready(resume))),
            out,
            input,
        }
    }

    pub fn out(&self) -> &Publisher {
        &self.out
    }

    pub fn input(&self) -> Option<&Publisher> {
        self.input.as_ref()
    }

    /// Drive the computation. The first call consumes the resume thunk and
    /// replaces it with the pending completion; later calls return that
    /// completion unchanged. Errors raised by the thunk resolve the
    /// completion rather than propagating to the starter.
    pub fn start(&self, vm: &mut Vm) -> Completion {
        let completion = Completion::new();
        let thunk = {
            let mut state = self.state.lock().unwrap();
            match &*state {
                ResumeState::Started(existing) => return existing.clone(),
                ResumeState::Ready(_) => {
                    match std::mem::replace(&mut *state, ResumeState::Started(completion.clone()))
                    {
                        ResumeState::Ready(thunk) => thunk,
                        ResumeState::Started(_) => unreachable!(),
                    }
                }
            }
        };
        if let Err(err) = thunk(vm, &completion) {
            completion.resolve(Err(err));
        }
        completion
    }

    pub fn completion(&self) -> Option<Completion> {
        match &*self.state.lock().unwrap() {
            ResumeState::Started(completion) => Some(completion.clone()),
            ResumeState::Ready(_) => None,
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(&*self.state.lock().unwrap(), ResumeState::Started(_))
    }

    pub fn same_handle(&self, other: &SuspendHandle) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl fmt::Debug for SuspendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SuspendHandle {{ started: {}, out: {:?}, input: {:?} }}",
            self.is_started(),
            self.out,
            self.input
        )
    }
}

struct ForwardSubscriber {
    target: Publisher,
}

impl Subscriber for ForwardSubscriber {
    fn on_next(&self, vm: &mut Vm, value: Value) -> Result<(), SorrelError> {
        self.target.write(vm, value)
    }

    fn on_complete(&self, vm: &mut Vm, result: Value) -> Result<(), SorrelError> {
        self.target.done(vm, result)
    }
}

/// Compose two suspend handles: every value emitted by `left` is written
/// into `right`'s input channel and `left`'s completion closes it. The
/// combined handle starts both sides, joins their completions, and
/// exposes `right`'s output and `left`'s input for further composition.
pub fn pipe(
    vm: &mut Vm,
    left: SuspendHandle,
    right: SuspendHandle,
) -> Result<SuspendHandle, SorrelError> {
    let Some(input) = right.input() else {
        return Err(SorrelError::NoInputChannel);
    };
    left.out().subscribe(
        vm,
        Arc::new(ForwardSubscriber {
            target: input.clone(),
        }),
    )?;

    let combined_out = right.out().clone();
    let combined_in = left.input().cloned();
    let resume: ResumeFn = Box::new(move |vm, completion| {
        let left_done = left.start(vm);
        let right_done = right.start(vm);
        Completion::join_into(&left_done, &right_done, completion.clone());
        Ok(())
    });
    Ok(SuspendHandle::new(combined_out, combined_in, resume))
}

struct CollectSubscriber {
    values: Arc<Mutex<Vec<Value>>>,
    folded: Completion,
}

impl Subscriber for CollectSubscriber {
    fn on_next(&self, _vm: &mut Vm, value: Value) -> Result<(), SorrelError> {
        self.values.lock().unwrap().push(value);
        Ok(())
    }

    fn on_complete(&self, _vm: &mut Vm, result: Value) -> Result<(), SorrelError> {
        let mut values = self.values.lock().unwrap();
        let folded = match values.len() {
            0 => result,
            1 => values.pop().unwrap(),
            _ => Value::List(values.drain(..).collect()),
        };
        self.folded.resolve(Ok(folded));
        Ok(())
    }
}

/// Resolve a possibly-streaming result to a plain value: drain the
/// suspend's output channel and fold it (no outputs → the completion
/// payload, one output → that value, several → a list). Non-suspend
/// values pass through unchanged.
pub fn collect_result(vm: &mut Vm, value: Value) -> Result<Value, SorrelError> {
    let Value::Suspend(handle) = value else {
        return Ok(value);
    };
    let folded = Completion::new();
    handle.out().subscribe(
        vm,
        Arc::new(CollectSubscriber {
            values: Arc::new(Mutex::new(Vec::new())),
            folded: folded.clone(),
        }),
    )?;
    let completion = handle.start(vm);
    if let Some(result) = folded.result() {
        return result;
    }
    match completion.result() {
        Some(Err(err)) => Err(err),
        Some(Ok(value)) => Ok(value),
        None => Err(SorrelError::runtime(
            "suspended procedure did not complete",
        )),
    }
}
