//! A bounded pool of worker threads that run commands concurrently.

use {
    std::{
        process::ExitStatus,
        sync::{mpsc, Arc, Condvar, Mutex},
        thread::JoinHandle,
    },
    walk_core::{CommandRequest, EngineContext, EngineError},
    walk_tracer::Tracer,
};

/// One command's outcome, as reported at a [`Concurrent::join`] barrier.
pub struct Completion
{
    /// The request that was run (or skipped).
    pub request: CommandRequest,

    /// The outcome: the exit status, or the engine error that prevented
    /// the command from being checked or run at all.
    pub result: Result<ExitStatus, EngineError>,
}

/// State shared between `submit`/`join`/`end` and every worker thread.
#[derive(Default)]
struct State
{
    /// Number of requests submitted but not yet completed by a worker.
    /// `join` blocks until this reaches zero.
    pending: usize,

    /// Completions not yet handed back by `join` or `end`.
    completions: Vec<Completion>,
}

/// A bounded pool of OS threads that run [`CommandRequest`]s submitted to
/// it, dequeuing in the order they were submitted but completing in
/// whatever order the commands themselves finish.
///
/// Errors are not raised as soon as a command fails; they accumulate in
/// each [`Completion`] until the next call to [`join`][Self::join] or
/// [`end`][Self::end], matching the "accumulate, don't abort" policy of
/// the rest of the engine. Callers that want fail-fast behavior can
/// inspect each `Completion` as it comes back from `join` and stop
/// submitting once one carries an error.
pub struct Concurrent
{
    sender: Option<mpsc::SyncSender<CommandRequest>>,
    state: Arc<Mutex<State>>,
    not_pending: Arc<Condvar>,
    workers: Vec<JoinHandle<()>>,
}

impl Concurrent
{
    /// Start a pool of `num_threads` worker threads, all sharing `ctx`
    /// and `tracer`.
    ///
    /// `tracer` must be `Sync` since every worker thread calls
    /// [`Tracer::spawn`] on it concurrently; the built-in tracers
    /// satisfy this (neither holds any interior-mutable state across a
    /// single `spawn` call other than the build-once shim cache, which
    /// is itself synchronized).
    pub fn new(num_threads: usize, ctx: Arc<EngineContext>, tracer: Arc<dyn Tracer + Send + Sync>) -> Self
    {
        assert!(num_threads > 0, "a pool needs at least one worker thread");

        // A rendezvous channel: `submit` blocks until a worker is free
        // to dequeue, which is what gives the pool its bound. Multiple
        // producers are not needed (only the owning thread submits),
        // but `SyncSender` is `Clone` so each worker gets its own
        // receiver handle via a shared `Mutex<Receiver<_>>` instead.
        let (sender, receiver) = mpsc::sync_channel(0);
        let receiver = Arc::new(Mutex::new(receiver));
        let state: Arc<Mutex<State>> = Arc::new(Mutex::new(State::default()));
        let not_pending = Arc::new(Condvar::new());

        let workers = (0 .. num_threads).map(|_| {
            let receiver = receiver.clone();
            let state = state.clone();
            let not_pending = not_pending.clone();
            let ctx = ctx.clone();
            let tracer = tracer.clone();

            std::thread::spawn(move || {
                loop {
                    let request = {
                        let receiver = receiver.lock().unwrap_or_else(|e| e.into_inner());
                        receiver.recv()
                    };
                    let Ok(request) = request else { break };

                    let result = crate::runner::run(&ctx, &*tracer, &request);

                    let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
                    state.completions.push(Completion{ request, result });
                    state.pending -= 1;
                    if state.pending == 0 {
                        not_pending.notify_all();
                    }
                }
            })
        }).collect();

        Self{ sender: Some(sender), state, not_pending, workers }
    }

    /// Submit a command to be run (or skipped) by the pool.
    ///
    /// Blocks until a worker thread is free to dequeue it — this is the
    /// pool's only back-pressure mechanism. Submission order is
    /// preserved for dequeuing, but since worker threads run
    /// independently, completion order is not.
    pub fn submit(&self, request: CommandRequest)
    {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.pending += 1;
        }

        let sender = self.sender.as_ref().expect("submit after end()");
        sender.send(request).expect("worker threads outlive the pool until end()");
    }

    /// Block until every command submitted before this call has
    /// completed, then return every completion observed since the last
    /// call to `join` (or since the pool was created).
    ///
    /// This is a barrier: new commands may be submitted again after it
    /// returns.
    pub fn join(&self) -> Vec<Completion>
    {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut state = self.not_pending.wait_while(state, |s| s.pending > 0)
            .unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut state.completions)
    }

    /// Stop accepting new work, wait for every worker thread to finish
    /// its current command, and return every completion not yet
    /// returned by [`join`][Self::join].
    pub fn end(mut self) -> Vec<Completion>
    {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        std::mem::take(&mut self.state.lock().unwrap_or_else(|e| e.into_inner()).completions)
    }
}
