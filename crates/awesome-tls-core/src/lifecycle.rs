//! Engine lifecycle coordination.
//!
//! The controller owns the one engine handle per process and publishes its
//! state through an atomic so request threads can inspect it without locking.
//! Start runs on a blocking background task; the host's registration path
//! never waits on the engine.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use crate::engine::{EngineLibrary, StartOutcome};

/// Observable engine state.
///
/// Transitions: `Unstarted -> Starting -> Running | Stopped | Failed`, and
/// `Running -> Stopped` at teardown. There is no restart; a failed or stopped
/// controller stays that way for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    Unstarted = 0,
    Starting = 1,
    Running = 2,
    Stopped = 3,
    Failed = 4,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => EngineState::Unstarted,
            1 => EngineState::Starting,
            2 => EngineState::Running,
            3 => EngineState::Stopped,
            _ => EngineState::Failed,
        }
    }
}

/// Callback asking the host to disable/unload the extension.
pub type OnDisableCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Coordinates engine start/stop with the host.
///
/// Cloning is cheap; all clones share the same state and engine handle.
#[derive(Clone)]
pub struct LifecycleController {
    engine: Arc<dyn EngineLibrary>,
    state: Arc<AtomicU8>,
    stop_pending: Arc<AtomicBool>,
    disable_fired: Arc<AtomicBool>,
    on_disable: Option<OnDisableCallback>,
}

impl std::fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleController")
            .field("state", &self.state())
            .field("on_disable", &self.on_disable.is_some())
            .finish()
    }
}

impl LifecycleController {
    /// Creates a controller around the given engine handle.
    pub fn new(engine: Arc<dyn EngineLibrary>) -> Self {
        Self {
            engine,
            state: Arc::new(AtomicU8::new(EngineState::Unstarted as u8)),
            stop_pending: Arc::new(AtomicBool::new(false)),
            disable_fired: Arc::new(AtomicBool::new(false)),
            on_disable: None,
        }
    }

    /// Sets the callback invoked (at most once) on a fatal condition.
    pub fn on_disable<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_disable = Some(Arc::new(callback));
        self
    }

    /// Returns the current engine state.
    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Runs the engine's liveness probe.
    pub fn smoke_test(&self) {
        self.engine.smoke_test();
    }

    /// Kicks off the engine start on a background blocking task.
    ///
    /// Only the first call does anything; the start call may block for the
    /// engine's lifetime, so it must never run on the host's registration
    /// path. Returns the task handle so tests (and teardown) can await
    /// completion; callers are free to drop it.
    pub fn spawn_start(
        &self,
        intercept_addr: &str,
        host_proxy_addr: &str,
        spoof_proxy_addr: &str,
    ) -> tokio::task::JoinHandle<()> {
        // Claim the one allowed start before spawning so a concurrent
        // teardown always observes at least `Starting`.
        if self
            .state
            .compare_exchange(
                EngineState::Unstarted as u8,
                EngineState::Starting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            tracing::warn!("engine start requested twice; ignoring");
            return tokio::task::spawn_blocking(|| {});
        }

        let this = self.clone();
        let intercept = intercept_addr.to_string();
        let host_proxy = host_proxy_addr.to_string();
        let spoof = spoof_proxy_addr.to_string();

        tokio::task::spawn_blocking(move || {
            tracing::info!("starting spoofing engine (intercept {intercept}, spoof {spoof})");
            let err = this.engine.start_server(&intercept, &host_proxy, &spoof);

            match StartOutcome::from_error_string(&err) {
                StartOutcome::Started => {
                    // A teardown that raced with startup must win: never
                    // overwrite its `Stopped`, and shut the engine back down
                    // now that it is actually reachable.
                    if this.stop_pending.load(Ordering::Acquire)
                        || !this.publish_from_starting(EngineState::Running)
                    {
                        let err = this.engine.stop_server();
                        if !err.is_empty() {
                            tracing::error!("engine stop after teardown failed: {err}");
                        }
                        this.publish_from_starting(EngineState::Stopped);
                        tracing::info!("spoofing engine stopped; teardown preceded startup");
                    } else {
                        tracing::info!("spoofing engine running");
                    }
                }
                StartOutcome::GracefulStop(message) => {
                    this.publish_from_starting(EngineState::Stopped);
                    tracing::info!("spoofing engine stopped during startup: {message}");
                }
                StartOutcome::Fatal(message) => {
                    if this.publish_from_starting(EngineState::Failed) {
                        this.request_disable(&message);
                    } else {
                        // Already torn down; a fatal start result no longer
                        // needs to disable anything.
                        tracing::info!("engine start failed after teardown: {message}");
                    }
                }
            }
        })
    }

    /// Stops the engine at extension unload.
    ///
    /// Best-effort: a stop error is logged and never blocks teardown. Stopping
    /// while startup is still in flight publishes `Stopped` immediately and
    /// leaves the engine shutdown to the start task, which honors the pending
    /// stop once its start call returns.
    pub fn stop(&self) {
        self.stop_pending.store(true, Ordering::Release);

        if self.publish_from_starting(EngineState::Stopped) {
            // Unblocks engines that block in their start call. An engine that
            // is not reachable yet reports that here; the start task retries
            // the stop once the engine registers.
            let err = self.engine.stop_server();
            if !err.is_empty() {
                tracing::debug!("engine stop during startup: {err}");
            }
            return;
        }

        if self
            .state
            .compare_exchange(
                EngineState::Running as u8,
                EngineState::Stopped as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            let err = self.engine.stop_server();
            if !err.is_empty() {
                tracing::error!("engine stop failed: {err}");
            }
            return;
        }

        tracing::debug!("skipping engine stop in state {:?}", self.state());
    }

    /// Records a fatal condition raised outside the start path (for example a
    /// rewrite failure) and asks the host to disable the extension.
    pub fn fail(&self, message: &str) {
        self.publish(EngineState::Failed);
        self.request_disable(message);
    }

    fn publish(&self, state: EngineState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Publishes a start outcome only if no other transition beat it to the
    /// state word. Returns whether the transition happened.
    fn publish_from_starting(&self, state: EngineState) -> bool {
        self.state
            .compare_exchange(
                EngineState::Starting as u8,
                state as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn request_disable(&self, message: &str) {
        tracing::error!("fatal: {message}");
        if self.disable_fired.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(callback) = &self.on_disable {
            callback(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    /// Engine stub returning a canned start result.
    struct StubEngine {
        start_result: &'static str,
        stop_result: &'static str,
        stop_calls: AtomicUsize,
    }

    impl StubEngine {
        fn new(start_result: &'static str) -> Self {
            Self {
                start_result,
                stop_result: "",
                stop_calls: AtomicUsize::new(0),
            }
        }
    }

    impl EngineLibrary for StubEngine {
        fn start_server(&self, _: &str, _: &str, _: &str) -> String {
            self.start_result.to_string()
        }

        fn stop_server(&self) -> String {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            self.stop_result.to_string()
        }

        fn smoke_test(&self) {}
    }

    fn counting_controller(
        engine: Arc<StubEngine>,
    ) -> (LifecycleController, Arc<AtomicUsize>) {
        let disables = Arc::new(AtomicUsize::new(0));
        let counter = disables.clone();
        let controller = LifecycleController::new(engine)
            .on_disable(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        (controller, disables)
    }

    #[tokio::test]
    async fn empty_result_reaches_running_without_disable() {
        let (controller, disables) = counting_controller(Arc::new(StubEngine::new("")));
        assert_eq!(controller.state(), EngineState::Unstarted);

        controller
            .spawn_start("127.0.0.1:8886", "127.0.0.1:8080", "127.0.0.1:8887")
            .await
            .unwrap();

        assert_eq!(controller.state(), EngineState::Running);
        assert_eq!(disables.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fatal_result_fails_and_disables_once() {
        let (controller, disables) = counting_controller(Arc::new(StubEngine::new("boom")));

        controller
            .spawn_start("127.0.0.1:8886", "127.0.0.1:8080", "127.0.0.1:8887")
            .await
            .unwrap();

        assert_eq!(controller.state(), EngineState::Failed);
        assert_eq!(disables.load(Ordering::SeqCst), 1);

        // A later fatal report must not fire the disable action again.
        controller.fail("another failure");
        assert_eq!(disables.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn graceful_stop_result_is_not_escalated() {
        let (controller, disables) =
            counting_controller(Arc::new(StubEngine::new("Server stopped by user")));

        controller
            .spawn_start("127.0.0.1:8886", "127.0.0.1:8080", "127.0.0.1:8887")
            .await
            .unwrap();

        assert_eq!(controller.state(), EngineState::Stopped);
        assert_eq!(disables.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn second_start_is_ignored() {
        let engine = Arc::new(StubEngine::new(""));
        let (controller, _) = counting_controller(engine);

        controller
            .spawn_start("127.0.0.1:8886", "127.0.0.1:8080", "127.0.0.1:8887")
            .await
            .unwrap();
        controller
            .spawn_start("127.0.0.1:8886", "127.0.0.1:8080", "127.0.0.1:8887")
            .await
            .unwrap();

        // Still running; the second start never reached the engine, which
        // would have flipped the state again.
        assert_eq!(controller.state(), EngineState::Running);
    }

    #[tokio::test]
    async fn stop_after_running_invokes_engine_once() {
        let engine = Arc::new(StubEngine::new(""));
        let (controller, _) = counting_controller(engine.clone());

        controller
            .spawn_start("127.0.0.1:8886", "127.0.0.1:8080", "127.0.0.1:8887")
            .await
            .unwrap();
        controller.stop();

        assert_eq!(controller.state(), EngineState::Stopped);
        assert_eq!(engine.stop_calls.load(Ordering::SeqCst), 1);

        // Stopping again is a no-op.
        controller.stop();
        assert_eq!(engine.stop_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_without_start_never_touches_engine() {
        let engine = Arc::new(StubEngine::new(""));
        let (controller, _) = counting_controller(engine.clone());

        controller.stop();

        assert_eq!(controller.state(), EngineState::Unstarted);
        assert_eq!(engine.stop_calls.load(Ordering::SeqCst), 0);
    }

    /// Engine stub whose start call takes a while to come back.
    struct SlowStartEngine {
        stop_calls: AtomicUsize,
    }

    impl EngineLibrary for SlowStartEngine {
        fn start_server(&self, _: &str, _: &str, _: &str) -> String {
            std::thread::sleep(std::time::Duration::from_millis(200));
            String::new()
        }

        fn stop_server(&self) -> String {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            String::new()
        }

        fn smoke_test(&self) {}
    }

    #[tokio::test]
    async fn stop_during_startup_wins_over_late_start() {
        let engine = Arc::new(SlowStartEngine {
            stop_calls: AtomicUsize::new(0),
        });
        let controller = LifecycleController::new(engine.clone());

        let start =
            controller.spawn_start("127.0.0.1:8886", "127.0.0.1:8080", "127.0.0.1:8887");
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(controller.state(), EngineState::Starting);

        controller.stop();
        assert_eq!(controller.state(), EngineState::Stopped);

        start.await.unwrap();

        // The late start completion must not resurrect the controller.
        assert_eq!(controller.state(), EngineState::Stopped);
        // Once from `stop` (before the engine was up) and once from the start
        // task honoring the pending stop.
        assert_eq!(engine.stop_calls.load(Ordering::SeqCst), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_during_process_startup_reaps_the_child() {
        use crate::engine::{fake_engine, ProcessEngine};

        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(
            ProcessEngine::new(fake_engine(&dir, "sleep 60"))
                .with_startup_grace(std::time::Duration::from_millis(200)),
        );
        let controller = LifecycleController::new(engine.clone());

        let start =
            controller.spawn_start("127.0.0.1:8886", "127.0.0.1:8080", "127.0.0.1:8887");
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        controller.stop();

        start.await.unwrap();

        assert_eq!(controller.state(), EngineState::Stopped);
        // The child registered after teardown began and was still shut down.
        assert_eq!(engine.stop_server(), "engine is not running");
    }
}
