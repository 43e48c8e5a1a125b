//! Fakes shared by the integration tests.
//!
//! Every fake writes what happens to it into a [`Recorder`] so tests can
//! assert exact event sequences across collaborators.

#![allow(dead_code)]

use std::io::{self, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tradeflow::build::{BuildInfo, BuildProvider};
use tradeflow::config::Configuration;
use tradeflow::device::{Device, DeviceOptions, DeviceRecovery, DeviceState};
use tradeflow::error::{BuildRetrievalError, InvocationError, InvocationResult};
use tradeflow::log::{ByteArraySource, InputStreamSource, LogLevel, LogOutput};
use tradeflow::preparer::{HostCleaner, TargetCleaner, TargetPreparer};
use tradeflow::result::{
    InvocationListener, LogDataType, LogFile, LogSaver, LogSaverListener, Metrics,
    TestIdentifier,
};
use tradeflow::scheduler::Rescheduler;
use tradeflow::testtype::{
    RemoteTest, ResumableTest, RetriableTest, RunContext, ShardableTest,
};

/// Shared, ordered event log.
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<String>>>);

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Events starting with `prefix`.
    pub fn matching(&self, prefix: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.matching(prefix).len()
    }
}

/// Source that keeps a handle on its data so tests can check release.
#[derive(Clone)]
pub struct SharedSource(pub Arc<ByteArraySource>);

impl SharedSource {
    pub fn new(data: &[u8]) -> Self {
        Self(Arc::new(ByteArraySource::new(data.to_vec())))
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}

impl InputStreamSource for SharedSource {
    fn create_input_stream(&self) -> io::Result<Box<dyn Read + Send>> {
        self.0.create_input_stream()
    }

    fn size(&self) -> usize {
        self.0.size()
    }

    fn cancel(&self) {
        self.0.cancel()
    }
}

pub struct FakeDevice {
    serial: String,
    pub events: Recorder,
    pub state: Mutex<DeviceState>,
    pub emulator: bool,
    pub logcat: SharedSource,
    pub emulator_log: SharedSource,
    pub bugreports: Mutex<Vec<SharedSource>>,
}

impl FakeDevice {
    pub fn new(serial: &str) -> Self {
        Self {
            serial: serial.to_string(),
            events: Recorder::new(),
            state: Mutex::new(DeviceState::Online),
            emulator: false,
            logcat: SharedSource::new(b"logcat"),
            emulator_log: SharedSource::new(b"emulator"),
            bugreports: Mutex::new(Vec::new()),
        }
    }

    pub fn emulator(serial: &str) -> Self {
        Self {
            emulator: true,
            ..Self::new(serial)
        }
    }
}

#[async_trait]
impl Device for FakeDevice {
    fn serial_number(&self) -> &str {
        &self.serial
    }

    async fn state(&self) -> DeviceState {
        *self.state.lock().unwrap()
    }

    fn is_emulator(&self) -> bool {
        self.emulator
    }

    async fn set_options(&self, options: &DeviceOptions) {
        self.events
            .push(format!("set_options(logcat={})", options.logcat_capture));
    }

    async fn set_recovery(&self, _recovery: Arc<dyn DeviceRecovery>) {
        self.events.push("set_recovery");
    }

    async fn clear_last_connected_wifi_network(&self) {
        self.events.push("clear_wifi");
    }

    async fn start_logcat(&self) {
        self.events.push("start_logcat");
    }

    async fn stop_logcat(&self) {
        self.events.push("stop_logcat");
    }

    async fn logcat(&self) -> Option<Box<dyn InputStreamSource>> {
        Some(Box::new(self.logcat.clone()))
    }

    async fn emulator_output(&self) -> Option<Box<dyn InputStreamSource>> {
        Some(Box::new(self.emulator_log.clone()))
    }

    async fn bugreport(&self) -> Box<dyn InputStreamSource> {
        self.events.push("bugreport");
        let source = SharedSource::new(b"bugreport");
        self.bugreports.lock().unwrap().push(source.clone());
        Box::new(source)
    }

    async fn battery_level(&self) -> InvocationResult<u8> {
        Ok(80)
    }
}

/// Build provider serving a fixed answer and recording bookkeeping calls.
pub struct FakeBuildProvider {
    answer: Result<Option<BuildInfo>, BuildRetrievalError>,
    recorder: Recorder,
    pub not_tested: Mutex<Vec<BuildInfo>>,
    pub cleaned: Mutex<Vec<BuildInfo>>,
}

impl FakeBuildProvider {
    pub fn new(build: BuildInfo, recorder: &Recorder) -> Self {
        Self::answering(Ok(Some(build)), recorder)
    }

    pub fn answering(
        answer: Result<Option<BuildInfo>, BuildRetrievalError>,
        recorder: &Recorder,
    ) -> Self {
        Self {
            answer,
            recorder: recorder.clone(),
            not_tested: Mutex::new(Vec::new()),
            cleaned: Mutex::new(Vec::new()),
        }
    }

    pub fn cleaned(&self) -> Vec<BuildInfo> {
        self.cleaned.lock().unwrap().clone()
    }

    pub fn not_tested(&self) -> Vec<BuildInfo> {
        self.not_tested.lock().unwrap().clone()
    }
}

#[async_trait]
impl BuildProvider for FakeBuildProvider {
    async fn get_build(
        &self,
        _device: &dyn Device,
    ) -> Result<Option<BuildInfo>, BuildRetrievalError> {
        self.answer.clone()
    }

    async fn build_not_tested(&self, build: &BuildInfo) {
        self.recorder
            .push(format!("build_not_tested({})", build.build_id));
        self.not_tested.lock().unwrap().push(build.clone());
    }

    async fn clean_up(&self, build: &BuildInfo) {
        self.recorder.push(format!("clean_up({})", build.build_id));
        self.cleaned.lock().unwrap().push(build.clone());
    }
}

/// Preparer with optional teardown and host cleanup.
pub struct FakePreparer {
    name: String,
    recorder: Recorder,
    pub setup_error: Option<InvocationError>,
    pub teardown_error: Option<InvocationError>,
    pub cleaner: bool,
    pub host_cleaner: bool,
}

impl FakePreparer {
    pub fn new(name: &str, recorder: &Recorder) -> Self {
        Self {
            name: name.to_string(),
            recorder: recorder.clone(),
            setup_error: None,
            teardown_error: None,
            cleaner: true,
            host_cleaner: false,
        }
    }

    pub fn failing_setup(mut self, error: InvocationError) -> Self {
        self.setup_error = Some(error);
        self
    }

    pub fn failing_teardown(mut self, error: InvocationError) -> Self {
        self.teardown_error = Some(error);
        self
    }

    pub fn without_cleaner(mut self) -> Self {
        self.cleaner = false;
        self
    }

    pub fn with_host_cleaner(mut self) -> Self {
        self.host_cleaner = true;
        self
    }
}

#[async_trait]
impl TargetPreparer for FakePreparer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn set_up(&self, _device: &dyn Device, build: &BuildInfo) -> InvocationResult<()> {
        self.recorder
            .push(format!("set_up({},{})", self.name, build.build_id));
        match &self.setup_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn as_cleaner(&self) -> Option<&dyn TargetCleaner> {
        self.cleaner.then_some(self as &dyn TargetCleaner)
    }

    fn as_host_cleaner(&self) -> Option<&dyn HostCleaner> {
        self.host_cleaner.then_some(self as &dyn HostCleaner)
    }
}

fn describe(error: Option<&InvocationError>) -> String {
    error.map_or_else(|| "none".to_string(), |e| e.to_string())
}

#[async_trait]
impl TargetCleaner for FakePreparer {
    async fn tear_down(
        &self,
        _device: &dyn Device,
        _build: &BuildInfo,
        error: Option<&InvocationError>,
    ) -> InvocationResult<()> {
        self.recorder
            .push(format!("tear_down({},{})", self.name, describe(error)));
        match &self.teardown_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl HostCleaner for FakePreparer {
    async fn clean_up(&self, build: &BuildInfo, error: Option<&InvocationError>) {
        self.recorder.push(format!(
            "host_clean_up({},{},{})",
            self.name,
            build.build_id,
            describe(error)
        ));
    }
}

/// Test reporting one passing test case per run, failing as configured.
pub struct FakeTest {
    name: String,
    recorder: Recorder,
    /// Errors returned by the first runs, in order. Later runs pass.
    pub failures: Mutex<Vec<InvocationError>>,
    pub delay: Duration,
    pub shards: Option<Vec<Arc<dyn RemoteTest>>>,
    pub resumable: Option<bool>,
    pub retriable: Option<bool>,
    pub wants_build: bool,
    pub wants_device: bool,
    pub seen_build: Mutex<Option<BuildInfo>>,
    pub seen_device: Mutex<Option<String>>,
    pub runs: AtomicUsize,
}

impl FakeTest {
    pub fn new(name: &str, recorder: &Recorder) -> Self {
        Self {
            name: name.to_string(),
            recorder: recorder.clone(),
            failures: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            shards: None,
            resumable: None,
            retriable: None,
            wants_build: false,
            wants_device: false,
            seen_build: Mutex::new(None),
            seen_device: Mutex::new(None),
            runs: AtomicUsize::new(0),
        }
    }

    pub fn failing(self, error: InvocationError) -> Self {
        self.failures.lock().unwrap().push(error);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_shards(mut self, shards: Vec<Arc<dyn RemoteTest>>) -> Self {
        self.shards = Some(shards);
        self
    }

    pub fn resumable(mut self, resumable: bool) -> Self {
        self.resumable = Some(resumable);
        self
    }

    pub fn retriable(mut self, retriable: bool) -> Self {
        self.retriable = Some(retriable);
        self
    }

    pub fn receiving_build(mut self) -> Self {
        self.wants_build = true;
        self
    }

    pub fn on_device(mut self) -> Self {
        self.wants_device = true;
        self
    }

    pub fn run_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteTest for FakeTest {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        ctx: &RunContext<'_>,
        listener: &dyn InvocationListener,
    ) -> InvocationResult<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.recorder.push(format!("run({})", self.name));
        *self.seen_build.lock().unwrap() = ctx.build().cloned();
        *self.seen_device.lock().unwrap() = ctx.device().map(|d| d.serial_number().to_string());
        if !self.delay.is_zero() {
            ctx.run_util().sleep(self.delay).await?;
        }

        let failure = {
            let mut failures = self.failures.lock().unwrap();
            (!failures.is_empty()).then(|| failures.remove(0))
        };
        if let Some(error) = failure {
            return Err(error);
        }

        let test = TestIdentifier::new(&self.name, "testPass");
        listener.test_run_started(&self.name, 1).await;
        listener.test_started(&test).await;
        listener.test_ended(&test, &Metrics::new()).await;
        listener
            .test_run_ended(Duration::from_millis(1), &Metrics::new())
            .await;
        Ok(())
    }

    fn receives_build(&self) -> bool {
        self.wants_build
    }

    fn requires_device(&self) -> bool {
        self.wants_device
    }

    fn as_shardable(&self) -> Option<&dyn ShardableTest> {
        self.shards.is_some().then_some(self as &dyn ShardableTest)
    }

    fn as_resumable(&self) -> Option<&dyn ResumableTest> {
        self.resumable.is_some().then_some(self as &dyn ResumableTest)
    }

    fn as_retriable(&self) -> Option<&dyn RetriableTest> {
        self.retriable.is_some().then_some(self as &dyn RetriableTest)
    }
}

impl ShardableTest for FakeTest {
    fn split(&self) -> Option<Vec<Arc<dyn RemoteTest>>> {
        self.shards.clone()
    }
}

impl ResumableTest for FakeTest {
    fn is_resumable(&self) -> bool {
        self.resumable.unwrap_or(false)
    }
}

impl RetriableTest for FakeTest {
    fn is_retriable(&self) -> bool {
        self.retriable.unwrap_or(false)
    }
}

/// Listener recording lifecycle events as `<name>:<event>`.
pub struct RecordingListener {
    name: String,
    recorder: Recorder,
    shard_aware: bool,
    clones: AtomicUsize,
    /// Elapsed times of every `invocation_ended`, shared with shard clones.
    pub elapsed: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingListener {
    pub fn new(name: &str, recorder: &Recorder) -> Self {
        Self {
            name: name.to_string(),
            recorder: recorder.clone(),
            shard_aware: false,
            clones: AtomicUsize::new(0),
            elapsed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn shard_aware(name: &str, recorder: &Recorder) -> Self {
        Self {
            shard_aware: true,
            ..Self::new(name, recorder)
        }
    }

    pub fn elapsed(&self) -> Vec<Duration> {
        self.elapsed.lock().unwrap().clone()
    }
}

#[async_trait]
impl InvocationListener for RecordingListener {
    async fn invocation_started(&self, build: &BuildInfo) {
        self.recorder
            .push(format!("{}:started({})", self.name, build.build_id));
    }

    async fn invocation_failed(&self, error: &InvocationError) {
        self.recorder
            .push(format!("{}:failed({})", self.name, error));
    }

    async fn test_log(&self, name: &str, _data_type: LogDataType, _source: &dyn InputStreamSource) {
        self.recorder.push(format!("{}:log({})", self.name, name));
    }

    async fn invocation_ended(&self, elapsed: Duration) {
        self.elapsed.lock().unwrap().push(elapsed);
        self.recorder.push(format!("{}:ended", self.name));
    }

    fn clone_for_shard(&self) -> Option<Arc<dyn InvocationListener>> {
        if !self.shard_aware {
            return None;
        }
        let index = self.clones.fetch_add(1, Ordering::SeqCst);
        Some(Arc::new(RecordingListener {
            elapsed: self.elapsed.clone(),
            ..RecordingListener::shard_aware(&format!("{}#{}", self.name, index), &self.recorder)
        }))
    }
}

/// Listener that wants saved log locations but is not shard-aware.
#[derive(Default)]
pub struct SavedLogListener {
    pub saver_set: AtomicUsize,
    pub saved: Mutex<Vec<String>>,
}

impl SavedLogListener {
    pub fn saved(&self) -> Vec<String> {
        self.saved.lock().unwrap().clone()
    }

    pub fn saver_set_count(&self) -> usize {
        self.saver_set.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InvocationListener for SavedLogListener {
    async fn invocation_started(&self, _build: &BuildInfo) {}

    async fn invocation_failed(&self, _error: &InvocationError) {}

    async fn test_log(&self, _name: &str, _data_type: LogDataType, _source: &dyn InputStreamSource) {}

    async fn invocation_ended(&self, _elapsed: Duration) {}

    fn as_log_saver_listener(&self) -> Option<&dyn LogSaverListener> {
        Some(self)
    }
}

#[async_trait]
impl LogSaverListener for SavedLogListener {
    fn set_log_saver(&self, _saver: Arc<dyn LogSaver>) {
        self.saver_set.fetch_add(1, Ordering::SeqCst);
    }

    async fn test_log_saved(
        &self,
        name: &str,
        _data_type: LogDataType,
        _source: &dyn InputStreamSource,
        _log_file: &LogFile,
    ) {
        self.saved.lock().unwrap().push(name.to_string());
    }
}

/// Log output whose `init` always fails.
#[derive(Default)]
pub struct BrokenLogOutput {
    pub closed: AtomicUsize,
}

impl LogOutput for BrokenLogOutput {
    fn init(&self) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
    }

    fn print_log(&self, _level: LogLevel, _tag: &str, _message: &str) {}

    fn log(&self) -> Box<dyn InputStreamSource> {
        Box::new(ByteArraySource::new(Vec::new()))
    }

    fn close_log(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn clone_output(&self) -> Arc<dyn LogOutput> {
        Arc::new(BrokenLogOutput::default())
    }
}

/// Saver remembering what it saved, without touching the disk.
#[derive(Default)]
pub struct MemoryLogSaver {
    pub saved: Mutex<Vec<(String, LogDataType)>>,
    pub started: AtomicUsize,
    pub ended: AtomicUsize,
}

impl MemoryLogSaver {
    pub fn saved_names(&self) -> Vec<String> {
        self.saved
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[async_trait]
impl LogSaver for MemoryLogSaver {
    async fn invocation_started(&self, _build: &BuildInfo) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    async fn save_log_data(
        &self,
        name: &str,
        data_type: LogDataType,
        _source: &dyn InputStreamSource,
    ) -> io::Result<LogFile> {
        self.saved
            .lock()
            .unwrap()
            .push((name.to_string(), data_type));
        Ok(LogFile::new(
            format!("/logs/{}", name),
            format!("file:///logs/{}", name),
        ))
    }

    async fn invocation_ended(&self, _elapsed: Duration) {
        self.ended.fetch_add(1, Ordering::SeqCst);
    }

    fn clone_saver(&self) -> Arc<dyn LogSaver> {
        Arc::new(MemoryLogSaver::default())
    }
}

/// Rescheduler keeping everything it is handed.
pub struct FakeRescheduler {
    accept: bool,
    pub scheduled: Mutex<Vec<Configuration>>,
    pub command_reschedules: AtomicUsize,
}

impl FakeRescheduler {
    pub fn accepting() -> Self {
        Self {
            accept: true,
            scheduled: Mutex::new(Vec::new()),
            command_reschedules: AtomicUsize::new(0),
        }
    }

    pub fn refusing() -> Self {
        Self {
            accept: false,
            ..Self::accepting()
        }
    }

    pub fn take_scheduled(&self) -> Vec<Configuration> {
        std::mem::take(&mut *self.scheduled.lock().unwrap())
    }

    pub fn scheduled_count(&self) -> usize {
        self.scheduled.lock().unwrap().len()
    }

    pub fn command_reschedules(&self) -> usize {
        self.command_reschedules.load(Ordering::SeqCst)
    }
}

impl Rescheduler for FakeRescheduler {
    fn schedule_config(&self, config: Configuration) -> bool {
        if self.accept {
            self.scheduled.lock().unwrap().push(config);
        }
        self.accept
    }

    fn reschedule_command(&self) -> bool {
        self.command_reschedules.fetch_add(1, Ordering::SeqCst);
        self.accept
    }
}

/// Configuration testing `build` with a [`MemoryLogSaver`].
pub fn config_for(provider: Arc<FakeBuildProvider>) -> (Configuration, Arc<MemoryLogSaver>) {
    let saver = Arc::new(MemoryLogSaver::default());
    (Configuration::new(provider, saver.clone()), saver)
}
