use super::capture::CaptureControl;
use crate::buffer::{BatchBuffer, FlushScheduler};
use crate::domain::{
    AgentEvent, LifecycleSignal, Message, PageLifecycle, PageState, Record, SharedSessionContext,
};
use crate::segment::SegmentBuilder;
use crate::sender::FlushReason;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

/// A batch buffer and the timer that bounds how long its content may wait.
struct BatchSlot {
    buffer: BatchBuffer,
    scheduler: FlushScheduler,
}

impl BatchSlot {
    fn insert(&mut self, now: Instant, insert: impl FnOnce(&mut BatchBuffer) -> bool) {
        let flushes = self.buffer.flush_count();
        insert(&mut self.buffer);
        if self.buffer.flush_count() != flushes {
            self.scheduler.cancel();
        }
        if !self.buffer.is_empty() {
            self.scheduler.on_add(now);
        }
    }

    fn fire(&mut self, now: Instant) {
        if self.scheduler.poll(now) {
            self.buffer.flush(FlushReason::Timeout);
        }
    }

    fn flush_on_lifecycle(&mut self, reason: FlushReason) {
        self.scheduler.on_lifecycle();
        self.buffer.flush(reason);
    }
}

struct ReplaySlot {
    builder: SegmentBuilder,
    scheduler: FlushScheduler,
}

impl ReplaySlot {
    /// Keeps the duration timer consistent with what the builder holds after
    /// an operation that may have flushed.
    fn settle(&mut self, flushes: u64, now: Instant) {
        if self.builder.flush_count() != flushes {
            self.scheduler.cancel();
        }
        if self.builder.is_empty() {
            self.scheduler.cancel();
        } else {
            self.scheduler.on_add(now);
        }
    }
}

/// Owns every buffer of one page for its whole lifetime and drives them from
/// a single ordered event stream.
pub struct PageController {
    page: PageState,
    context: SharedSessionContext,
    capture: Arc<dyn CaptureControl>,
    logs: Option<BatchSlot>,
    rum: Option<BatchSlot>,
    replay: Option<ReplaySlot>,
}

impl PageController {
    pub fn new(page: PageState, context: SharedSessionContext, capture: Arc<dyn CaptureControl>) -> Self {
        Self {
            page,
            context,
            capture,
            logs: None,
            rum: None,
            replay: None,
        }
    }

    pub fn with_logs(mut self, buffer: BatchBuffer, flush_timeout: Duration) -> Self {
        self.logs = Some(BatchSlot {
            buffer,
            scheduler: FlushScheduler::new(flush_timeout),
        });
        self
    }

    pub fn with_rum(mut self, buffer: BatchBuffer, flush_timeout: Duration) -> Self {
        self.rum = Some(BatchSlot {
            buffer,
            scheduler: FlushScheduler::new(flush_timeout),
        });
        self
    }

    pub fn with_replay(mut self, builder: SegmentBuilder, max_segment_duration: Duration) -> Self {
        self.replay = Some(ReplaySlot {
            builder,
            scheduler: FlushScheduler::new(max_segment_duration),
        });
        self
    }

    pub fn page(&self) -> &PageState {
        &self.page
    }

    pub fn context(&self) -> &SharedSessionContext {
        &self.context
    }

    pub fn buffered_logs(&self) -> usize {
        self.logs.as_ref().map_or(0, |slot| slot.buffer.len())
    }

    pub fn buffered_rum(&self) -> usize {
        self.rum.as_ref().map_or(0, |slot| slot.buffer.len())
    }

    pub fn buffered_records(&self) -> usize {
        self.replay
            .as_ref()
            .map_or(0, |slot| slot.builder.records_count())
    }

    pub fn handle(&mut self, event: AgentEvent, now: Instant) {
        match event {
            AgentEvent::Log(message) => Self::add_message(self.logs.as_mut(), message, None, now),
            AgentEvent::Rum(message) => Self::add_message(self.rum.as_mut(), message, None, now),
            AgentEvent::RumUpdate { key, message } => {
                Self::add_message(self.rum.as_mut(), message, Some(key), now);
            }
            AgentEvent::Record(record) => self.add_record(record, now),
            AgentEvent::SessionChanged(session_id) => self.on_session_changed(session_id, now),
            AgentEvent::Lifecycle(signal) => self.on_lifecycle(signal, now),
        }
        self.forward_snapshot_request();
    }

    /// Earliest pending flush deadline across all buffers.
    pub fn next_deadline(&self) -> Option<Instant> {
        let logs = self.logs.as_ref().and_then(|slot| slot.scheduler.deadline());
        let rum = self.rum.as_ref().and_then(|slot| slot.scheduler.deadline());
        let replay = self.replay.as_ref().and_then(|slot| slot.scheduler.deadline());
        [logs, rum, replay].into_iter().flatten().min()
    }

    pub fn fire_timers(&mut self, now: Instant) {
        if let Some(slot) = self.logs.as_mut() {
            slot.fire(now);
        }
        if let Some(slot) = self.rum.as_mut() {
            slot.fire(now);
        }
        if let Some(slot) = self.replay.as_mut()
            && slot.scheduler.poll(now)
        {
            let flushes = slot.builder.flush_count();
            let context = self.context.current();
            slot.builder.flush(FlushReason::Timeout, context.as_ref());
            slot.settle(flushes, now);
        }
        self.forward_snapshot_request();
    }

    /// Runs until the page unloads: either an explicit unload signal or the
    /// event stream closing.
    pub async fn run(mut self, mut events: mpsc::Receiver<AgentEvent>) {
        self.forward_snapshot_request();

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        info!("Event stream closed, unloading");
                        self.handle(
                            AgentEvent::Lifecycle(LifecycleSignal::BeforeUnload),
                            Instant::now(),
                        );
                        break;
                    };
                    let unload = matches!(event, AgentEvent::Lifecycle(LifecycleSignal::BeforeUnload));
                    self.handle(event, Instant::now());
                    if unload {
                        break;
                    }
                }
                () = wait_until(deadline) => self.fire_timers(Instant::now()),
            }
        }
    }

    fn add_message(slot: Option<&mut BatchSlot>, message: Message, key: Option<String>, now: Instant) {
        let Some(slot) = slot else {
            debug!("No pipeline configured, dropping message");
            return;
        };
        slot.insert(now, |buffer| match key {
            Some(key) => buffer.upsert(message, key),
            None => buffer.add(message),
        });
    }

    fn add_record(&mut self, record: Record, now: Instant) {
        let Some(slot) = self.replay.as_mut() else {
            debug!("Replay is not configured, dropping record");
            return;
        };
        let flushes = slot.builder.flush_count();
        let context = self.context.current();
        slot.builder.add_record(record, context.as_ref());
        slot.settle(flushes, now);
    }

    fn on_session_changed(&mut self, session_id: Option<String>, now: Instant) {
        let previous = self.context.session_id();
        if previous == session_id {
            return;
        }
        info!("Session changed: {:?} -> {:?}", previous, session_id);
        self.context.set_session(session_id);

        let Some(slot) = self.replay.as_mut() else {
            return;
        };
        let flushes = slot.builder.flush_count();
        let context = self.context.current();
        match (previous, context) {
            // First session, or renewal after an untracked gap: the builder
            // picks the creation reason on the next record.
            (None, Some(_)) => {}
            (Some(_), Some(context)) => {
                slot.builder.on_session_renewed(Some(&context));
            }
            (_, None) => {
                slot.builder.flush(FlushReason::SessionRenewed, None);
            }
        }
        slot.settle(flushes, now);
    }

    fn on_lifecycle(&mut self, signal: LifecycleSignal, now: Instant) {
        match signal {
            LifecycleSignal::ViewCreated { view_id } => {
                self.context.set_view(view_id);
                if let Some(slot) = self.replay.as_mut() {
                    let flushes = slot.builder.flush_count();
                    let context = self.context.current();
                    slot.builder.on_view_created(context.as_ref());
                    slot.settle(flushes, now);
                }
            }
            LifecycleSignal::ViewEnded { timestamp } => {
                if let Some(slot) = self.replay.as_mut() {
                    let flushes = slot.builder.flush_count();
                    let context = self.context.current();
                    slot.builder.on_view_ended(timestamp, context.as_ref());
                    slot.settle(flushes, now);
                }
            }
            LifecycleSignal::VisibilityHidden => {
                self.flush_all(PageLifecycle::Hidden, FlushReason::VisibilityHidden);
            }
            LifecycleSignal::VisibilityVisible => {
                if self.page.get() == PageLifecycle::Hidden {
                    self.page.set(PageLifecycle::Active);
                }
            }
            LifecycleSignal::BeforeUnload => {
                self.flush_all(PageLifecycle::Unloading, FlushReason::BeforeUnload);
            }
        }
    }

    /// The page may disappear without notice: everything buffered goes out
    /// now, through the unload-safe path where possible.
    fn flush_all(&mut self, lifecycle: PageLifecycle, reason: FlushReason) {
        info!("Page {:?}, flushing all buffers", lifecycle);
        self.page.set(lifecycle);

        if let Some(slot) = self.logs.as_mut() {
            slot.flush_on_lifecycle(reason);
        }
        if let Some(slot) = self.rum.as_mut() {
            slot.flush_on_lifecycle(reason);
        }
        if let Some(slot) = self.replay.as_mut() {
            slot.scheduler.on_lifecycle();
            let context = self.context.current();
            slot.builder.flush(reason, context.as_ref());
        }
    }

    fn forward_snapshot_request(&mut self) {
        if let Some(slot) = self.replay.as_mut()
            && slot.builder.take_full_snapshot_request()
        {
            self.capture.take_full_snapshot();
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::capture::MockCaptureControl;
    use crate::buffer::BatchConfig;
    use crate::domain::{PayloadKind, RecordType};
    use crate::monitoring::MockMonitor;
    use crate::segment::SegmentConfig;
    use crate::sender::PendingPayload;
    use crate::sender::transport::MockTransport;
    use parking_lot::Mutex;
    use serde_json::json;

    type Sent = Arc<Mutex<Vec<PendingPayload>>>;

    fn transport(sent: &Sent) -> Arc<MockTransport> {
        let sink = sent.clone();
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .returning(move |payload| sink.lock().push(payload));
        Arc::new(transport)
    }

    fn monitor() -> Arc<MockMonitor> {
        let mut monitor = MockMonitor::new();
        monitor.expect_report().never();
        Arc::new(monitor)
    }

    fn controller(capture: MockCaptureControl, sent: &Sent) -> PageController {
        let context = SharedSessionContext::new("app");
        context.set_session(Some("s1".to_string()));
        let logs = BatchBuffer::new(
            PayloadKind::Logs,
            BatchConfig::default(),
            transport(sent),
            monitor(),
        );
        let builder = SegmentBuilder::new(SegmentConfig::default(), transport(sent), monitor());

        PageController::new(PageState::new(), context, Arc::new(capture))
            .with_logs(logs, Duration::from_secs(30))
            .with_replay(builder, Duration::from_secs(30))
    }

    fn log(text: &str) -> AgentEvent {
        AgentEvent::Log(Message::new().with("message", text))
    }

    #[test]
    fn test_initial_snapshot_request_is_forwarded_once() {
        let mut capture = MockCaptureControl::new();
        capture.expect_take_full_snapshot().times(1).return_const(());
        let sent = Sent::default();
        let mut controller = controller(capture, &sent);

        let now = Instant::now();
        controller.handle(log("a"), now);
        controller.handle(log("b"), now);
    }

    #[test]
    fn test_unload_flushes_everything_and_marks_page() {
        let mut capture = MockCaptureControl::new();
        capture.expect_take_full_snapshot().return_const(());
        let sent = Sent::default();
        let mut controller = controller(capture, &sent);

        let now = Instant::now();
        controller.handle(log("a"), now);
        controller.handle(
            AgentEvent::Record(Record::new(RecordType::IncrementalSnapshot, 1, json!({}))),
            now,
        );
        assert!(controller.next_deadline().is_some());

        controller.handle(AgentEvent::Lifecycle(LifecycleSignal::BeforeUnload), now);

        assert_eq!(controller.page().get(), PageLifecycle::Unloading);
        assert_eq!(controller.next_deadline(), None);
        let sent = sent.lock();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|payload| payload.reason == FlushReason::BeforeUnload));
    }

    #[test]
    fn test_timer_flushes_log_batch() {
        let mut capture = MockCaptureControl::new();
        capture.expect_take_full_snapshot().return_const(());
        let sent = Sent::default();
        let mut controller = controller(capture, &sent);

        let start = Instant::now();
        controller.handle(log("a"), start);
        controller.handle(log("b"), start + Duration::from_secs(10));
        assert_eq!(controller.next_deadline(), Some(start + Duration::from_secs(30)));

        controller.fire_timers(start + Duration::from_secs(29));
        assert_eq!(controller.buffered_logs(), 2);
        controller.fire_timers(start + Duration::from_secs(30));
        assert_eq!(controller.buffered_logs(), 0);
        assert_eq!(sent.lock()[0].reason, FlushReason::Timeout);
        assert_eq!(controller.next_deadline(), None);
    }

    #[test]
    fn test_visibility_round_trip() {
        let mut capture = MockCaptureControl::new();
        capture.expect_take_full_snapshot().return_const(());
        let sent = Sent::default();
        let mut controller = controller(capture, &sent);

        let now = Instant::now();
        controller.handle(AgentEvent::Lifecycle(LifecycleSignal::VisibilityHidden), now);
        assert_eq!(controller.page().get(), PageLifecycle::Hidden);
        controller.handle(AgentEvent::Lifecycle(LifecycleSignal::VisibilityVisible), now);
        assert_eq!(controller.page().get(), PageLifecycle::Active);
        assert!(sent.lock().is_empty());
    }

    #[test]
    fn test_idle_controller_never_wakes() {
        let mut idle = tokio_test::task::spawn(wait_until(None));
        tokio_test::assert_pending!(idle.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_stream_unloads() {
        let mut capture = MockCaptureControl::new();
        capture.expect_take_full_snapshot().return_const(());
        let sent = Sent::default();
        let controller = controller(capture, &sent);

        let (tx, rx) = mpsc::channel(8);
        tx.send(log("a")).await.unwrap();
        drop(tx);
        controller.run(rx).await;

        let sent = sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].reason, FlushReason::BeforeUnload);
    }
}
