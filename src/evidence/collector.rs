// Evidence collection over the gateway message stream
//
// Every message seen by the bot is published on a broadcast bus. A session
// subscribes before the submitter is told to post evidence, so nothing sent
// after the instruction can be missed. At most one session is open per user:
// opening a new one cancels the previous one.

use statig::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::session::{is_listening, EvidenceSession, SessionEvent};
use crate::platform::{
    ChannelId, ChatPlatform, IncomingMessage, MessageId, NamedFile, OutgoingMessage, PlatformError,
    UserId,
};
use crate::registry::PendingRegistry;

pub const DOWNLOAD_FAILED_NOTICE: &str = "Не удалось загрузить изображения. Попробуйте снова.";

const BUS_CAPACITY: usize = 256;

/// Fan-out of incoming gateway messages to open evidence sessions
#[derive(Debug, Clone)]
pub struct MessageBus {
    sender: broadcast::Sender<IncomingMessage>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(BUS_CAPACITY)
    }
}

impl MessageBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a message; returns how many sessions received it
    pub fn publish(&self, message: IncomingMessage) -> usize {
        self.sender.send(message).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IncomingMessage> {
        self.sender.subscribe()
    }

    pub fn listeners(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EvidenceSettings {
    /// How long the submitter has to post the attachments
    pub timeout: Duration,
    /// How long a wrong-count notice stays visible
    pub notice_ttl: Duration,
}

impl Default for EvidenceSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            notice_ttl: Duration::from_secs(5),
        }
    }
}

/// What a workflow expects the submitter to post
#[derive(Debug, Clone)]
pub struct EvidenceRequest {
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub required: usize,
    /// Downloaded files are renamed `{file_stem}{n}.png`, n starting at 1
    pub file_stem: &'static str,
    pub wrong_count_notice: String,
}

impl EvidenceRequest {
    fn is_from_submitter(&self, message: &IncomingMessage) -> bool {
        message.channel_id == self.channel_id && message.author_id == self.user_id
    }
}

/// Attachments collected for one submission
#[derive(Debug, Clone)]
pub struct Evidence {
    pub channel_id: ChannelId,
    /// The submitter's message carrying the attachments
    pub source_message: MessageId,
    pub files: Vec<NamedFile>,
}

#[derive(Debug)]
pub enum EvidenceOutcome<V> {
    Collected { record: V, evidence: Evidence },
    /// Nothing acceptable arrived in time; the submission was discarded
    Expired,
    /// A newer submission by the same user replaced this session
    Superseded,
    /// The submission was gone when the evidence arrived
    Orphaned,
    DownloadFailed,
}

impl<V> EvidenceOutcome<V> {
    pub fn label(&self) -> &'static str {
        match self {
            EvidenceOutcome::Collected { .. } => "collected",
            EvidenceOutcome::Expired => "expired",
            EvidenceOutcome::Superseded => "superseded",
            EvidenceOutcome::Orphaned => "orphaned",
            EvidenceOutcome::DownloadFailed => "download_failed",
        }
    }
}

struct SessionSlot {
    generation: u64,
    cancel: oneshot::Sender<()>,
}

/// Opens evidence sessions for one workflow
#[derive(Clone)]
pub struct EvidenceCollector {
    workflow: &'static str,
    platform: Arc<dyn ChatPlatform>,
    bus: MessageBus,
    settings: EvidenceSettings,
    sessions: Arc<Mutex<HashMap<UserId, SessionSlot>>>,
    generations: Arc<AtomicU64>,
}

impl std::fmt::Debug for EvidenceCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvidenceCollector")
            .field("workflow", &self.workflow)
            .field("settings", &self.settings)
            .field("open_sessions", &self.open_sessions())
            .finish()
    }
}

impl EvidenceCollector {
    pub fn new(
        workflow: &'static str,
        platform: Arc<dyn ChatPlatform>,
        bus: MessageBus,
        settings: EvidenceSettings,
    ) -> Self {
        Self {
            workflow,
            platform,
            bus,
            settings,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            generations: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn open_sessions(&self) -> usize {
        lock(&self.sessions).len()
    }

    /// Start listening for the submitter's evidence right away
    ///
    /// Any session already open for the same user is cancelled. The returned
    /// handle releases its slot when dropped, collected or not.
    pub fn open(&self, request: EvidenceRequest) -> PendingEvidence {
        let receiver = self.bus.subscribe();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let generation = self.generations.fetch_add(1, Ordering::SeqCst);

        let previous = lock(&self.sessions).insert(
            request.user_id,
            SessionSlot {
                generation,
                cancel: cancel_tx,
            },
        );
        if let Some(previous) = previous {
            info!(
                workflow = self.workflow,
                user_id = %request.user_id,
                "Cancelling previous evidence session"
            );
            let _ = previous.cancel.send(());
        }

        debug!(
            workflow = self.workflow,
            user_id = %request.user_id,
            required = request.required,
            "Evidence session opened"
        );

        PendingEvidence {
            collector: self.clone(),
            deadline: Instant::now() + self.settings.timeout,
            request,
            receiver,
            cancel: cancel_rx,
            generation,
        }
    }

    fn owns_slot(&self, user_id: UserId, generation: u64) -> bool {
        lock(&self.sessions).get(&user_id).map(|slot| slot.generation) == Some(generation)
    }

    fn release(&self, user_id: UserId, generation: u64) {
        let mut sessions = lock(&self.sessions);
        if sessions.get(&user_id).map(|slot| slot.generation) == Some(generation) {
            sessions.remove(&user_id);
        }
    }
}

/// An open evidence session waiting to be driven by [`PendingEvidence::collect`]
pub struct PendingEvidence {
    collector: EvidenceCollector,
    request: EvidenceRequest,
    receiver: broadcast::Receiver<IncomingMessage>,
    cancel: oneshot::Receiver<()>,
    deadline: Instant,
    generation: u64,
}

impl Drop for PendingEvidence {
    fn drop(&mut self) {
        self.collector
            .release(self.request.user_id, self.generation);
    }
}

impl PendingEvidence {
    pub fn user_id(&self) -> UserId {
        self.request.user_id
    }

    /// Wait for the evidence and claim the user's submission from `submissions`
    ///
    /// On expiry the submission is deleted, but only while this session still
    /// owns the user's slot. A superseded session leaves the registry alone
    /// since the newer submission already owns that entry, even when its
    /// deadline fires before the cancellation is observed.
    pub async fn collect<V>(mut self, submissions: &PendingRegistry<UserId, V>) -> EvidenceOutcome<V>
    where
        V: Clone + Send + Sync + 'static,
    {
        let user_id = self.request.user_id;
        let mut machine = EvidenceSession::new(user_id, self.request.required).state_machine();
        let deadline = tokio::time::sleep_until(self.deadline);
        tokio::pin!(deadline);

        let outcome = loop {
            tokio::select! {
                biased;

                _ = &mut self.cancel => {
                    machine.handle(&SessionEvent::Superseded);
                    break EvidenceOutcome::Superseded;
                }
                _ = &mut deadline => {
                    if !self.collector.owns_slot(user_id, self.generation) {
                        machine.handle(&SessionEvent::Superseded);
                        break EvidenceOutcome::Superseded;
                    }
                    machine.handle(&SessionEvent::DeadlineElapsed);
                    submissions.delete(&user_id).await;
                    break EvidenceOutcome::Expired;
                }
                received = self.receiver.recv() => {
                    let message = match received {
                        Ok(message) => message,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(
                                workflow = self.collector.workflow,
                                user_id = %user_id,
                                skipped,
                                "Evidence session lagged behind the message bus"
                            );
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            if !self.collector.owns_slot(user_id, self.generation) {
                                machine.handle(&SessionEvent::Superseded);
                                break EvidenceOutcome::Superseded;
                            }
                            machine.handle(&SessionEvent::DeadlineElapsed);
                            submissions.delete(&user_id).await;
                            break EvidenceOutcome::Expired;
                        }
                    };

                    if !self.request.is_from_submitter(&message) {
                        continue;
                    }

                    if message.attachments.len() != self.request.required {
                        machine.handle(&SessionEvent::Rejected {
                            attachments: message.attachments.len(),
                        });
                        self.reject(&message).await;
                        continue;
                    }

                    let (event, outcome) = self.accept(message, submissions).await;
                    machine.handle(&event);
                    break outcome;
                }
            }
        };

        debug_assert!(!is_listening(machine.state()));
        outcome
    }

    async fn accept<V>(
        &self,
        message: IncomingMessage,
        submissions: &PendingRegistry<UserId, V>,
    ) -> (SessionEvent, EvidenceOutcome<V>)
    where
        V: Clone + Send + Sync + 'static,
    {
        let Some(record) = submissions.take(&self.request.user_id).await else {
            let event = SessionEvent::Abandoned {
                reason: "submission no longer pending".to_string(),
            };
            return (event, EvidenceOutcome::Orphaned);
        };

        match self.download(&message).await {
            Ok(files) => {
                let evidence = Evidence {
                    channel_id: message.channel_id,
                    source_message: message.id,
                    files,
                };
                (
                    SessionEvent::Accepted,
                    EvidenceOutcome::Collected { record, evidence },
                )
            }
            Err(e) => {
                warn!(
                    workflow = self.collector.workflow,
                    user_id = %self.request.user_id,
                    error = %e,
                    "Failed to download evidence attachments"
                );
                if let Err(e) = self
                    .collector
                    .platform
                    .send_message(message.channel_id, OutgoingMessage::text(DOWNLOAD_FAILED_NOTICE))
                    .await
                {
                    warn!(error = %e, "Failed to report evidence download failure");
                }
                let event = SessionEvent::Abandoned {
                    reason: e.to_string(),
                };
                (event, EvidenceOutcome::DownloadFailed)
            }
        }
    }

    async fn download(&self, message: &IncomingMessage) -> Result<Vec<NamedFile>, PlatformError> {
        let mut files = Vec::with_capacity(message.attachments.len());
        for (index, attachment) in message.attachments.iter().enumerate() {
            let bytes = self.collector.platform.fetch_attachment(attachment).await?;
            files.push(NamedFile {
                name: format!("{}{}.png", self.request.file_stem, index + 1),
                bytes,
            });
        }
        Ok(files)
    }

    /// Tell the submitter the count is wrong and clean both messages up later
    async fn reject(&self, message: &IncomingMessage) {
        let platform = Arc::clone(&self.collector.platform);
        let notice = match platform
            .reply_to_message(
                message.channel_id,
                message.id,
                self.request.wrong_count_notice.clone(),
            )
            .await
        {
            Ok(notice) => notice,
            Err(e) => {
                warn!(error = %e, "Failed to send wrong attachment count notice");
                return;
            }
        };

        let ttl = self.collector.settings.notice_ttl;
        let channel = message.channel_id;
        let offending = message.id;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            for id in [offending, notice.id] {
                if let Err(e) = platform.delete_message(channel, id).await {
                    debug!(message_id = %id, error = %e, "Could not delete evidence notice");
                }
            }
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mocks::{PlatformCall, RecordingPlatform};
    use crate::platform::Attachment;

    const CHANNEL: ChannelId = ChannelId(10);
    const USER: UserId = UserId(20);

    fn collector(platform: Arc<RecordingPlatform>, bus: &MessageBus) -> EvidenceCollector {
        EvidenceCollector::new("test", platform, bus.clone(), EvidenceSettings::default())
    }

    fn request(required: usize) -> EvidenceRequest {
        EvidenceRequest {
            channel_id: CHANNEL,
            user_id: USER,
            required,
            file_stem: "photo",
            wrong_count_notice: "wrong count".to_string(),
        }
    }

    fn message(id: u64, author: UserId, attachments: usize) -> IncomingMessage {
        IncomingMessage {
            id: MessageId(id),
            channel_id: CHANNEL,
            author_id: author,
            attachments: (0..attachments)
                .map(|i| Attachment {
                    url: format!("https://cdn.test/{id}/{i}"),
                    filename: format!("IMG_{i}.jpg"),
                })
                .collect(),
        }
    }

    fn serve_attachments(platform: &RecordingPlatform, msg: &IncomingMessage) {
        for a in &msg.attachments {
            platform.set_attachment(&a.url, a.url.as_bytes().to_vec());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn collects_matching_message_and_claims_submission() {
        let platform = Arc::new(RecordingPlatform::new());
        let bus = MessageBus::default();
        let submissions = PendingRegistry::persistent("submissions");
        submissions.put(USER, "record").await;

        let pending = collector(platform.clone(), &bus).open(request(2));
        let good = message(1, USER, 2);
        serve_attachments(&platform, &good);
        bus.publish(message(2, UserId(99), 2));
        bus.publish(good);

        match pending.collect(&submissions).await {
            EvidenceOutcome::Collected { record, evidence } => {
                assert_eq!(record, "record");
                assert_eq!(evidence.source_message, MessageId(1));
                let names: Vec<_> = evidence.files.iter().map(|f| f.name.as_str()).collect();
                assert_eq!(names, vec!["photo1.png", "photo2.png"]);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(!submissions.contains(&USER));
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_count_is_answered_and_cleaned_up() {
        let platform = Arc::new(RecordingPlatform::new());
        let bus = MessageBus::default();
        let submissions = PendingRegistry::persistent("submissions");
        submissions.put(USER, 1u32).await;

        let collector = collector(platform.clone(), &bus);
        let pending = collector.open(request(2));
        let task = tokio::spawn(async move { pending.collect(&submissions).await });

        bus.publish(message(1, USER, 1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(platform.calls().iter().any(|c| matches!(
            c,
            PlatformCall::Reply { message, content, .. } if *message == MessageId(1) && content == "wrong count"
        )));
        assert!(platform.deleted().is_empty());

        tokio::time::sleep(Duration::from_secs(6)).await;
        let deleted = platform.deleted();
        assert!(deleted.contains(&MessageId(1)));
        assert_eq!(deleted.len(), 2);

        let good = message(2, USER, 2);
        serve_attachments(&platform, &good);
        bus.publish(good);
        assert!(matches!(task.await.unwrap(), EvidenceOutcome::Collected { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_discards_submission() {
        let platform = Arc::new(RecordingPlatform::new());
        let bus = MessageBus::default();
        let submissions = PendingRegistry::persistent("submissions");
        submissions.put(USER, 1u32).await;

        let collector = collector(platform.clone(), &bus);
        let outcome = collector.open(request(3)).collect(&submissions).await;

        assert!(matches!(outcome, EvidenceOutcome::Expired));
        assert!(!submissions.contains(&USER));
        assert_eq!(collector.open_sessions(), 0);
        assert_eq!(bus.listeners(), 0);
        assert!(platform.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn newer_session_supersedes_older_one() {
        let platform = Arc::new(RecordingPlatform::new());
        let bus = MessageBus::default();
        let submissions = PendingRegistry::persistent("submissions");
        let collector = collector(platform.clone(), &bus);

        submissions.put(USER, "first").await;
        let first = collector.open(request(2));
        let first_registry = submissions.clone();
        let first_task = tokio::spawn(async move { first.collect(&first_registry).await });
        tokio::time::sleep(Duration::from_secs(30)).await;

        submissions.put(USER, "second").await;
        let second = collector.open(request(2));
        assert!(matches!(first_task.await.unwrap(), EvidenceOutcome::Superseded));
        assert_eq!(submissions.get(&USER).await, Some("second"));
        assert_eq!(collector.open_sessions(), 1);

        let good = message(3, USER, 2);
        serve_attachments(&platform, &good);
        bus.publish(good);
        match second.collect(&submissions).await {
            EvidenceOutcome::Collected { record, .. } => assert_eq!(record, "second"),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(collector.open_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn late_deadline_of_replaced_session_spares_new_submission() {
        let platform = Arc::new(RecordingPlatform::new());
        let bus = MessageBus::default();
        let submissions = PendingRegistry::persistent("submissions");
        let collector = collector(platform, &bus);

        submissions.put(USER, "first").await;
        let first = collector.open(request(2));
        submissions.put(USER, "second").await;
        let _second = collector.open(request(2));

        // The first session is only polled once its deadline is long gone
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(matches!(first.collect(&submissions).await, EvidenceOutcome::Superseded));
        assert_eq!(submissions.get(&USER).await, Some("second"));
        assert_eq!(collector.open_sessions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_matching_message_is_not_collected_again() {
        let platform = Arc::new(RecordingPlatform::new());
        let bus = MessageBus::default();
        let submissions = PendingRegistry::persistent("submissions");
        submissions.put(USER, 1u32).await;

        let pending = collector(platform.clone(), &bus).open(request(2));
        let first = message(1, USER, 2);
        let second = message(2, USER, 2);
        serve_attachments(&platform, &first);
        serve_attachments(&platform, &second);
        bus.publish(first);
        bus.publish(second.clone());

        match pending.collect(&submissions).await {
            EvidenceOutcome::Collected { evidence, .. } => {
                assert_eq!(evidence.source_message, MessageId(1))
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(bus.listeners(), 0);
        assert_eq!(bus.publish(second), 0);
        let downloads = platform
            .calls()
            .iter()
            .filter(|c| matches!(c, PlatformCall::FetchAttachment { .. }))
            .count();
        assert_eq!(downloads, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_submission_is_dropped_silently() {
        let platform = Arc::new(RecordingPlatform::new());
        let bus = MessageBus::default();
        let submissions: PendingRegistry<UserId, u32> = PendingRegistry::persistent("submissions");

        let pending = collector(platform.clone(), &bus).open(request(2));
        bus.publish(message(1, USER, 2));

        assert!(matches!(pending.collect(&submissions).await, EvidenceOutcome::Orphaned));
        assert!(platform.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_download_is_reported_to_channel() {
        let platform = Arc::new(RecordingPlatform::new());
        let bus = MessageBus::default();
        let submissions = PendingRegistry::persistent("submissions");
        submissions.put(USER, 1u32).await;

        let pending = collector(platform.clone(), &bus).open(request(2));
        bus.publish(message(1, USER, 2));

        assert!(matches!(
            pending.collect(&submissions).await,
            EvidenceOutcome::DownloadFailed
        ));
        let sent = platform.sent_to(CHANNEL);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.content.as_deref(), Some(DOWNLOAD_FAILED_NOTICE));
    }

    #[tokio::test]
    async fn dropping_an_uncollected_session_frees_the_slot() {
        let platform = Arc::new(RecordingPlatform::new());
        let bus = MessageBus::default();
        let collector = collector(platform, &bus);

        let pending = collector.open(request(2));
        assert_eq!(collector.open_sessions(), 1);
        drop(pending);
        assert_eq!(collector.open_sessions(), 0);
        assert_eq!(bus.listeners(), 0);
    }
}
