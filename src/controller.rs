use crate::config::RollbackPolicy;
use crate::models::{Message, MessageDraft, MessageKind, Position, Settings, StyleUpdate};
use crate::storage::{MessageStorage, StorageError};
use crate::store::{MessagePatch, MessageStore, StackingOrder};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Cards print just right of the paper slot.
const PRINT_TARGET_X: f64 = 360.0;
/// Vertical jitter for fresh prints so they don't stack perfectly.
const PRINT_JITTER_Y: f64 = 50.0;
const COMPLETION_QUEUE: usize = 64;

/// Rectangle around the anchor used for cards that arrive without a position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScatterArea {
    pub half_width: f64,
    pub half_height: f64,
}

impl Default for ScatterArea {
    fn default() -> Self {
        Self {
            half_width: 250.0,
            half_height: 100.0,
        }
    }
}

impl ScatterArea {
    pub fn pick(&self, rng: &mut impl Rng) -> Position {
        Position::new(
            rng.random_range(-self.half_width..self.half_width),
            rng.random_range(-self.half_height..self.half_height),
        )
    }

    #[cfg(test)]
    pub fn contains(&self, position: Position) -> bool {
        (-self.half_width..self.half_width).contains(&position.x)
            && (-self.half_height..self.half_height).contains(&position.y)
    }
}

/// A message attribute that can be changed optimistically.
trait Field {
    type Value: Clone + Send + 'static;

    fn read(message: &Message) -> Self::Value;
    fn patch(value: Self::Value) -> MessagePatch;
}

struct ReminderField;

impl Field for ReminderField {
    type Value = bool;

    fn read(message: &Message) -> bool {
        message.has_reminder
    }

    fn patch(value: bool) -> MessagePatch {
        MessagePatch {
            has_reminder: Some(value),
            ..MessagePatch::default()
        }
    }
}

struct PositionField;

impl Field for PositionField {
    type Value = Position;

    fn read(message: &Message) -> Position {
        message.position.unwrap_or_default()
    }

    fn patch(value: Position) -> MessagePatch {
        MessagePatch {
            position: Some(value),
            ..MessagePatch::default()
        }
    }
}

struct StyleField;

impl Field for StyleField {
    type Value = StyleUpdate;

    fn read(message: &Message) -> StyleUpdate {
        match message.kind() {
            MessageKind::Text => StyleUpdate {
                style_id: None,
                note_color_id: Some(message.style_key().to_string()),
            },
            MessageKind::Image => StyleUpdate {
                style_id: Some(message.style_key().to_string()),
                note_color_id: None,
            },
        }
    }

    fn patch(value: StyleUpdate) -> MessagePatch {
        MessagePatch {
            style: Some(value),
            ..MessagePatch::default()
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum OnFailure {
    Banner(&'static str),
    Log(&'static str),
}

/// Outcome of a storage call, sent back from its task.
enum Completion {
    Loaded {
        messages: Result<Vec<Message>, StorageError>,
        settings: Result<Settings, StorageError>,
    },
    Printed {
        result: Result<Message, StorageError>,
        fallback: Position,
    },
    Deleted {
        index: usize,
        message: Message,
        result: Result<(), StorageError>,
    },
    Persisted {
        id: String,
        applied: MessagePatch,
        revert: MessagePatch,
        rollback: bool,
        on_failure: OnFailure,
        result: Result<(), StorageError>,
    },
    SettingsSaved {
        applied: Settings,
        prior: Settings,
        result: Result<(), StorageError>,
    },
}

/// Completions the view reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settled {
    Printed(String),
    PrintFailed,
}

/// Turns user actions into store mutations plus façade calls.
///
/// Owns the message store, the stacking counter and the current settings;
/// the view only ever reads from here. Local changes apply immediately while
/// the storage call runs as a task whose outcome comes back through `drain`.
pub struct Controller {
    storage: Arc<dyn MessageStorage>,
    store: MessageStore,
    stacking: StackingOrder,
    settings: Settings,
    policy: RollbackPolicy,
    scatter: ScatterArea,
    is_printing: bool,
    error: Option<String>,
    tx: mpsc::Sender<Completion>,
    rx: mpsc::Receiver<Completion>,
    in_flight: usize,
}

impl Controller {
    pub fn new(storage: Arc<dyn MessageStorage>, policy: RollbackPolicy) -> Self {
        let (tx, rx) = mpsc::channel(COMPLETION_QUEUE);
        Self {
            storage,
            store: MessageStore::default(),
            stacking: StackingOrder::default(),
            settings: Settings::default(),
            policy,
            scatter: ScatterArea::default(),
            is_printing: false,
            error: None,
            tx,
            rx,
            in_flight: 0,
        }
    }

    pub fn messages(&self) -> Arc<Vec<Message>> {
        self.store.snapshot()
    }

    pub fn message_count(&self) -> usize {
        self.store.len()
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.store.get(id)
    }

    pub fn stacking_index(&self, id: &str) -> u32 {
        self.stacking.index_of(id)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn is_printing(&self) -> bool {
        self.is_printing
    }

    /// Storage calls that have not reported back yet.
    pub fn pending(&self) -> usize {
        self.in_flight
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    pub fn backend_name(&self) -> &'static str {
        self.storage.backend_name()
    }

    fn fail(&mut self, banner: &str, err: &StorageError) {
        tracing::error!(error = %err, "{}", banner);
        self.error = Some(banner.to_string());
    }

    fn spawn<T, Fut>(&mut self, task: T)
    where
        T: FnOnce(Arc<dyn MessageStorage>) -> Fut,
        Fut: Future<Output = Completion> + Send + 'static,
    {
        self.in_flight += 1;
        let work = task(Arc::clone(&self.storage));
        let tx = self.tx.clone();
        tokio::spawn(async move {
            // The receiver only goes away with the controller.
            tx.send(work.await).await.ok();
        });
    }

    /// Applies whatever completions have arrived, without waiting.
    pub fn drain(&mut self) -> Vec<Settled> {
        let mut settled = Vec::new();
        while let Ok(completion) = self.rx.try_recv() {
            settled.extend(self.resolve(completion));
        }
        settled
    }

    /// Waits for every outstanding storage call.
    pub async fn settle(&mut self) -> Vec<Settled> {
        let mut settled = Vec::new();
        while self.in_flight > 0 {
            match self.rx.recv().await {
                Some(completion) => settled.extend(self.resolve(completion)),
                None => break,
            }
        }
        settled
    }

    /// Fetches the persisted messages and settings for the desk.
    pub fn load(&mut self) {
        self.error = None;
        self.spawn(|storage| async move {
            let messages = storage.list_messages().await;
            let settings = storage.get_settings().await;
            Completion::Loaded { messages, settings }
        });
    }

    /// Starts printing a draft. Returns false when nothing was sent.
    pub fn print(&mut self, mut draft: MessageDraft) -> bool {
        if !draft.is_printable() || self.is_printing {
            return false;
        }
        draft.apply_defaults(&self.settings);
        let fallback = *draft.position.get_or_insert_with(|| {
            let jitter = rand::rng().random_range(-PRINT_JITTER_Y..PRINT_JITTER_Y);
            Position::new(PRINT_TARGET_X, jitter)
        });

        self.is_printing = true;
        self.error = None;
        self.spawn(move |storage| async move {
            let result = storage.create_message(draft).await;
            Completion::Printed { result, fallback }
        });
        true
    }

    /// Takes a card off the desk and deletes it from storage.
    pub fn delete(&mut self, id: &str) -> bool {
        let Some((index, message)) = self.store.remove(id) else {
            return false;
        };
        let id = id.to_string();
        self.spawn(move |storage| async move {
            let result = storage.delete_message(&id).await;
            Completion::Deleted {
                index,
                message,
                result,
            }
        });
        true
    }

    /// Pins are local to this session and never persisted.
    pub fn toggle_pin(&mut self, id: &str) -> Option<bool> {
        let pinned = !self.store.get(id)?.is_pinned;
        self.store.update(
            id,
            &MessagePatch {
                is_pinned: Some(pinned),
                ..MessagePatch::default()
            },
        );
        Some(pinned)
    }

    /// Flips the reminder flag. Returns the new value, or `None` for an
    /// unknown card.
    pub fn toggle_reminder(&mut self, id: &str) -> Option<bool> {
        let next = !self.store.get(id)?.has_reminder;
        self.optimistic::<ReminderField, _, _>(
            id,
            next,
            true,
            OnFailure::Banner("Could not save reminder"),
            |storage, id, value| async move { storage.toggle_reminder(&id, value).await },
        );
        Some(next)
    }

    pub fn update_style(&mut self, id: &str, update: StyleUpdate) -> bool {
        let rollback = self.policy == RollbackPolicy::Unified;
        self.optimistic::<StyleField, _, _>(
            id,
            update,
            rollback,
            OnFailure::Banner("Could not save style"),
            |storage, id, value| async move { storage.update_style(&id, value).await },
        )
    }

    /// Finishes a drag: the card moves by `(dx, dy)` from where it was.
    /// Pinned and unknown cards stay put.
    pub fn finish_drag(&mut self, id: &str, dx: f64, dy: f64) -> bool {
        let Some(message) = self.store.get(id) else {
            return false;
        };
        if message.is_pinned {
            return false;
        }
        let target = PositionField::read(message).offset_by(dx, dy);

        let (rollback, on_failure) = match self.policy {
            RollbackPolicy::Unified => (true, OnFailure::Banner("Could not save position")),
            RollbackPolicy::Legacy => (false, OnFailure::Log("failed to save position")),
        };
        self.optimistic::<PositionField, _, _>(
            id,
            target,
            rollback,
            on_failure,
            |storage, id, value| async move {
                storage.update_message_position(&id, value.x, value.y).await
            },
        )
    }

    pub fn bring_to_front(&mut self, id: &str) -> Option<u32> {
        self.store.get(id)?;
        Some(self.stacking.bring_to_front(id))
    }

    /// Replaces the settings record wholesale.
    pub fn update_settings(&mut self, settings: Settings) {
        let prior = std::mem::replace(&mut self.settings, settings);
        let applied = self.settings.clone();
        self.spawn(move |storage| async move {
            let result = storage.put_settings(&applied).await;
            Completion::SettingsSaved {
                applied,
                prior,
                result,
            }
        });
    }

    /// Snapshot, apply locally and persist in the background. The snapshot is
    /// reapplied if persisting fails and `rollback` is set.
    fn optimistic<F, P, Fut>(
        &mut self,
        id: &str,
        next: F::Value,
        rollback: bool,
        on_failure: OnFailure,
        persist: P,
    ) -> bool
    where
        F: Field,
        P: FnOnce(Arc<dyn MessageStorage>, String, F::Value) -> Fut,
        Fut: Future<Output = Result<(), StorageError>> + Send + 'static,
    {
        let Some(prior) = self.store.get(id).map(F::read) else {
            return false;
        };
        let applied = F::patch(next.clone());
        self.store.update(id, &applied);
        let revert = F::patch(prior);

        let id = id.to_string();
        self.spawn(move |storage| {
            let write = persist(storage, id.clone(), next);
            async move {
                Completion::Persisted {
                    id,
                    applied,
                    revert,
                    rollback,
                    on_failure,
                    result: write.await,
                }
            }
        });
        true
    }

    fn resolve(&mut self, completion: Completion) -> Option<Settled> {
        self.in_flight = self.in_flight.saturating_sub(1);
        match completion {
            Completion::Loaded { messages, settings } => {
                match messages {
                    Ok(messages) => self.place_loaded(messages),
                    Err(err) => self.fail("Could not load message history.", &err),
                }
                match settings {
                    Ok(settings) => self.settings = settings,
                    Err(err) => tracing::warn!(error = %err, "keeping default settings"),
                }
                None
            }
            Completion::Printed { result, fallback } => {
                self.is_printing = false;
                match result {
                    Ok(mut message) => {
                        if message.position.is_none() {
                            message.position = Some(fallback);
                        }
                        let id = message.id.clone();
                        self.store.prepend(message);
                        self.stacking.bring_to_front(&id);
                        Some(Settled::Printed(id))
                    }
                    Err(err) => {
                        self.fail("Printing failed. Check connection.", &err);
                        Some(Settled::PrintFailed)
                    }
                }
            }
            Completion::Deleted {
                index,
                message,
                result,
            } => {
                match result {
                    Ok(()) => self.stacking.forget(&message.id),
                    Err(err) => {
                        if self.policy == RollbackPolicy::Unified
                            && self.store.get(&message.id).is_none()
                        {
                            self.store.insert_at(index, message);
                        }
                        self.fail("Failed to delete message", &err);
                    }
                }
                None
            }
            Completion::Persisted {
                id,
                applied,
                revert,
                rollback,
                on_failure,
                result,
            } => {
                if let Err(err) = result {
                    if rollback {
                        self.revert(&id, &applied, &revert);
                    }
                    match on_failure {
                        OnFailure::Banner(banner) => self.fail(banner, &err),
                        OnFailure::Log(what) => {
                            tracing::error!(error = %err, id = %id, "{}", what)
                        }
                    }
                }
                None
            }
            Completion::SettingsSaved {
                applied,
                prior,
                result,
            } => {
                if let Err(err) = result {
                    if self.policy == RollbackPolicy::Unified && self.settings == applied {
                        self.settings = prior;
                    }
                    self.fail("Could not save settings", &err);
                }
                None
            }
        }
    }

    /// Scatters positionless cards onto the desk. Cards printed while the
    /// listing was in flight stay in front of it.
    fn place_loaded(&mut self, messages: Vec<Message>) {
        let mut rng = rand::rng();
        let placed = messages
            .into_iter()
            .map(|mut message| {
                if message.position.is_none() {
                    message.position = Some(self.scatter.pick(&mut rng));
                }
                message
            })
            .collect::<Vec<_>>();
        tracing::info!(count = placed.len(), "history loaded");

        let mut desk: Vec<Message> = self
            .store
            .snapshot()
            .iter()
            .filter(|m| !placed.iter().any(|p| p.id == m.id))
            .cloned()
            .collect();
        desk.extend(placed);
        self.store.replace_all(desk);
    }

    /// Undoes a failed change unless a newer one has replaced it since.
    fn revert(&mut self, id: &str, applied: &MessagePatch, revert: &MessagePatch) {
        match self.store.get(id) {
            Some(current) if applied.is_reflected_in(current) => {
                tracing::debug!(id, "reverting optimistic change");
                self.store.update(id, revert);
            }
            Some(_) => tracing::debug!(id, "failed change already superseded"),
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::MessageBody;
    use crate::storage::LocalStorage;
    use crate::store::BASE_STACKING_INDEX;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Semaphore;

    /// Local storage whose calls can be switched to fail or held back.
    struct FlakyStorage {
        inner: LocalStorage,
        fail_writes: AtomicBool,
        fail_reads: AtomicBool,
        // Every write waits for a permit.
        gate: Semaphore,
        // update_style fails for this note colour only.
        reject_color: Option<&'static str>,
        // Created messages come back without coordinates.
        drop_positions: bool,
    }

    impl FlakyStorage {
        async fn new() -> Self {
            Self {
                inner: LocalStorage::new(Database::in_memory().await.unwrap()),
                fail_writes: AtomicBool::new(false),
                fail_reads: AtomicBool::new(false),
                gate: Semaphore::new(Semaphore::MAX_PERMITS),
                reject_color: None,
                drop_positions: false,
            }
        }

        fn check(&self, flag: &AtomicBool) -> Result<(), StorageError> {
            if flag.load(Ordering::SeqCst) {
                Err(unavailable())
            } else {
                Ok(())
            }
        }

        async fn write(&self) -> Result<(), StorageError> {
            drop(self.gate.acquire().await.unwrap());
            self.check(&self.fail_writes)
        }
    }

    fn unavailable() -> StorageError {
        StorageError::Status {
            status: 503,
            path: "/test".to_string(),
        }
    }

    #[async_trait]
    impl MessageStorage for FlakyStorage {
        fn backend_name(&self) -> &'static str {
            "FLAKY"
        }

        async fn list_messages(&self) -> Result<Vec<Message>, StorageError> {
            self.check(&self.fail_reads)?;
            self.inner.list_messages().await
        }

        async fn create_message(&self, draft: MessageDraft) -> Result<Message, StorageError> {
            self.write().await?;
            let mut message = self.inner.create_message(draft).await?;
            if self.drop_positions {
                message.position = None;
            }
            Ok(message)
        }

        async fn delete_message(&self, id: &str) -> Result<(), StorageError> {
            self.write().await?;
            self.inner.delete_message(id).await
        }

        async fn update_message_position(
            &self,
            id: &str,
            x: f64,
            y: f64,
        ) -> Result<(), StorageError> {
            self.write().await?;
            self.inner.update_message_position(id, x, y).await
        }

        async fn toggle_reminder(&self, id: &str, value: bool) -> Result<(), StorageError> {
            self.write().await?;
            self.inner.toggle_reminder(id, value).await
        }

        async fn update_style(&self, id: &str, update: StyleUpdate) -> Result<(), StorageError> {
            self.write().await?;
            if self.reject_color.is_some() && update.note_color_id.as_deref() == self.reject_color
            {
                return Err(unavailable());
            }
            self.inner.update_style(id, update).await
        }

        async fn get_settings(&self) -> Result<Settings, StorageError> {
            self.inner.get_settings().await
        }

        async fn put_settings(&self, settings: &Settings) -> Result<(), StorageError> {
            self.write().await?;
            self.inner.put_settings(settings).await
        }
    }

    async fn start(
        policy: RollbackPolicy,
        storage: FlakyStorage,
    ) -> (Controller, Arc<FlakyStorage>) {
        let storage = Arc::new(storage);
        let mut controller = Controller::new(storage.clone(), policy);
        controller.load();
        controller.settle().await;
        (controller, storage)
    }

    async fn setup(policy: RollbackPolicy) -> (Controller, Arc<FlakyStorage>) {
        start(policy, FlakyStorage::new().await).await
    }

    async fn print_now(controller: &mut Controller, draft: MessageDraft) -> Option<String> {
        assert!(controller.print(draft));
        match controller.settle().await.as_slice() {
            [Settled::Printed(id)] => Some(id.clone()),
            _ => None,
        }
    }

    fn note_color(color: &str) -> StyleUpdate {
        StyleUpdate {
            style_id: None,
            note_color_id: Some(color.to_string()),
        }
    }

    fn ids(controller: &Controller) -> Vec<String> {
        controller.messages().iter().map(|m| m.id.clone()).collect()
    }

    #[tokio::test]
    async fn test_load_places_every_card() {
        let (controller, _) = setup(RollbackPolicy::Unified).await;
        assert_eq!(ids(&controller), ["8658", "7052"]);
        assert!(controller.messages().iter().all(|m| m.position.is_some()));
        assert!(controller.error().is_none());
        assert_eq!(controller.pending(), 0);
    }

    #[tokio::test]
    async fn test_load_scatters_cards_without_position() {
        let db = Database::in_memory().await.unwrap();
        db.put(
            crate::storage::MESSAGES_KEY,
            r#"[{"id":"loose","content":"no coords","timestamp":"2024-05-01T10:00:00Z"}]"#,
        )
        .await
        .unwrap();
        let storage = Arc::new(LocalStorage::new(db.clone()));
        let mut controller = Controller::new(storage, RollbackPolicy::Unified);
        controller.load();
        controller.settle().await;

        let position = controller.message("loose").unwrap().position.unwrap();
        assert!(ScatterArea::default().contains(position));

        // The scatter is not written back.
        let raw = db.get(crate::storage::MESSAGES_KEY).await.unwrap().unwrap();
        assert!(!raw.contains("\"x\""));
    }

    #[tokio::test]
    async fn test_load_failure_sets_banner() {
        let storage = FlakyStorage::new().await;
        storage.fail_reads.store(true, Ordering::SeqCst);
        let (controller, _) = start(RollbackPolicy::Unified, storage).await;

        assert!(controller.messages().is_empty());
        assert_eq!(controller.error(), Some("Could not load message history."));
    }

    #[tokio::test]
    async fn test_print_prepends_unique_and_front_most() {
        let (mut controller, _) = setup(RollbackPolicy::Unified).await;
        let mut seen: HashSet<String> = ids(&controller).into_iter().collect();

        let first = print_now(&mut controller, MessageDraft::text("one")).await.unwrap();
        let second = print_now(&mut controller, MessageDraft::text("two")).await.unwrap();

        assert!(seen.insert(first.clone()));
        assert!(seen.insert(second.clone()));
        assert_eq!(ids(&controller)[..2], [second.clone(), first.clone()]);
        assert!(controller.stacking_index(&second) > controller.stacking_index(&first));
        assert!(controller.stacking_index(&first) > controller.stacking_index("8658"));

        let printed = controller.message(&second).unwrap();
        let position = printed.position.unwrap();
        assert_eq!(position.x, PRINT_TARGET_X);
        assert!((-PRINT_JITTER_Y..PRINT_JITTER_Y).contains(&position.y));
        assert!(!controller.is_printing());
    }

    #[tokio::test]
    async fn test_print_keeps_requested_position_when_response_lacks_it() {
        let mut storage = FlakyStorage::new().await;
        storage.drop_positions = true;
        let (mut controller, _) = start(RollbackPolicy::Unified, storage).await;

        let id = print_now(&mut controller, MessageDraft::text("where am i"))
            .await
            .unwrap();
        let position = controller.message(&id).unwrap().position.unwrap();
        assert_eq!(position.x, PRINT_TARGET_X);
        assert!((-PRINT_JITTER_Y..PRINT_JITTER_Y).contains(&position.y));

        let placed = Position::new(-20.0, 30.0);
        let id = print_now(&mut controller, MessageDraft::text("here").at(placed))
            .await
            .unwrap();
        assert_eq!(controller.message(&id).unwrap().position, Some(placed));
    }

    #[tokio::test]
    async fn test_print_uses_default_styles_from_settings() {
        let (mut controller, _) = setup(RollbackPolicy::Unified).await;
        controller.update_settings(Settings {
            note_color_id: "yellow".to_string(),
            polaroid_style: "noir".to_string(),
            ..Settings::default()
        });
        controller.settle().await;

        let note = print_now(&mut controller, MessageDraft::text("hi")).await.unwrap();
        let photo = print_now(
            &mut controller,
            MessageDraft::image("data:image/png;base64,AAAA"),
        )
        .await
        .unwrap();

        assert_eq!(controller.message(&note).unwrap().style_key(), "yellow");
        let photo = controller.message(&photo).unwrap();
        assert_eq!(photo.kind(), MessageKind::Image);
        assert_eq!(photo.style_key(), "noir");
    }

    #[tokio::test]
    async fn test_blank_draft_is_not_printed() {
        let (mut controller, _) = setup(RollbackPolicy::Unified).await;
        assert!(!controller.print(MessageDraft::text("   ")));
        assert_eq!(controller.pending(), 0);
        assert_eq!(controller.messages().len(), 2);
        assert!(controller.error().is_none());
    }

    #[tokio::test]
    async fn test_print_failure_leaves_store_unchanged() {
        let (mut controller, storage) = setup(RollbackPolicy::Unified).await;
        storage.fail_writes.store(true, Ordering::SeqCst);

        assert!(controller.print(MessageDraft::text("lost")));
        assert_eq!(controller.settle().await, [Settled::PrintFailed]);
        assert_eq!(ids(&controller), ["8658", "7052"]);
        assert_eq!(controller.error(), Some("Printing failed. Check connection."));
        assert!(!controller.is_printing());
    }

    #[tokio::test]
    async fn test_desk_stays_responsive_while_storage_is_stuck() {
        let mut storage = FlakyStorage::new().await;
        storage.gate = Semaphore::new(0);
        let (mut controller, storage) = start(RollbackPolicy::Unified, storage).await;

        assert_eq!(controller.toggle_reminder("8658"), Some(true));
        assert!(controller.finish_drag("7052", 8.0, 0.0));
        assert!(controller.print(MessageDraft::text("queued")));

        // The desk shows every change while the writes wait.
        assert!(controller.message("8658").unwrap().has_reminder);
        assert_eq!(
            controller.message("7052").unwrap().position,
            Some(Position::new(368.0, 80.0))
        );
        assert!(controller.is_printing());
        assert!(!controller.print(MessageDraft::text("second")));

        tokio::task::yield_now().await;
        assert!(controller.drain().is_empty());
        assert_eq!(controller.pending(), 3);
        assert_eq!(controller.bring_to_front("7052"), Some(BASE_STACKING_INDEX + 1));
        assert_eq!(controller.toggle_pin("8658"), Some(true));

        storage.gate.add_permits(3);
        let settled = controller.settle().await;
        assert!(matches!(settled.as_slice(), [Settled::Printed(_)]));
        assert_eq!(controller.pending(), 0);
        assert!(!controller.is_printing());
        assert!(controller.error().is_none());
        assert_eq!(controller.messages().len(), 3);

        let persisted = storage.list_messages().await.unwrap();
        assert!(persisted.iter().find(|m| m.id == "8658").unwrap().has_reminder);
        assert_eq!(
            persisted.iter().find(|m| m.id == "7052").unwrap().position,
            Some(Position::new(368.0, 80.0))
        );
    }

    #[tokio::test]
    async fn test_delete_removes_exactly_one_and_ignores_unknown() {
        let (mut controller, storage) = setup(RollbackPolicy::Unified).await;

        assert!(controller.delete("8658"));
        assert!(!controller.delete("8658"));
        assert!(!controller.delete("missing"));
        controller.settle().await;

        assert_eq!(ids(&controller), ["7052"]);
        let persisted: Vec<String> = storage
            .list_messages()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(persisted, ["7052"]);
        assert!(controller.error().is_none());
    }

    #[tokio::test]
    async fn test_successful_delete_forgets_stacking() {
        let (mut controller, _) = setup(RollbackPolicy::Unified).await;
        controller.bring_to_front("7052");

        controller.delete("7052");
        controller.settle().await;
        assert_eq!(controller.stacking_index("7052"), BASE_STACKING_INDEX);
    }

    #[tokio::test]
    async fn test_failed_delete_restores_card_and_stacking_when_unified() {
        let (mut controller, storage) = setup(RollbackPolicy::Unified).await;
        let front = controller.bring_to_front("7052").unwrap();
        storage.fail_writes.store(true, Ordering::SeqCst);

        controller.delete("7052");
        assert_eq!(ids(&controller), ["8658"]);
        controller.settle().await;

        assert_eq!(ids(&controller), ["8658", "7052"]);
        assert_eq!(controller.stacking_index("7052"), front);
        assert_eq!(controller.error(), Some("Failed to delete message"));
    }

    #[tokio::test]
    async fn test_failed_delete_stays_removed_when_legacy() {
        let (mut controller, storage) = setup(RollbackPolicy::Legacy).await;
        storage.fail_writes.store(true, Ordering::SeqCst);

        controller.delete("7052");
        controller.settle().await;
        assert_eq!(ids(&controller), ["8658"]);
        assert!(controller.error().is_some());
    }

    #[tokio::test]
    async fn test_pin_is_local_only() {
        let (mut controller, storage) = setup(RollbackPolicy::Unified).await;
        storage.fail_writes.store(true, Ordering::SeqCst);

        assert_eq!(controller.toggle_pin("8658"), Some(true));
        assert!(controller.message("8658").unwrap().is_pinned);
        assert_eq!(controller.toggle_pin("8658"), Some(false));
        assert_eq!(controller.toggle_pin("missing"), None);
        assert_eq!(controller.pending(), 0);
        assert!(controller.error().is_none());
    }

    #[tokio::test]
    async fn test_reminder_toggle_twice_restores_original() {
        let (mut controller, storage) = setup(RollbackPolicy::Legacy).await;

        assert_eq!(controller.toggle_reminder("8658"), Some(true));
        assert_eq!(controller.toggle_reminder("8658"), Some(false));
        controller.settle().await;
        assert!(!controller.message("8658").unwrap().has_reminder);

        let persisted = storage.list_messages().await.unwrap();
        assert!(!persisted.iter().find(|m| m.id == "8658").unwrap().has_reminder);
    }

    #[tokio::test]
    async fn test_failed_reminder_toggle_reverts_under_both_policies() {
        for policy in [RollbackPolicy::Legacy, RollbackPolicy::Unified] {
            let (mut controller, storage) = setup(policy).await;
            assert_eq!(controller.toggle_reminder("8658"), Some(true));
            controller.settle().await;

            storage.fail_writes.store(true, Ordering::SeqCst);
            assert_eq!(controller.toggle_reminder("8658"), Some(false));
            controller.settle().await;

            assert!(controller.message("8658").unwrap().has_reminder);
            assert_eq!(controller.error(), Some("Could not save reminder"));
        }
    }

    #[tokio::test]
    async fn test_reminder_on_unknown_id_does_nothing() {
        let (mut controller, _) = setup(RollbackPolicy::Unified).await;
        assert_eq!(controller.toggle_reminder("ghost"), None);
        assert_eq!(controller.pending(), 0);
    }

    #[tokio::test]
    async fn test_drag_moves_by_offset_and_keeps_other_fields() {
        let (mut controller, storage) = setup(RollbackPolicy::Unified).await;
        let before = controller.message("8658").unwrap().clone();

        assert!(controller.finish_drag("8658", -40.0, 16.0));
        controller.settle().await;

        let after = controller.message("8658").unwrap().clone();
        assert_eq!(after.position, Some(Position::new(320.0, -34.0)));
        assert_eq!(
            Message {
                position: before.position,
                ..after
            },
            before
        );

        let persisted = storage.list_messages().await.unwrap();
        let stored = persisted.iter().find(|m| m.id == "8658").unwrap();
        assert_eq!(stored.position, Some(Position::new(320.0, -34.0)));
    }

    #[tokio::test]
    async fn test_pinned_card_does_not_move() {
        let (mut controller, _) = setup(RollbackPolicy::Unified).await;
        controller.toggle_pin("8658");
        assert!(!controller.finish_drag("8658", 100.0, 100.0));
        assert_eq!(controller.pending(), 0);
        assert_eq!(
            controller.message("8658").unwrap().position,
            Some(Position::new(360.0, -50.0))
        );
    }

    #[tokio::test]
    async fn test_failed_drag_depends_on_policy() {
        let (mut unified, storage) = setup(RollbackPolicy::Unified).await;
        storage.fail_writes.store(true, Ordering::SeqCst);
        unified.finish_drag("8658", 10.0, 10.0);
        unified.settle().await;
        assert_eq!(
            unified.message("8658").unwrap().position,
            Some(Position::new(360.0, -50.0))
        );
        assert_eq!(unified.error(), Some("Could not save position"));

        let (mut legacy, storage) = setup(RollbackPolicy::Legacy).await;
        storage.fail_writes.store(true, Ordering::SeqCst);
        legacy.finish_drag("8658", 10.0, 10.0);
        legacy.settle().await;
        assert_eq!(
            legacy.message("8658").unwrap().position,
            Some(Position::new(370.0, -40.0))
        );
        assert!(legacy.error().is_none());
    }

    #[tokio::test]
    async fn test_style_update_and_failure_policies() {
        let (mut controller, _) = setup(RollbackPolicy::Unified).await;
        assert!(controller.update_style("8658", note_color("blue")));
        controller.settle().await;
        assert_eq!(controller.message("8658").unwrap().style_key(), "blue");

        let (mut unified, storage) = setup(RollbackPolicy::Unified).await;
        storage.fail_writes.store(true, Ordering::SeqCst);
        unified.update_style("8658", note_color("pink"));
        unified.settle().await;
        assert_eq!(unified.message("8658").unwrap().style_key(), "white");
        assert_eq!(unified.error(), Some("Could not save style"));

        let (mut legacy, storage) = setup(RollbackPolicy::Legacy).await;
        storage.fail_writes.store(true, Ordering::SeqCst);
        legacy.update_style("8658", note_color("pink"));
        legacy.settle().await;
        assert_eq!(legacy.message("8658").unwrap().style_key(), "pink");
        assert_eq!(legacy.error(), Some("Could not save style"));
    }

    #[tokio::test]
    async fn test_failed_write_does_not_undo_newer_change() {
        let mut storage = FlakyStorage::new().await;
        storage.reject_color = Some("pink");
        let (mut controller, storage) = start(RollbackPolicy::Unified, storage).await;

        controller.update_style("8658", note_color("pink"));
        controller.update_style("8658", note_color("blue"));
        controller.settle().await;

        assert_eq!(controller.message("8658").unwrap().style_key(), "blue");
        assert_eq!(controller.error(), Some("Could not save style"));
        let persisted = storage.list_messages().await.unwrap();
        assert_eq!(
            persisted.iter().find(|m| m.id == "8658").unwrap().style_key(),
            "blue"
        );
    }

    #[tokio::test]
    async fn test_style_update_ignores_selector_of_other_kind() {
        let (mut controller, _) = setup(RollbackPolicy::Unified).await;
        controller.update_style(
            "8658",
            StyleUpdate {
                style_id: Some("noir".to_string()),
                note_color_id: None,
            },
        );
        controller.settle().await;

        let message = controller.message("8658").unwrap();
        assert!(matches!(
            &message.body,
            MessageBody::Text { note_color_id, .. } if note_color_id == "white"
        ));
    }

    #[tokio::test]
    async fn test_bring_to_front_orders_interactions() {
        let (mut controller, _) = setup(RollbackPolicy::Unified).await;

        let a1 = controller.bring_to_front("8658").unwrap();
        let b = controller.bring_to_front("7052").unwrap();
        let a2 = controller.bring_to_front("8658").unwrap();

        assert!(a2 > b && b > a1);
        assert_eq!(controller.stacking_index("8658"), a2);
        assert_eq!(controller.bring_to_front("missing"), None);
    }

    #[tokio::test]
    async fn test_settings_update_roundtrip_and_rollback() {
        let (mut controller, storage) = setup(RollbackPolicy::Unified).await;
        let midnight = Settings {
            theme_id: "midnight".to_string(),
            ..Settings::default()
        };

        controller.update_settings(midnight.clone());
        assert_eq!(controller.settings(), &midnight);
        controller.settle().await;
        assert_eq!(storage.get_settings().await.unwrap(), midnight);

        storage.fail_writes.store(true, Ordering::SeqCst);
        controller.update_settings(Settings {
            theme_id: "sakura".to_string(),
            ..Settings::default()
        });
        controller.settle().await;
        assert_eq!(controller.settings(), &midnight);
        assert_eq!(controller.error(), Some("Could not save settings"));
    }

    #[tokio::test]
    async fn test_clear_error() {
        let (mut controller, storage) = setup(RollbackPolicy::Unified).await;
        storage.fail_writes.store(true, Ordering::SeqCst);
        controller.print(MessageDraft::text("x"));
        controller.settle().await;
        assert!(controller.error().is_some());
        controller.clear_error();
        assert!(controller.error().is_none());
    }
}
