//! Chat-keyed cache of message pages with optimistic insert and rollback.
//!
//! Every chat entry carries a fetch generation. Cancelling bumps the
//! generation and a fetch only writes its result while its generation is
//! still current, so an optimistic insert can never be clobbered by a fetch
//! that started before it. While an `OptimisticHold` is alive for a chat, its
//! loaded pages are served from memory and no fetch result is written.

use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use parking_lot::Mutex as SyncMutex;
use shared::domain::{Chat, ChatId, ChatMessage, MessageId, MessagePage};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{api::ChatApi, config::MAX_PAGE_SIZE, events::ClientEvent};

/// Two-level cache key: the chat list, and message pages nested under it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKey {
    Chats,
    ChatMessages(ChatId),
}

impl QueryKey {
    /// Whether invalidating `self` also invalidates `other`.
    pub fn covers(&self, other: &QueryKey) -> bool {
        match (self, other) {
            (QueryKey::Chats, _) => true,
            (QueryKey::ChatMessages(a), QueryKey::ChatMessages(b)) => a == b,
            (QueryKey::ChatMessages(_), QueryKey::Chats) => false,
        }
    }
}

/// Pages of one chat as they were immediately before an optimistic insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    chat_id: ChatId,
    pages: Option<Vec<MessagePage>>,
}

impl Snapshot {
    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    pub fn pages(&self) -> Option<&[MessagePage]> {
        self.pages.as_deref()
    }
}

type Holds = Arc<SyncMutex<HashMap<ChatId, usize>>>;

/// Keeps a chat's pages pinned while an optimistic entry is unsettled.
#[derive(Debug)]
pub struct OptimisticHold {
    holds: Holds,
    chat_id: ChatId,
}

impl Drop for OptimisticHold {
    fn drop(&mut self) {
        let mut holds = self.holds.lock();
        if let Some(count) = holds.get_mut(&self.chat_id) {
            *count -= 1;
            if *count == 0 {
                holds.remove(&self.chat_id);
            }
        }
    }
}

#[derive(Default)]
struct PagesEntry {
    pages: Option<Vec<MessagePage>>,
    stale: bool,
    generation: u64,
    refetch: Option<JoinHandle<()>>,
}

impl PagesEntry {
    fn cancel_fetches(&mut self) {
        self.generation += 1;
        if let Some(task) = self.refetch.take() {
            task.abort();
        }
    }

    fn is_fresh(&self) -> bool {
        self.pages.is_some() && !self.stale
    }
}

#[derive(Default)]
struct CacheState {
    chats: Option<Vec<Chat>>,
    chats_stale: bool,
    messages: HashMap<ChatId, PagesEntry>,
}

pub struct MessageCache {
    api: Arc<dyn ChatApi>,
    page_size: u32,
    state: Mutex<CacheState>,
    holds: Holds,
    events: broadcast::Sender<ClientEvent>,
}

impl MessageCache {
    pub fn new(
        api: Arc<dyn ChatApi>,
        page_size: u32,
        events: broadcast::Sender<ClientEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            api,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
            state: Mutex::new(CacheState::default()),
            holds: Arc::new(SyncMutex::new(HashMap::new())),
            events,
        })
    }

    pub async fn pages(&self, chat_id: ChatId) -> Option<Vec<MessagePage>> {
        let guard = self.state.lock().await;
        guard
            .messages
            .get(&chat_id)
            .and_then(|entry| entry.pages.clone())
    }

    pub async fn is_stale(&self, key: QueryKey) -> bool {
        let guard = self.state.lock().await;
        match key {
            QueryKey::Chats => guard.chats_stale,
            QueryKey::ChatMessages(chat_id) => guard
                .messages
                .get(&chat_id)
                .is_some_and(|entry| entry.stale),
        }
    }

    pub async fn has_pending_refetch(&self, chat_id: ChatId) -> bool {
        let guard = self.state.lock().await;
        guard
            .messages
            .get(&chat_id)
            .is_some_and(|entry| entry.refetch.is_some())
    }

    pub async fn snapshot(&self, chat_id: ChatId) -> Snapshot {
        let guard = self.state.lock().await;
        Snapshot {
            chat_id,
            pages: guard
                .messages
                .get(&chat_id)
                .and_then(|entry| entry.pages.clone()),
        }
    }

    /// Prepends `message` to the first page. No-op when the chat has no cached
    /// pages yet or already holds a message with the same id.
    pub async fn insert_optimistic(&self, chat_id: ChatId, message: ChatMessage) -> bool {
        let inserted = {
            let mut guard = self.state.lock().await;
            match guard.messages.get_mut(&chat_id) {
                Some(entry) => prepend_pending(entry, message),
                None => false,
            }
        };
        if inserted {
            let _ = self.events.send(ClientEvent::PagesUpdated { chat_id });
        } else {
            debug!(chat_id = chat_id.0, "cache: optimistic insert skipped");
        }
        inserted
    }

    pub async fn cancel_fetches(&self, chat_id: ChatId) {
        let mut guard = self.state.lock().await;
        if let Some(entry) = guard.messages.get_mut(&chat_id) {
            entry.cancel_fetches();
        }
    }

    pub fn is_held(&self, chat_id: ChatId) -> bool {
        self.holds.lock().contains_key(&chat_id)
    }

    /// Cancels competing fetches, snapshots, then inserts, under one lock.
    ///
    /// Until the returned hold is dropped, loads serve the cached pages and
    /// refetches leave them untouched.
    pub async fn begin_optimistic(
        &self,
        chat_id: ChatId,
        message: ChatMessage,
    ) -> (Snapshot, OptimisticHold) {
        let (snapshot, hold, inserted) = {
            let mut guard = self.state.lock().await;
            let entry = guard.messages.entry(chat_id).or_default();
            entry.cancel_fetches();
            let snapshot = Snapshot {
                chat_id,
                pages: entry.pages.clone(),
            };
            *self.holds.lock().entry(chat_id).or_insert(0) += 1;
            let hold = OptimisticHold {
                holds: Arc::clone(&self.holds),
                chat_id,
            };
            let inserted = prepend_pending(entry, message);
            (snapshot, hold, inserted)
        };
        if inserted {
            let _ = self.events.send(ClientEvent::PagesUpdated { chat_id });
        }
        (snapshot, hold)
    }

    /// Restores the snapshot unconditionally, discarding anything written since.
    pub async fn rollback(&self, snapshot: Snapshot) {
        let chat_id = snapshot.chat_id;
        {
            let mut guard = self.state.lock().await;
            let entry = guard.messages.entry(chat_id).or_default();
            entry.pages = snapshot.pages;
        }
        debug!(chat_id = chat_id.0, "cache: rolled back to snapshot");
        let _ = self.events.send(ClientEvent::PagesUpdated { chat_id });
    }

    /// Marks every entry under `key` stale and refetches loaded message pages
    /// in the background. The chat list is refetched on its next load.
    pub async fn invalidate(self: &Arc<Self>, key: QueryKey) {
        let mut guard = self.state.lock().await;
        if key.covers(&QueryKey::Chats) {
            guard.chats_stale = true;
        }
        let targets: Vec<ChatId> = guard
            .messages
            .keys()
            .copied()
            .filter(|chat_id| key.covers(&QueryKey::ChatMessages(*chat_id)))
            .collect();
        for chat_id in targets {
            let Some(entry) = guard.messages.get_mut(&chat_id) else {
                continue;
            };
            entry.stale = true;
            if entry.pages.is_some() && !self.is_held(chat_id) {
                self.spawn_refetch(chat_id, entry);
            }
        }
    }

    fn spawn_refetch(self: &Arc<Self>, chat_id: ChatId, entry: &mut PagesEntry) {
        entry.cancel_fetches();
        let generation = entry.generation;
        let page_count = entry.pages.as_ref().map_or(1, |pages| pages.len().max(1));
        let cache = Arc::clone(self);
        entry.refetch = Some(tokio::spawn(async move {
            let result = fetch_pages(cache.api.as_ref(), chat_id, page_count, cache.page_size).await;
            cache.finish_refetch(chat_id, generation, result).await;
        }));
    }

    async fn finish_refetch(
        &self,
        chat_id: ChatId,
        generation: u64,
        result: Result<Vec<MessagePage>>,
    ) {
        let updated = {
            let mut guard = self.state.lock().await;
            let Some(entry) = guard.messages.get_mut(&chat_id) else {
                return;
            };
            if entry.generation != generation {
                debug!(chat_id = chat_id.0, "cache: discarding superseded refetch");
                return;
            }
            entry.refetch = None;
            if self.is_held(chat_id) {
                debug!(chat_id = chat_id.0, "cache: refetch discarded while a send is unsettled");
                return;
            }
            match result {
                Ok(pages) => {
                    entry.pages = Some(pages);
                    entry.stale = false;
                    Ok(())
                }
                Err(err) => Err(err),
            }
        };
        match updated {
            Ok(()) => {
                let _ = self.events.send(ClientEvent::PagesUpdated { chat_id });
            }
            Err(err) => {
                warn!(chat_id = chat_id.0, "cache: refetch failed: {err:#}");
                let _ = self.events.send(ClientEvent::Error(format!(
                    "failed to refresh messages for chat {chat_id}: {err:#}"
                )));
            }
        }
    }

    /// Returns fresh pages, fetching the first page when absent or stale.
    pub async fn load(&self, chat_id: ChatId) -> Result<Vec<MessagePage>> {
        let generation = {
            let mut guard = self.state.lock().await;
            let entry = guard.messages.entry(chat_id).or_default();
            if entry.is_fresh() || self.is_held(chat_id) {
                if let Some(pages) = &entry.pages {
                    return Ok(pages.clone());
                }
            }
            entry.generation
        };

        let first = self
            .api
            .list_messages(chat_id, None, self.page_size)
            .await?;

        let pages = {
            let mut guard = self.state.lock().await;
            let entry = guard.messages.entry(chat_id).or_default();
            let pinned = entry.pages.is_some() && self.is_held(chat_id);
            if entry.generation == generation && !pinned {
                entry.pages = Some(vec![first]);
                entry.stale = false;
            } else {
                debug!(chat_id = chat_id.0, "cache: load superseded by a newer mutation");
            }
            entry.pages.clone().unwrap_or_default()
        };
        let _ = self.events.send(ClientEvent::PagesUpdated { chat_id });
        Ok(pages)
    }

    /// Waits for an outstanding background refetch, then loads if still stale.
    pub async fn refresh(&self, chat_id: ChatId) -> Result<Vec<MessagePage>> {
        let pending = {
            let mut guard = self.state.lock().await;
            guard
                .messages
                .get_mut(&chat_id)
                .and_then(|entry| entry.refetch.take())
        };
        if let Some(task) = pending {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    warn!(chat_id = chat_id.0, "cache: refetch task failed: {err}");
                }
            }
        }
        self.load(chat_id).await
    }

    /// Appends the next older page. Returns false when there is nothing older.
    pub async fn load_older(&self, chat_id: ChatId) -> Result<bool> {
        let (generation, cursor) = {
            let guard = self.state.lock().await;
            let Some(entry) = guard.messages.get(&chat_id) else {
                return Ok(false);
            };
            let cursor = entry
                .pages
                .as_ref()
                .and_then(|pages| pages.last())
                .and_then(|page| page.next_cursor);
            (entry.generation, cursor)
        };
        let Some(cursor) = cursor else {
            return Ok(false);
        };

        let page = self
            .api
            .list_messages(chat_id, Some(cursor), self.page_size)
            .await?;

        let appended = {
            let mut guard = self.state.lock().await;
            match guard.messages.get_mut(&chat_id) {
                Some(entry) if entry.generation == generation => match entry.pages.as_mut() {
                    Some(pages) => {
                        pages.push(page);
                        true
                    }
                    None => false,
                },
                _ => false,
            }
        };
        if appended {
            let _ = self.events.send(ClientEvent::PagesUpdated { chat_id });
        }
        Ok(appended)
    }

    pub async fn chats(&self) -> Option<Vec<Chat>> {
        self.state.lock().await.chats.clone()
    }

    pub async fn cached_chat(&self, chat_id: ChatId) -> Option<Chat> {
        let guard = self.state.lock().await;
        guard
            .chats
            .as_ref()
            .and_then(|chats| chats.iter().find(|chat| chat.chat_id == chat_id).cloned())
    }

    pub async fn load_chats(&self) -> Result<Vec<Chat>> {
        {
            let guard = self.state.lock().await;
            if let (Some(chats), false) = (&guard.chats, guard.chats_stale) {
                return Ok(chats.clone());
            }
        }
        let chats = self.api.list_chats().await?;
        {
            let mut guard = self.state.lock().await;
            guard.chats = Some(chats.clone());
            guard.chats_stale = false;
        }
        let _ = self.events.send(ClientEvent::ChatsUpdated);
        Ok(chats)
    }

    /// Inserts or replaces one chat in the cached chat list.
    pub async fn upsert_chat(&self, chat: Chat) {
        {
            let mut guard = self.state.lock().await;
            let chats = guard.chats.get_or_insert_with(Vec::new);
            match chats.iter_mut().find(|cached| cached.chat_id == chat.chat_id) {
                Some(cached) => *cached = chat,
                None => chats.push(chat),
            }
        }
        let _ = self.events.send(ClientEvent::ChatsUpdated);
    }

    /// Tears down everything cached for a deleted chat.
    pub async fn remove_chat(&self, chat_id: ChatId) {
        {
            let mut guard = self.state.lock().await;
            if let Some(mut entry) = guard.messages.remove(&chat_id) {
                entry.cancel_fetches();
            }
            if let Some(chats) = guard.chats.as_mut() {
                chats.retain(|chat| chat.chat_id != chat_id);
            }
        }
        let _ = self.events.send(ClientEvent::ChatRemoved { chat_id });
    }

    /// Seeds pages directly, as a completed fetch would.
    pub async fn set_pages(&self, chat_id: ChatId, pages: Vec<MessagePage>) {
        {
            let mut guard = self.state.lock().await;
            let entry = guard.messages.entry(chat_id).or_default();
            entry.cancel_fetches();
            entry.pages = Some(pages);
            entry.stale = false;
        }
        let _ = self.events.send(ClientEvent::PagesUpdated { chat_id });
    }
}

fn prepend_pending(entry: &mut PagesEntry, mut message: ChatMessage) -> bool {
    let Some(first) = entry.pages.as_mut().and_then(|pages| pages.first_mut()) else {
        return false;
    };
    if first.messages.iter().any(|existing| existing.id == message.id) {
        return false;
    }
    message.pending = true;
    first.messages.insert(0, message);
    true
}

async fn fetch_pages(
    api: &dyn ChatApi,
    chat_id: ChatId,
    page_count: usize,
    page_size: u32,
) -> Result<Vec<MessagePage>> {
    let mut pages = Vec::with_capacity(page_count);
    let mut cursor: Option<MessageId> = None;
    for _ in 0..page_count {
        let page = api.list_messages(chat_id, cursor, page_size).await?;
        cursor = page.next_cursor;
        pages.push(page);
        if cursor.is_none() {
            break;
        }
    }
    Ok(pages)
}

#[cfg(test)]
#[path = "tests/cache_tests.rs"]
mod tests;
