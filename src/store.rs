use crate::models::{Message, MessageBody, Position, StyleUpdate};
use crate::storage::apply_style;
use std::collections::HashMap;
use std::sync::Arc;

/// Stacking index every card starts at; anything brought to front sits above it.
pub const BASE_STACKING_INDEX: u32 = 30;

/// Shallow change set for a single message. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePatch {
    pub position: Option<Position>,
    pub is_pinned: Option<bool>,
    pub has_reminder: Option<bool>,
    pub style: Option<StyleUpdate>,
}

impl MessagePatch {
    pub fn apply(&self, message: &mut Message) {
        if let Some(position) = self.position {
            message.position = Some(position);
        }
        if let Some(pinned) = self.is_pinned {
            message.is_pinned = pinned;
        }
        if let Some(reminder) = self.has_reminder {
            message.has_reminder = reminder;
        }
        if let Some(style) = &self.style {
            apply_style(message, style);
        }
    }

    /// True when every field this patch sets already holds the patched value,
    /// i.e. nothing newer has overwritten it.
    pub fn is_reflected_in(&self, message: &Message) -> bool {
        let style_matches = |style: &StyleUpdate| match &message.body {
            MessageBody::Text { note_color_id, .. } => style
                .note_color_id
                .as_ref()
                .is_none_or(|color| color == note_color_id),
            MessageBody::Image { style_id, .. } => {
                style.style_id.as_ref().is_none_or(|id| id == style_id)
            }
        };

        self.position.is_none_or(|p| message.position == Some(p))
            && self.is_pinned.is_none_or(|v| message.is_pinned == v)
            && self.has_reminder.is_none_or(|v| message.has_reminder == v)
            && self.style.as_ref().is_none_or(style_matches)
    }
}

/// In-memory, newest-first list of the cards on the desk.
///
/// Every mutation swaps in a fresh vector, so a snapshot handed to the view
/// never changes underneath it.
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: Arc<Vec<Message>>,
}

impl MessageStore {
    pub fn snapshot(&self) -> Arc<Vec<Message>> {
        Arc::clone(&self.messages)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    pub fn replace_all(&mut self, messages: Vec<Message>) {
        self.messages = Arc::new(messages);
    }

    pub fn prepend(&mut self, message: Message) {
        let mut next = Vec::with_capacity(self.messages.len() + 1);
        next.push(message);
        next.extend(self.messages.iter().cloned());
        self.messages = Arc::new(next);
    }

    /// Re-inserts a message at `index` (clamped), used to undo a removal.
    pub fn insert_at(&mut self, index: usize, message: Message) {
        let mut next = self.messages.as_ref().clone();
        next.insert(index.min(next.len()), message);
        self.messages = Arc::new(next);
    }

    /// Removes the message and reports where it was.
    pub fn remove(&mut self, id: &str) -> Option<(usize, Message)> {
        let index = self.index_of(id)?;
        let mut next = self.messages.as_ref().clone();
        let removed = next.remove(index);
        self.messages = Arc::new(next);
        Some((index, removed))
    }

    /// Returns false when no message carries `id`.
    pub fn update(&mut self, id: &str, patch: &MessagePatch) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        let mut next = self.messages.as_ref().clone();
        patch.apply(&mut next[index]);
        self.messages = Arc::new(next);
        true
    }
}

/// Front-to-back order among overlapping cards.
#[derive(Debug)]
pub struct StackingOrder {
    top: u32,
    indices: HashMap<String, u32>,
}

impl Default for StackingOrder {
    fn default() -> Self {
        Self {
            top: BASE_STACKING_INDEX,
            indices: HashMap::new(),
        }
    }
}

impl StackingOrder {
    pub fn bring_to_front(&mut self, id: &str) -> u32 {
        self.top += 1;
        self.indices.insert(id.to_string(), self.top);
        self.top
    }

    pub fn index_of(&self, id: &str) -> u32 {
        self.indices
            .get(id)
            .copied()
            .unwrap_or(BASE_STACKING_INDEX)
    }

    pub fn forget(&mut self, id: &str) {
        self.indices.remove(id);
    }
}
