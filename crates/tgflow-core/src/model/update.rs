//! The decoded update and its payload variants.

use serde::de::Error as _;
use serde::ser::{Error as _, SerializeMap};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use super::types::*;
use crate::decoder::UpdateDecoder;

/// Payload of a field name this build does not know about.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownPayload {
    /// Field name as received.
    pub field: String,
    /// Raw payload.
    pub value: Value,
}

/// Generates [`UpdateKind`], its field table and [`UpdateVisitor`] from one list,
/// so the precedence order, the decoder and the visitor never drift apart.
macro_rules! update_kinds {
    ($($(#[$doc:meta])* $variant:ident($payload:ty) => $field:literal, $visit:ident;)+) => {
        /// The single payload carried by an [`Update`].
        #[derive(Debug, Clone, PartialEq)]
        pub enum UpdateKind {
            $($(#[$doc])* $variant($payload),)+
            /// A payload under a field name not listed in [`UpdateKind::FIELDS`].
            Unknown(UnknownPayload),
        }

        impl UpdateKind {
            /// Known payload field names, in decode precedence order.
            pub const FIELDS: &'static [&'static str] = &[$($field),+];

            /// Returns the field name the payload travels under.
            pub fn field_name(&self) -> &str {
                match self {
                    $(Self::$variant(_) => $field,)+
                    Self::Unknown(unknown) => unknown.field.as_str(),
                }
            }

            /// Decodes a payload for a known field; `None` for unknown fields.
            pub(crate) fn from_field(field: &str, value: Value) -> Option<serde_json::Result<Self>> {
                match field {
                    $($field => Some(serde_json::from_value(value).map(Self::$variant)),)+
                    _ => None,
                }
            }

            pub(crate) fn payload_value(&self) -> serde_json::Result<Value> {
                match self {
                    $(Self::$variant(payload) => serde_json::to_value(payload),)+
                    Self::Unknown(unknown) => Ok(unknown.value.clone()),
                }
            }
        }

        /// Visitor over the payload of an update.
        ///
        /// Every known variant has a callback that falls back to
        /// [`visit_other`](UpdateVisitor::visit_other) unless overridden.
        pub trait UpdateVisitor {
            /// Value produced by the visit.
            type Output;

            $(
                #[doc = concat!("Called for `", $field, "` updates.")]
                fn $visit(&mut self, update: &Update, payload: &$payload) -> Self::Output {
                    let _ = payload;
                    self.visit_other(update)
                }
            )+

            /// Called for unknown payloads and for variants without an override.
            fn visit_other(&mut self, update: &Update) -> Self::Output;
        }

        impl Update {
            /// Invokes exactly one visitor callback matching the payload.
            pub fn resolve<V: UpdateVisitor + ?Sized>(&self, visitor: &mut V) -> V::Output {
                match &self.kind {
                    $(UpdateKind::$variant(payload) => visitor.$visit(self, payload),)+
                    UpdateKind::Unknown(_) => visitor.visit_other(self),
                }
            }
        }
    };
}

update_kinds! {
    /// New incoming message.
    Message(Message) => "message", visit_message;
    /// New version of a known message.
    EditedMessage(Message) => "edited_message", visit_edited_message;
    /// New channel post.
    ChannelPost(Message) => "channel_post", visit_channel_post;
    /// New version of a known channel post.
    EditedChannelPost(Message) => "edited_channel_post", visit_edited_channel_post;
    /// Reaction change by a known user.
    MessageReaction(MessageReactionUpdated) => "message_reaction", visit_message_reaction;
    /// Anonymous reaction counts.
    MessageReactionCount(MessageReactionCountUpdated) => "message_reaction_count", visit_message_reaction_count;
    InlineQuery(InlineQuery) => "inline_query", visit_inline_query;
    ChosenInlineResult(ChosenInlineResult) => "chosen_inline_result", visit_chosen_inline_result;
    CallbackQuery(CallbackQuery) => "callback_query", visit_callback_query;
    ShippingQuery(ShippingQuery) => "shipping_query", visit_shipping_query;
    PreCheckoutQuery(PreCheckoutQuery) => "pre_checkout_query", visit_pre_checkout_query;
    Poll(Poll) => "poll", visit_poll;
    PollAnswer(PollAnswer) => "poll_answer", visit_poll_answer;
    /// The bot's own membership changed.
    MyChatMember(ChatMemberUpdated) => "my_chat_member", visit_my_chat_member;
    /// Another member's status changed.
    ChatMember(ChatMemberUpdated) => "chat_member", visit_chat_member;
    ChatJoinRequest(ChatJoinRequest) => "chat_join_request", visit_chat_join_request;
    ChatBoost(ChatBoostUpdated) => "chat_boost", visit_chat_boost;
    RemovedChatBoost(ChatBoostRemoved) => "removed_chat_boost", visit_removed_chat_boost;
}

/// One event emitted by the platform.
///
/// Serializes back to the wire shape it was decoded from: `update_id`, the
/// payload under its original field name, then any preserved extra fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    /// Identifier, strictly increasing within one bot.
    pub update_id: i64,
    /// The payload.
    pub kind: UpdateKind,
    /// Top-level fields kept by the decoder besides `update_id` and the payload.
    pub extra: Extra,
}

impl Update {
    /// Creates an update without extra fields.
    pub fn new(update_id: i64, kind: UpdateKind) -> Self {
        Self {
            update_id,
            kind,
            extra: Extra::new(),
        }
    }

    /// Returns the payload's field name.
    pub fn field_name(&self) -> &str {
        self.kind.field_name()
    }

    /// Returns the message for any of the four message-like variants.
    pub fn message(&self) -> Option<&Message> {
        match &self.kind {
            UpdateKind::Message(m)
            | UpdateKind::EditedMessage(m)
            | UpdateKind::ChannelPost(m)
            | UpdateKind::EditedChannelPost(m) => Some(m),
            _ => None,
        }
    }

    /// Returns the chat the update happened in, when the payload has one.
    pub fn chat(&self) -> Option<&Chat> {
        match &self.kind {
            UpdateKind::MessageReaction(r) => Some(&r.chat),
            UpdateKind::MessageReactionCount(r) => Some(&r.chat),
            UpdateKind::CallbackQuery(q) => q.message.as_ref().map(|m| &m.chat),
            UpdateKind::MyChatMember(m) | UpdateKind::ChatMember(m) => Some(&m.chat),
            UpdateKind::ChatJoinRequest(r) => Some(&r.chat),
            UpdateKind::ChatBoost(b) => Some(&b.chat),
            UpdateKind::RemovedChatBoost(b) => Some(&b.chat),
            _ => self.message().map(|m| &m.chat),
        }
    }

    /// Converts back to the raw wire shape.
    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

impl Serialize for Update {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let payload = self.kind.payload_value().map_err(S::Error::custom)?;
        let mut map = serializer.serialize_map(Some(2 + self.extra.len()))?;
        map.serialize_entry("update_id", &self.update_id)?;
        map.serialize_entry(self.kind.field_name(), &payload)?;
        for (key, value) in &self.extra {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Update {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        UpdateDecoder::default()
            .decode(&raw)
            .map_err(D::Error::custom)
    }
}
