//! Typed update model.

pub mod types;
pub mod update;

pub use types::{
    CallbackQuery, Chat, ChatBoostRemoved, ChatBoostUpdated, ChatJoinRequest, ChatMemberUpdated,
    ChosenInlineResult, Extra, InlineQuery, Message, MessageReactionCountUpdated,
    MessageReactionUpdated, Poll, PollAnswer, PreCheckoutQuery, ShippingQuery, User,
};
pub use update::{UnknownPayload, Update, UpdateKind, UpdateVisitor};
