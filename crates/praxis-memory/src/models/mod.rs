mod codec;
mod message;
mod query;
mod resource;
mod thread;

pub use message::{
    normalize_message, LegacyContent, LegacyMessage, Message, MessageContent,
    MessageContentUpdate, MessageEnvelope, MessageRole, MessageUpdate, CONTENT_FORMAT,
    DEFAULT_MESSAGE_TYPE,
};
pub use query::{
    DateRange, IncludeRequest, ListMessagesQuery, ListThreadsQuery, MessageFilter, MessagePage,
    PerPage, SortDirection, ThreadOrderBy, ThreadOrderField, ThreadPage,
};
pub use resource::Resource;
pub use thread::Thread;

pub(crate) use codec::merge_metadata;
pub(crate) use message::MIGRATED_FROM_FIELD;

/// Free-form JSON object attached to threads, resources and message content.
pub type Metadata = serde_json::Map<String, serde_json::Value>;
