pub mod events;
pub mod media;
pub mod message;
pub mod session;

pub use events::{NewMessages, PushEvent, SessionDeltas};
pub use media::{MediaClass, MediaKey, MediaRef, VideoInfo};
pub use message::{Message, MessageKey, MessageKind, MessageOrder, MessagePage};
pub use session::Session;
