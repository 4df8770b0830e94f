pub(crate) mod chats;
pub(crate) mod health;
pub(crate) mod jobs;
pub(crate) mod stream;
