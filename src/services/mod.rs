pub mod comments;
pub mod feed;
pub mod likes;
pub mod posts;
pub mod session;
pub mod thread;
