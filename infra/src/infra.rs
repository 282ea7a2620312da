pub mod chan;
pub mod event;
pub mod module;
pub mod queue;
pub mod redis_client;
pub mod repository;
