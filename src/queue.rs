pub(crate) mod store;
pub(crate) mod types;
pub(crate) mod worker;

pub(crate) use store::QueueStore;
pub(crate) use worker::QueueWorker;
