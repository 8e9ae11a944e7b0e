// Adapters layer: concrete implementations of the domain ports (storage, order API, references, email)

pub mod notifier;
pub mod order_api;
pub mod references;
pub mod storage;
