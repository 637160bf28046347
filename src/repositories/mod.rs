//! External service access: the hosted keyed store.

mod store;

pub use store::StoreRepository;
