//! Background tasks owned by the cache.

pub(crate) mod janitor;
