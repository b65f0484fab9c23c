use serde::{de::DeserializeOwned, Serialize};

/// Values a query can hold: JSON round-trippable and shareable across tasks
pub trait QueryData: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> QueryData for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}
