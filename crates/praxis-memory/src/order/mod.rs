mod index;
mod serializer;

pub use index::{fresh_score, score_for, OrderEntry, OrderIndex, OrderSnapshot};
pub use serializer::{KeyPermit, UpdateSerializer};
