// ── Domain model ──

mod event;
mod identity;
mod object;

pub use event::{ChangeEvent, Operation};
pub use identity::{FqName, ObjectId, ObjectKey, ResourceType};
pub use object::{CachedObject, RefSlot};
