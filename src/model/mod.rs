// File: ./src/model/mod.rs
pub mod heading;
pub mod identity;
pub mod item;
pub mod render;
pub mod validate;

pub use heading::{LocalHeading, Schedule};
pub use identity::{HeadingAnchor, IdentityRecord};
pub use item::{Item, ItemStatus, RawItem};
pub use validate::{Partition, Rejection};
