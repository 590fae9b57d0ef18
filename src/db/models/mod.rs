//! Client-side data models.
//! This module re-exports individual model modules so imports like
//! `use crate::db::models::*;` pick up every type.

pub mod delivery_preferences;
pub mod notification;

pub use self::delivery_preferences::*;
pub use self::notification::*;
