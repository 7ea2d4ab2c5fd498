//! Result type alias for Sprout operations

use crate::error::SproutError;

/// Standard Result type for Sprout operations
pub type Result<T> = std::result::Result<T, SproutError>;
