//! Typed ID definitions for the gateway.

use crate::{define_id, define_key, IdError};

/// Maximum length of a caller-chosen key, in bytes.
pub const MAX_KEY_LEN: usize = 256;

/// Checks that `s` is a usable key: non-empty, at most [`MAX_KEY_LEN`] bytes,
/// and made only of printable ASCII without whitespace.
pub fn validate_key(s: &str) -> Result<(), IdError> {
    if s.is_empty() {
        return Err(IdError::Empty);
    }
    if s.len() > MAX_KEY_LEN {
        return Err(IdError::TooLong {
            len: s.len(),
            max: MAX_KEY_LEN,
        });
    }
    if let Some((position, character)) = s.char_indices().find(|(_, c)| !c.is_ascii_graphic()) {
        return Err(IdError::InvalidCharacter {
            character,
            position,
        });
    }
    Ok(())
}

// =============================================================================
// Caller Keys
// =============================================================================

define_key!(SchedulerId);
define_key!(WorkerId);
define_key!(RequestId);
define_key!(AccountId);

// =============================================================================
// Generated IDs
// =============================================================================

define_id!(CallId, "call");

// =============================================================================
// Tests
// =============================================================================
