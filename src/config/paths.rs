//! Canonical paths for memoiries state.
//!
//! The directories themselves are resolved in [`crate::config`].
//!
//! ## Layout
//!
//! | Location | Contents |
//! |----------|----------|
//! | `cache/` | Cached draft and session, one JSON file per key |
//! | `records/items/` | One JSON document per item |
//! | `records/users/` | One JSON document per profile |
//! | `assets/users/{owner}/items/{item}/` | Uploaded photos and audio |

use std::path::{Path, PathBuf};

/// Item document inside a record store root
pub fn item_document(records_root: &Path, item_id: &str) -> PathBuf {
    records_root.join("items").join(format!("{}.json", item_id))
}
