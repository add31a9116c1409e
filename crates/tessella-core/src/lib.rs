//! # Tessella Core
//!
//! Core pieces of the Tessella virtual texturing library:
//! - **Page ids**: packed 32-bit identifiers shared with the feedback pass
//! - **Page cache**: fixed 16x16 slot pool with strict LRU replacement
//! - **Page table**: CPU model of the physical cache texture, two mip levels
//! - **Indirection**: per-mip virtual-to-physical translation tables
//! - **Jobs**: the worker-thread pool behind the asynchronous page provider
//!
//! The indirection table texel layout is a whole-library decision made once
//! at startup via [`init`]; every table created afterwards uses it.

pub mod cache;
pub mod indirection;
pub mod job;
pub mod page_id;
pub mod page_table;

pub use cache::{CacheEntry, CachePageStatus, CachePageTree, CacheStats, PageCacheMgr, PageSlot};
pub use indirection::PageIndirectionTable;
pub use job::JobSystem;
pub use page_id::{CachePageCoord, PageId};
pub use page_table::PageTable;

use once_cell::sync::OnceCell;
use serde::Deserialize;
use thiserror::Error;

/// Maximum number of mip levels a virtual texture can carry.
pub const MAX_MIP_LEVELS: usize = 16;

/// Texel layout used by every indirection table the library creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndirectionTableFormat {
    /// 16 bits per entry. Compact, slightly costlier address translation.
    Rgb565,
    /// 32 bits per entry. Twice the memory, cheapest address translation.
    Rgba8888,
}

/// Library initialization errors.
#[derive(Error, Debug)]
pub enum InitError {
    #[error("library already initialized with indirection format {0:?}")]
    AlreadyInitialized(IndirectionTableFormat),

    #[error("library not initialized; call tessella_core::init first")]
    NotInitialized,
}

static INDIRECTION_TABLE_FORMAT: OnceCell<IndirectionTableFormat> = OnceCell::new();

/// Initialize the library, fixing the indirection table format for the
/// process lifetime. Idempotent when called again with the same format.
pub fn init(format: IndirectionTableFormat) -> Result<(), InitError> {
    if let Some(&existing) = INDIRECTION_TABLE_FORMAT.get() {
        if existing == format {
            return Ok(());
        }
        return Err(InitError::AlreadyInitialized(existing));
    }

    let _ = INDIRECTION_TABLE_FORMAT.set(format);
    log::info!("Tessella initialized, indirection table format {:?}", format);
    Ok(())
}

/// The indirection table format selected at init, if any.
pub fn indirection_table_format() -> Option<IndirectionTableFormat> {
    INDIRECTION_TABLE_FORMAT.get().copied()
}
