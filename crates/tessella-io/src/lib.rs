//! # Tessella IO
//!
//! Disk boundary of the Tessella virtual texturing library:
//! - **Format**: reader and writer for the packed VTFF page file format
//! - **Page files**: the backing-store trait and its VTFF, debug and
//!   unpacked-image implementations
//! - **Overlay**: per-page debug text and border stamping
//! - **Dumps**: PNG snapshots of the runtime tables

pub mod dump;
pub mod format;
pub mod overlay;
pub mod page_file;

pub use format::{PageDirectory, PixelFormat, VtffError, VtffHeader};
pub use page_file::{DebugPageFile, PageFile, PageRequestPacket, UnpackedPageFile, VtffPageFile};
