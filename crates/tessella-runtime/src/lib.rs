//! # Tessella Runtime
//!
//! The per-frame page streaming pipeline of the Tessella virtual texturing
//! library:
//! - **Resolver**: analyzes the page-id feedback image and issues bounded,
//!   prioritized load requests
//! - **Provider**: fulfills requests on worker threads and queues the
//!   completions for the main thread
//! - **Virtual texture**: applies completions to the physical tables and
//!   rebuilds the indirection table
//!
//! A frame looks like:
//!
//! ```text
//! resolver.begin_page_id_pass()
//!     ... renderer writes page ids into resolver.feedback_mut() ...
//! resolver.end_page_id_pass(&mut textures, &provider)
//! provider.take_ready_queue(&mut completed)
//! for texture in &mut textures { texture.frame_update(&completed, true) }
//! ```
//!
//! Only the main thread touches the tables, the caches and the resolver;
//! workers touch nothing but the page files and the completion queue.

pub mod provider;
pub mod resolver;
pub mod virtual_texture;

pub use provider::{FulfilledPageRequestQueue, PageProvider, MAX_OUTSTANDING_PAGE_REQUESTS};
pub use resolver::{FeedbackBuffer, PageResolver, DEFAULT_FEEDBACK_HEIGHT, DEFAULT_FEEDBACK_WIDTH};
pub use virtual_texture::{SharedIndirectionTable, VirtualTexture, VirtualTextureError, VirtualTextureOptions};

use serde::Deserialize;

/// Runtime-tunable streaming options, loadable from a settings file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamingOptions {
    /// Fulfil page loads on pool workers; off runs them inline on the main
    /// thread (profiling and debugging).
    pub async_loads: bool,
    /// Feedback target width in pixels.
    pub feedback_width: usize,
    /// Feedback target height in pixels.
    pub feedback_height: usize,
}

impl Default for StreamingOptions {
    fn default() -> Self {
        Self {
            async_loads: true,
            feedback_width: DEFAULT_FEEDBACK_WIDTH,
            feedback_height: DEFAULT_FEEDBACK_HEIGHT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_options_defaults() {
        let options = StreamingOptions::default();
        assert!(options.async_loads);
        assert_eq!(options.feedback_width, 256);
        assert_eq!(options.feedback_height, 128);
    }

    #[test]
    fn test_pipeline_from_options() {
        use std::sync::Arc;
        use tessella_core::job::JobSystem;

        let options = StreamingOptions {
            async_loads: false,
            feedback_width: 64,
            feedback_height: 32,
        };

        let resolver = PageResolver::from_options(&options);
        assert_eq!(resolver.feedback().width(), 64);
        assert_eq!(resolver.feedback().height(), 32);
        assert_eq!(resolver.max_page_requests_per_frame(), 64 * 32);

        let provider = PageProvider::from_options(Arc::new(JobSystem::new(1)), &options);
        assert!(!provider.is_async());
    }
}
