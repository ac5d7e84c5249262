//! Persistence of finished record sets.
//!
//! ```text
//! output_dir/
//! └── 2025-05-06/
//!     ├── harvest.json
//!     └── research.json
//! ```

pub mod json;
