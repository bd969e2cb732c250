//! Run artifacts written to the output directory.
//!
//! # Output Structure
//!
//! ```text
//! output_dir/
//! ├── 2024-05-08.json             # Run report
//! ├── 01-plasmodesmal-closure.jpg # Card for rank 1
//! └── 02-….jpg
//! ```

pub mod json;
