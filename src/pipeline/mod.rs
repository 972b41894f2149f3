//! Pipeline stages for grading a scanned answer sheet.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested on its own and the network-facing stage can be stubbed out.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ analyze (× questions)
//! (path/URL) (pdfium)  (base64)   (VLM)
//! ```
//!
//! 1. [`input`]:   read the local file or download the URL, check `%PDF`
//! 2. [`render`]:  rasterise the sheet page; runs in `spawn_blocking`
//!    because pdfium is not async-safe
//! 3. [`encode`]:  JPEG/PNG-encode and base64-wrap the page image
//! 4. [`analyze`]: ask the model about one question and validate the reply;
//!    the only stage with network I/O

pub mod analyze;
pub mod encode;
pub mod input;
pub mod render;
