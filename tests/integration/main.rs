//! Integration test driver for the `tests/integration/` submodules.
//!
//! Each `mod` below maps to a file that exercises one part of the link
//! against mock host adapters, a queue channel and a manual clock.

mod update_chunk_tests;
mod update_finish_tests;
