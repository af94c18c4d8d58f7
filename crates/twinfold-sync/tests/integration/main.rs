//! Integration tests for the twinfold sync engine.
//!
//! All tests run against an in-memory implementation of the abstract
//! filesystem port (see [`common`]) and a recording progress reporter, so
//! every scenario can assert both the physical operations performed and
//! the statistics the front-end observed.


mod test_deletion;
mod test_engine;
mod test_moves;
mod test_preflight;
