//! Tests for the harbor-engine crate.
