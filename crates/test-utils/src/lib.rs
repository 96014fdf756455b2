//! Shared helpers for zapflow integration tests.

pub mod db;
