//! Test Helper Utilities
//!
//! Shared utilities for testing nutri-intake

#![allow(dead_code)]

pub mod db_utils;
pub mod engine;
pub mod workbook;

pub use db_utils::{create_test_app_state, create_test_app_state_with, create_test_db, seed_catalogs, stage_workbook};
pub use engine::{approved_body, build_reconciler, build_reconciler_with, ScriptedEngine};
pub use workbook::{nomination_sheet, nomination_workbook, Nomination, SheetSpec, STANDARD_HEADERS};
