//! Intake pipeline services

pub mod aggregator;
pub mod case_builder;
pub mod catalog;
pub mod gateway;
pub mod intake;
pub mod reconciler;
pub mod scheduler;

pub use aggregator::recompute_batch;
pub use catalog::{CatalogLookup, SqliteCatalogLookup};
pub use gateway::{EligibilityEngine, EligibilityGateway, EngineReply, GatewayError, SpiffEngine};
pub use intake::{IntakeError, IntakeReport, IntakeService, IntakeSettings, Upload};
pub use reconciler::{ReconcileError, Reconciler, ReconcilerSettings, RetryReport, RowOutcome, SweepReport};
pub use scheduler::spawn_sweep_scheduler;
