//! Rust implementation of the broadcast scheduling core.
//!
//! Computes posting schedules that maximize the expected time a broadcaster's
//! newest post spends in the top-k of its followers' feeds, under a total
//! rate budget and per-slot ceilings. The `simulator` module validates the
//! analytic objective by direct simulation.

pub mod baseline;
pub mod cache;
pub mod config;
pub mod estimation;
pub mod logging;
pub mod models;
pub mod objective;
pub mod optimizer;
pub mod planning;
pub mod simulator;

#[cfg(feature = "python")]
mod python;

pub use baseline::{inverse_competitor_weights, water_fill, SharePolicy, MIN_COMPETITOR_RATE};
pub use cache::{EstimateCache, EstimateKey};
pub use config::{
    ConfigError, EvaluationConfig, Fairness, GradientMethod, Integration, ObjectiveConfig,
    OptimizerConfig, PlannerConfig, SimulationConfig,
};
pub use estimation::{estimate_connection_probability, estimate_intensity};
pub use models::{
    AccountId, AllocationConstraints, ConnectionProbability, EventSequence, FollowerProfile,
    IntensityFunction, ModelError, ObservationWindow, SlotGrid,
};
pub use objective::{expected_top_k, Objective, ObjectiveError, VisibilityObjective};
pub use optimizer::{optimize, project, OptimizeError, OptimizeResult, Termination};
pub use planning::{
    compare_by_simulation, derive_upper_bounds, evaluate_schedule, learn_profiles, plan_schedule,
    EvaluationReport, EventSource, InMemoryEventSource, PlanError, ScheduleReport, ScheduleRequest,
    SourceError,
};
pub use simulator::{
    sample_from_intensity, sample_poisson, simulate_top_k, simulate_with_config, time_in_top_k,
    MonteCarloSummary,
};
