//! Post-execution analysis
//!
//! Advisory only: enrichment adds metadata but never changes `success`,
//! `exit_code` or the execution state.

mod errors;
mod fuel;

pub use errors::{classify_error, ErrorGuidance, ErrorType, STDERR_SCAN_LIMIT};
pub use fuel::{analyze_fuel, detect_heavy_imports, FuelAnalysis, FuelStatus};

use tracing::warn;

use crate::runtime::Language;
use crate::sandbox::SandboxResult;

/// Add `error_guidance` (failed runs only) and `fuel_analysis` to a result.
pub fn enrich(result: &mut SandboxResult, fuel_budget: u64, source: &str, language: Language) {
    if !result.success {
        let trap_kind = result.trap.as_ref().map(|t| t.kind);
        let trap_message = result.trap.as_ref().map(|t| t.message.as_str());
        if let Some(guidance) = classify_error(trap_kind, trap_message, &result.stderr) {
            insert(result, "error_guidance", &guidance);
        }
    }

    let fuel = analyze_fuel(result.fuel_consumed, fuel_budget).with_source(source, language);
    insert(result, "fuel_analysis", &fuel);
}

fn insert<T: serde::Serialize>(result: &mut SandboxResult, key: &str, value: &T) {
    match serde_json::to_value(value) {
        Ok(value) => result.set_metadata(key, value),
        Err(e) => warn!(key, error = %e, "Failed to serialize analysis"),
    }
}
