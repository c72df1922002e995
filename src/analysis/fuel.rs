//! Fuel utilization analysis

use serde::{Deserialize, Serialize};

use crate::runtime::Language;

/// Headroom applied on top of observed consumption
const SAFETY_MARGIN: f64 = 1.5;

/// Recommendations are rounded up to this granularity
const RECOMMENDATION_STEP: u64 = 1_000_000;

/// Utilization bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuelStatus {
    /// Under 50% of the budget
    Efficient,
    /// 50% to 75%
    Moderate,
    /// 75% to 90%
    Warning,
    /// 90% up to, not including, 100%
    Critical,
    /// The whole budget was used
    Exhausted,
}

impl FuelStatus {
    fn from_utilization(utilization: f64) -> Self {
        if utilization >= 1.0 {
            FuelStatus::Exhausted
        } else if utilization >= 0.9 {
            FuelStatus::Critical
        } else if utilization >= 0.75 {
            FuelStatus::Warning
        } else if utilization >= 0.5 {
            FuelStatus::Moderate
        } else {
            FuelStatus::Efficient
        }
    }
}

/// Result of [`analyze_fuel`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuelAnalysis {
    pub consumed: u64,
    pub budget: u64,
    /// `consumed / budget`, in `0.0..=1.0`
    pub utilization: f64,
    pub status: FuelStatus,
    /// Suggested `fuel_budget` for similar code
    pub recommended_budget: u64,
    pub message: String,
    /// Heavy dependencies found in the source
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub likely_causes: Vec<String>,
}

impl FuelAnalysis {
    /// Attach heavy-import causes found in `source`
    pub fn with_source(mut self, source: &str, language: Language) -> Self {
        self.likely_causes = detect_heavy_imports(source, language)
            .into_iter()
            .map(|module| format!("importing '{module}' costs a large share of the budget at startup"))
            .collect();
        self
    }
}

/// Analyze how much of `budget` an execution consumed.
pub fn analyze_fuel(consumed: u64, budget: u64) -> FuelAnalysis {
    let utilization = if budget == 0 {
        1.0
    } else {
        (consumed as f64 / budget as f64).min(1.0)
    };
    let status = FuelStatus::from_utilization(utilization);

    let recommended_budget = match status {
        // the real need is unknown; at least double
        FuelStatus::Exhausted => budget.max(1).saturating_mul(2),
        _ => round_up((consumed as f64 * SAFETY_MARGIN).ceil() as u64),
    };

    let percent = utilization * 100.0;
    let message = match status {
        FuelStatus::Efficient => format!("Used {percent:.1}% of the fuel budget"),
        FuelStatus::Moderate => format!("Used {percent:.1}% of the fuel budget; comfortable headroom"),
        FuelStatus::Warning => format!(
            "Used {percent:.1}% of the fuel budget; consider raising it to {recommended_budget}"
        ),
        FuelStatus::Critical => format!(
            "Used {percent:.1}% of the fuel budget; raise it to {recommended_budget} to avoid traps"
        ),
        FuelStatus::Exhausted => format!(
            "Fuel budget of {budget} exhausted; retry with at least {recommended_budget} or reduce the work"
        ),
    };

    FuelAnalysis {
        consumed,
        budget,
        utilization,
        status,
        recommended_budget,
        message,
        likely_causes: Vec::new(),
    }
}

fn round_up(value: u64) -> u64 {
    value.max(1).div_ceil(RECOMMENDATION_STEP).saturating_mul(RECOMMENDATION_STEP)
}

const PYTHON_HEAVY: &[&str] = &[
    "numpy", "pandas", "scipy", "sympy", "matplotlib", "sklearn", "PIL", "networkx", "decimal",
    "email", "asyncio",
];

const JAVASCRIPT_HEAVY: &[&str] = &["std", "os", "bjson"];

/// Known expensive top-level imports referenced by `source`
pub fn detect_heavy_imports(source: &str, language: Language) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for line in source.lines() {
        let line = line.trim_start();
        let modules: Vec<&str> = match language {
            Language::Python => python_imports(line),
            Language::JavaScript => javascript_imports(line),
        };
        let heavy = match language {
            Language::Python => PYTHON_HEAVY,
            Language::JavaScript => JAVASCRIPT_HEAVY,
        };
        for module in modules {
            let root = module.split('.').next().unwrap_or(module);
            if heavy.contains(&root) && !found.iter().any(|m| m == root) {
                found.push(root.to_string());
            }
        }
    }
    found
}

fn python_imports(line: &str) -> Vec<&str> {
    if let Some(rest) = line.strip_prefix("import ") {
        rest.split(',')
            .filter_map(|part| part.split_whitespace().next())
            .collect()
    } else if let Some(rest) = line.strip_prefix("from ") {
        rest.split_whitespace().next().into_iter().collect()
    } else {
        Vec::new()
    }
}

fn javascript_imports(line: &str) -> Vec<&str> {
    if !line.starts_with("import ") {
        return Vec::new();
    }
    line.split(['"', '\''])
        .nth(1)
        .map(|module| vec![module])
        .unwrap_or_default()
}
