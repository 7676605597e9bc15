//! Container and orchestrator detection.
//!
//! Container runtimes are identified by an ordered list of independent heuristics. Every
//! heuristic runs and all matches are kept as evidence; the classification is the strongest
//! match. Orchestrator indicators are collected separately and reported together.
mod checks;
mod detect;
mod error;

pub use checks::{find_container_id, is_non_empty_hex_string};
pub use detect::{
    Confidence, ContainerDetection, Evidence, NONE_DETECTED, detect_container,
    orchestrator_indicators,
};
pub use error::{Error, Result};

use crate::context::ProbeContext;
use crate::report::{Entry, Fragment};

pub const SECTION: &str = "Container Environment";

/// Container and orchestrator detector.
pub fn probe(ctx: &ProbeContext) -> Fragment {
    let detection = detect_container(ctx);
    let mut fragment = Fragment::builder(SECTION);
    fragment.push(Entry::value("Container runtime", detection.label()));

    for evidence in &detection.evidence {
        let indicators = evidence
            .matched_indicators
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("; ");
        fragment.push(
            Entry::value("Evidence", &evidence.candidate_label)
                .with_note(format!("{} confidence: {indicators}", evidence.confidence)),
        );
    }

    let orchestrators = orchestrator_indicators(ctx);
    let orchestrator = if orchestrators.is_empty() {
        NONE_DETECTED.to_owned()
    } else {
        orchestrators.join(", ")
    };
    fragment.push(Entry::value("Orchestrator", orchestrator));

    fragment.build()
}
