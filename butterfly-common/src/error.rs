//! Error types and utilities for butterfly-osm toolkit
//!
//! Provides the error taxonomy shared by the isochrone engine and its
//! collaborators, plus fuzzy matching for misspelled costing names.

use strsim::{jaro_winkler, normalized_levenshtein};
use thiserror::Error;

/// Costing names accepted at the request boundary.
///
/// Kept in sync with `TravelMode::from_name` in butterfly-iso.
pub const VALID_COSTINGS: &[&str] = &[
    "auto",
    "car",
    "bicycle",
    "bike",
    "pedestrian",
    "foot",
    "multimodal",
];

/// Find the best fuzzy match using a blend of Jaro-Winkler and normalized Levenshtein
///
/// Jaro-Winkler (70%) favours shared prefixes ("pedestrain" -> "pedestrian"),
/// Levenshtein (30%) catches dropped letters ("bicyle" -> "bicycle").
fn find_best_fuzzy_match(input: &str, candidates: &[&str]) -> Option<String> {
    let input_lower = input.to_lowercase();
    let mut best_match = None;
    let mut best_score = 0.0f64;

    // Below this the suggestion is more noise than help ("xyz" -> "bike")
    let min_threshold = 0.7;

    for candidate in candidates {
        let jw_score = jaro_winkler(&input_lower, candidate);
        let lev_score = normalized_levenshtein(&input_lower, candidate);
        let combined_score = (jw_score * 0.7) + (lev_score * 0.3);

        if combined_score > best_score && combined_score >= min_threshold {
            best_score = combined_score;
            best_match = Some(candidate.to_string());
        }
    }

    best_match
}

/// Suggest a correction for a potentially misspelled costing name
///
/// Returns `None` for exact (case-insensitive) matches and for inputs that
/// are not close to any known costing.
pub fn suggest_correction(costing: &str) -> Option<String> {
    if VALID_COSTINGS
        .iter()
        .any(|valid| valid.eq_ignore_ascii_case(costing))
    {
        return None;
    }

    find_best_fuzzy_match(costing, VALID_COSTINGS)
}

/// Main error type for butterfly-osm isochrone operations
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed request: no origins, bad thresholds, bad knobs
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Request is well-formed but exceeds a configured service limit
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    /// Costing name not recognized
    #[error("Unknown costing '{name}'{}", suggestion_suffix(.suggestion))]
    UnknownCosting {
        name: String,
        suggestion: Option<String>,
    },

    /// None of the request origins could be located on the graph
    #[error("Location unreachable: no origin could be located on the graph")]
    LocationUnreachable,

    /// Graph storage could not provide the tile holding this node
    #[error("Tile unavailable for node {0}")]
    TileUnavailable(u32),

    /// Cost model failed internally while scoring an edge
    #[error("Costing failed: {0}")]
    Costing(String),

    /// Graph file could not be decoded
    #[error("Graph format error: {0}")]
    GraphFormat(String),

    /// Engine configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(", did you mean '{s}'?"),
        None => String::new(),
    }
}

impl Error {
    /// Build an `UnknownCosting` error, attaching a fuzzy suggestion when one exists
    pub fn unknown_costing(name: &str) -> Self {
        Error::UnknownCosting {
            name: name.to_string(),
            suggestion: suggest_correction(name),
        }
    }

    /// True for errors caused by the caller (bad request) rather than the service
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_) | Error::LimitExceeded(_) | Error::UnknownCosting { .. }
        )
    }
}

/// Result type alias for butterfly-osm operations
pub type Result<T> = std::result::Result<T, Error>;
