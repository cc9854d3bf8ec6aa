// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire types for the routing API.

use serde::{Deserialize, Serialize};

/// Body of `POST /matrix/{profile}`. Location 0 is the origin.
#[derive(Debug, Clone, Serialize)]
pub struct MatrixRequest {
    /// `[lng, lat]` pairs.
    pub locations: Vec<[f64; 2]>,
    pub sources: Vec<usize>,
    pub destinations: Vec<usize>,
    pub metrics: Vec<&'static str>,
}

impl MatrixRequest {
    pub fn one_to_many(origin: [f64; 2], destinations: impl IntoIterator<Item = [f64; 2]>) -> Self {
        let mut locations = vec![origin];
        locations.extend(destinations);
        Self {
            destinations: (1..locations.len()).collect(),
            locations,
            sources: vec![0],
            metrics: vec!["distance", "duration"],
        }
    }
}

/// Matrix response. Rows are sources, columns destinations; unreachable
/// cells are `null`.
#[derive(Debug, Clone, Deserialize)]
pub struct MatrixResponse {
    #[serde(default)]
    pub durations: Option<Vec<Vec<Option<f64>>>>,
    #[serde(default)]
    pub distances: Option<Vec<Vec<Option<f64>>>>,
}

/// Body of `POST /isochrones/{profile}`.
#[derive(Debug, Clone, Serialize)]
pub struct IsochroneRequest {
    pub locations: Vec<[f64; 2]>,
    pub range: Vec<u32>,
    pub range_type: &'static str,
}

/// Error body shapes the provider is known to send.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ApiErrorBody {
    Detailed { error: ApiErrorDetail },
    Plain { error: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorDetail {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ApiErrorBody {
    pub fn message(&self) -> String {
        match self {
            ApiErrorBody::Detailed { error } => match (error.code, &error.message) {
                (Some(code), Some(msg)) => format!("{code}: {msg}"),
                (None, Some(msg)) => msg.clone(),
                (Some(code), None) => format!("code {code}"),
                (None, None) => "unknown error".to_string(),
            },
            ApiErrorBody::Plain { error } => error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_to_many_indexes_destinations() {
        let req = MatrixRequest::one_to_many([14.0, 50.0], [[14.1, 50.1], [14.2, 50.2]]);
        assert_eq!(req.locations.len(), 3);
        assert_eq!(req.sources, vec![0]);
        assert_eq!(req.destinations, vec![1, 2]);

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["metrics"], serde_json::json!(["distance", "duration"]));
        assert_eq!(json["locations"][0], serde_json::json!([14.0, 50.0]));
    }

    #[test]
    fn error_bodies_parse() {
        let detailed: ApiErrorBody =
            serde_json::from_str(r#"{"error":{"code":2004,"message":"too many locations"}}"#)
                .unwrap();
        assert_eq!(detailed.message(), "2004: too many locations");

        let plain: ApiErrorBody = serde_json::from_str(r#"{"error":"Access denied"}"#).unwrap();
        assert_eq!(plain.message(), "Access denied");
    }

    #[test]
    fn matrix_response_allows_nulls() {
        let resp: MatrixResponse =
            serde_json::from_str(r#"{"durations":[[600.5,null]],"distances":[[800.0,null]]}"#)
                .unwrap();
        assert_eq!(resp.durations.unwrap()[0], vec![Some(600.5), None]);
    }
}
