//! Response DTOs for the admin API
//!
//! Defines the structure of outgoing HTTP response bodies.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::cache::CacheStats;

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: CacheStats,
    /// Hit rate (hits / (hits + misses + expired))
    pub hit_rate: f64,
}

impl StatsResponse {
    /// Creates a new StatsResponse from a counter snapshot
    pub fn new(stats: CacheStats) -> Self {
        let hit_rate = stats.hit_rate();
        Self { stats, hit_rate }
    }
}

/// Response body for bulk deletions (POST /invalidate_all, POST /clean_expired)
#[derive(Debug, Clone, Serialize)]
pub struct CountsResponse {
    pub message: String,
    /// Deleted record count per family
    pub deleted: BTreeMap<String, u64>,
    pub total: u64,
}

impl CountsResponse {
    pub fn new(message: impl Into<String>, deleted: BTreeMap<String, u64>) -> Self {
        let total = deleted.values().sum();
        Self {
            message: message.into(),
            deleted,
            total,
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Active backing engine
    pub engine: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy(engine: impl Into<String>) -> Self {
        Self {
            status: "healthy".to_string(),
            engine: engine.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_response_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 15,
            expired: 5,
            ..CacheStats::default()
        };
        let resp = StatsResponse::new(stats);
        assert!((resp.hit_rate - 0.8).abs() < 0.001);
    }

    #[test]
    fn test_stats_response_flattens_counters() {
        let resp = StatsResponse::new(CacheStats::default());
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["hits"], 0);
        assert_eq!(json["broken"], 0);
        assert_eq!(json["hit_rate"], 0.0);
    }

    #[test]
    fn test_counts_response_total() {
        let mut deleted = BTreeMap::new();
        deleted.insert("illust_detail".to_string(), 3);
        deleted.insert("search_illust".to_string(), 2);

        let resp = CountsResponse::new("ok", deleted);
        assert_eq!(resp.total, 5);
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("illust_detail"));
    }

    #[test]
    fn test_health_response_serialize() {
        let resp = HealthResponse::healthy("document");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("document"));
        assert!(json.contains("timestamp"));
    }
}
