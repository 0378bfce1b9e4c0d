//! Static venue table used as labels and base values for latency generation.

pub mod types;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Cloud provider hosting an exchange's matching engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloudProvider {
    #[serde(rename = "AWS")]
    Aws,
    #[serde(rename = "GCP")]
    Gcp,
    #[serde(rename = "Azure")]
    Azure,
}

impl CloudProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aws => "AWS",
            Self::Gcp => "GCP",
            Self::Azure => "Azure",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Aws => "Amazon Web Services",
            Self::Gcp => "Google Cloud Platform",
            Self::Azure => "Microsoft Azure",
        }
    }

    /// Hex color used by map markers and legends.
    pub fn color(&self) -> &'static str {
        match self {
            Self::Aws => "#2563eb",
            Self::Gcp => "#22c55e",
            Self::Azure => "#ef4444",
        }
    }
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
}

/// One row of the static exchange table.
#[derive(Clone, Copy, Debug)]
pub struct ExchangeSpec {
    pub name: &'static str,
    pub location: Location,
    pub cloud: CloudProvider,
    pub region: &'static str,
    pub base_latency_ms: u32,
    /// Public status endpoint used for real round-trip probes, when the venue has one.
    pub probe_url: Option<&'static str>,
}

const SINGAPORE: Location = Location {
    lat: 1.3521,
    lng: 103.8198,
};
const BEIJING: Location = Location {
    lat: 39.9042,
    lng: 116.4074,
};

pub const EXCHANGES: &[ExchangeSpec] = &[
    ExchangeSpec {
        name: "Binance",
        location: SINGAPORE,
        cloud: CloudProvider::Aws,
        region: "Asia Pacific",
        base_latency_ms: 25,
        probe_url: Some("https://api.binance.com/api/v3/ping"),
    },
    ExchangeSpec {
        name: "OKX",
        location: Location {
            lat: 22.3193,
            lng: 114.1694,
        },
        cloud: CloudProvider::Aws,
        region: "Asia Pacific",
        base_latency_ms: 30,
        probe_url: Some("https://www.okx.com/api/v5/public/time"),
    },
    ExchangeSpec {
        name: "Coinbase",
        location: Location {
            lat: 37.7749,
            lng: -122.4194,
        },
        cloud: CloudProvider::Aws,
        region: "US West",
        base_latency_ms: 20,
        probe_url: Some("https://api.coinbase.com/v2/time"),
    },
    ExchangeSpec {
        name: "Kraken",
        location: Location {
            lat: 47.6062,
            lng: -122.3321,
        },
        cloud: CloudProvider::Gcp,
        region: "US West",
        base_latency_ms: 22,
        probe_url: Some("https://api.kraken.com/0/public/Time"),
    },
    ExchangeSpec {
        name: "Bybit",
        location: SINGAPORE,
        cloud: CloudProvider::Azure,
        region: "Asia Pacific",
        base_latency_ms: 28,
        probe_url: Some("https://api.bybit.com/v5/market/time"),
    },
    ExchangeSpec {
        name: "Deribit",
        location: Location {
            lat: 52.3676,
            lng: 4.9041,
        },
        cloud: CloudProvider::Aws,
        region: "Europe",
        base_latency_ms: 35,
        probe_url: None,
    },
    ExchangeSpec {
        name: "FTX",
        location: Location {
            lat: 25.7617,
            lng: -80.1918,
        },
        cloud: CloudProvider::Gcp,
        region: "US East",
        base_latency_ms: 18,
        probe_url: None,
    },
    ExchangeSpec {
        name: "KuCoin",
        location: SINGAPORE,
        cloud: CloudProvider::Azure,
        region: "Asia Pacific",
        base_latency_ms: 32,
        probe_url: None,
    },
    ExchangeSpec {
        name: "Gate.io",
        location: BEIJING,
        cloud: CloudProvider::Aws,
        region: "Asia Pacific",
        base_latency_ms: 40,
        probe_url: None,
    },
    ExchangeSpec {
        name: "Huobi",
        location: BEIJING,
        cloud: CloudProvider::Gcp,
        region: "Asia Pacific",
        base_latency_ms: 38,
        probe_url: None,
    },
];

/// Looks up a venue by its display name (exact match).
pub fn find(name: &str) -> Option<&'static ExchangeSpec> {
    EXCHANGES.iter().find(|e| e.name == name)
}
