use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw property record as the RentCast API returns it.
///
/// Only the fields the portal reads are typed; everything else rides along
/// in `extra` so cached payloads keep the full upstream data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PropertyRecord {
    pub address: Option<String>,
    pub price: Option<f64>,
    pub last_sale_price: Option<f64>,
    /// Top-level rent, as returned by the rent-estimate endpoint.
    pub rent: Option<f64>,
    pub rent_estimate: Option<RentEstimate>,
    pub bedrooms: Option<f64>,
    pub bathrooms: Option<f64>,
    pub square_footage: Option<f64>,
    pub year_built: Option<i32>,
    pub property_type: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RentEstimate {
    pub rent: Option<f64>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl PropertyRecord {
    /// Asking price, falling back to the last recorded sale.
    pub fn effective_price(&self) -> Option<f64> {
        self.price.or(self.last_sale_price)
    }

    /// Monthly rent from whichever shape the endpoint returned.
    pub fn monthly_rent(&self) -> Option<f64> {
        self.rent
            .or_else(|| self.rent_estimate.as_ref().and_then(|r| r.rent))
    }
}

/// The API returns a bare object or an array of objects depending on the
/// endpoint and match count.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PropertiesResponse {
    Many(Vec<PropertyRecord>),
    One(Box<PropertyRecord>),
}

impl PropertiesResponse {
    pub fn into_first(self) -> Option<PropertyRecord> {
        match self {
            PropertiesResponse::One(record) => Some(*record),
            PropertiesResponse::Many(records) => records.into_iter().next(),
        }
    }
}

/// Investment analysis computed from rent and price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentMetrics {
    pub gross_yield_percent: f64,
    pub net_yield_percent: f64,
    pub monthly_cash_flow: f64,
    pub annual_cash_flow: f64,
    pub cap_rate_percent: f64,
    pub down_payment_required: f64,
    pub estimated_monthly_expenses: f64,
}

/// Placeholder insights until the neighborhood data sources are wired in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeighborhoodInsights {
    pub walkability: String,
    pub school_district: String,
    pub crime_rate: String,
    pub appreciation_trend: String,
}

impl Default for NeighborhoodInsights {
    fn default() -> Self {
        let unavailable = "Data not available".to_string();
        Self {
            walkability: unavailable.clone(),
            school_district: unavailable.clone(),
            crime_rate: unavailable.clone(),
            appreciation_trend: unavailable,
        }
    }
}

/// Enriched property payload: the raw upstream record plus derived fields.
///
/// This is what the cache stores and what callers receive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertyData {
    #[serde(flatten)]
    pub record: PropertyRecord,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_score: Option<u8>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition_assessment: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub investment_metrics: Option<InvestmentMetrics>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub neighborhood_insights: Option<NeighborhoodInsights>,
}

impl From<PropertyRecord> for PropertyData {
    fn from(record: PropertyRecord) -> Self {
        Self {
            record,
            market_score: None,
            condition_assessment: None,
            investment_metrics: None,
            neighborhood_insights: None,
        }
    }
}
