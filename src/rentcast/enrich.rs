/// Derived analytics computed on fetched property data before it is cached.
///
/// Enrichment is best-effort: anything that cannot be computed from the
/// available fields is simply left unset, and the raw record passes through
/// untouched.
use chrono::{Datelike, Utc};

use super::types::{InvestmentMetrics, NeighborhoodInsights, PropertyData};

// Expense and financing assumptions behind the cash-flow model:
// 30% of rent to expenses, 20% down, 0.6%/month mortgage payment factor.
const EXPENSE_RATIO: f64 = 0.30;
const DOWN_PAYMENT_RATIO: f64 = 0.20;
const MONTHLY_MORTGAGE_FACTOR: f64 = 0.006;

/// Full enrichment for property-details responses.
pub fn enrich_property(data: &mut PropertyData) {
    data.market_score = Some(market_score(data));
    data.condition_assessment = Some(condition_assessment(data.record.year_built).to_string());
    data.neighborhood_insights = Some(NeighborhoodInsights::default());
    data.investment_metrics =
        investment_metrics(data.record.monthly_rent(), data.record.effective_price());
}

/// Rent-estimate responses only carry enough for the investment math.
pub fn enrich_rent_estimate(data: &mut PropertyData) {
    data.investment_metrics =
        investment_metrics(data.record.monthly_rent(), data.record.effective_price());
}

/// Market attractiveness score, 1-100.
fn market_score(data: &PropertyData) -> u8 {
    let mut score: i32 = 50;

    if let (Some(rent), Some(price)) = (data.record.monthly_rent(), data.record.effective_price()) {
        if rent > 0.0 && price > 0.0 {
            let price_to_rent = price / (rent * 12.0);
            if price_to_rent < 15.0 {
                score += 20;
            } else if price_to_rent < 20.0 {
                score += 10;
            } else if price_to_rent > 25.0 {
                score -= 10;
            }
        }
    }

    if let Some(year_built) = data.record.year_built {
        let age = Utc::now().year() - year_built;
        if age < 10 {
            score += 15;
        } else if age < 20 {
            score += 10;
        } else if age > 50 {
            score -= 10;
        }
    }

    if let Some(sqft) = data.record.square_footage {
        if sqft > 2000.0 {
            score += 10;
        } else if sqft < 1000.0 {
            score -= 5;
        }
    }

    score.clamp(1, 100) as u8
}

fn condition_assessment(year_built: Option<i32>) -> &'static str {
    let year_built = match year_built {
        Some(year) => year,
        None => return "Unknown - Insufficient Data",
    };

    let age = Utc::now().year() - year_built;
    if age < 5 {
        "Excellent - New Construction"
    } else if age < 15 {
        "Very Good - Modern"
    } else if age < 30 {
        "Good - Well Maintained"
    } else if age < 50 {
        "Fair - May Need Updates"
    } else {
        "Older - Likely Needs Renovation"
    }
}

fn investment_metrics(rent: Option<f64>, price: Option<f64>) -> Option<InvestmentMetrics> {
    let (rent, price) = match (rent, price) {
        (Some(rent), Some(price)) if rent > 0.0 && price > 0.0 => (rent, price),
        _ => return None,
    };

    let annual_rent = rent * 12.0;
    let gross_yield = annual_rent / price * 100.0;

    let annual_expenses = rent * EXPENSE_RATIO * 12.0;
    let net_annual_income = annual_rent - annual_expenses;
    let net_yield = net_annual_income / price * 100.0;

    let down_payment = price * DOWN_PAYMENT_RATIO;
    let loan_amount = price - down_payment;
    let monthly_mortgage = loan_amount * MONTHLY_MORTGAGE_FACTOR;
    let monthly_cash_flow = rent - monthly_mortgage - annual_expenses / 12.0;

    Some(InvestmentMetrics {
        gross_yield_percent: round2(gross_yield),
        net_yield_percent: round2(net_yield),
        monthly_cash_flow: round2(monthly_cash_flow),
        annual_cash_flow: round2(monthly_cash_flow * 12.0),
        cap_rate_percent: round2(net_yield),
        down_payment_required: round2(down_payment),
        estimated_monthly_expenses: round2(annual_expenses / 12.0),
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
