use crate::schedule::{HarvestEvent, ProductTons};
use crate::schema::{PriceSheet, Product};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Search domain for the IRR root-finder.
pub const IRR_LOWER_BOUND: f64 = -0.99;
pub const IRR_UPPER_BOUND: f64 = 10.0;
const IRR_SCAN_STEPS: usize = 2_000;
const IRR_TOLERANCE: f64 = 1e-10;
const IRR_MAX_ITERATIONS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CashflowEntry {
    pub year: i32,
    pub gross: f64,
    pub net: f64,
    pub years_from_now: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IrrOutcome {
    /// Rate as a fraction (0.08 = 8%).
    Rate { rate: f64 },
    NoSolution,
}

impl IrrOutcome {
    pub fn rate(&self) -> Option<f64> {
        match self {
            IrrOutcome::Rate { rate } => Some(*rate),
            IrrOutcome::NoSolution => None,
        }
    }
}

impl fmt::Display for IrrOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrrOutcome::Rate { rate } => write!(f, "{:.1}%", rate * 100.0),
            IrrOutcome::NoSolution => f.write_str("no solution"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FinancialSummary {
    pub discount_rate: f64,
    pub npv: f64,
    pub irr: IrrOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashflowAnalysis {
    pub entries: Vec<CashflowEntry>,
    pub summary: FinancialSummary,
}

pub fn gross_revenue(tons: &ProductTons, prices: &PriceSheet) -> f64 {
    Product::ALL
        .iter()
        .map(|p| tons.get(*p) * prices.unit_price(*p))
        .sum()
}

/// Gross less logging, trucking and the consulting fee.
pub fn net_revenue(tons: &ProductTons, prices: &PriceSheet) -> f64 {
    let gross = gross_revenue(tons, prices);
    let logging: f64 = Product::ALL
        .iter()
        .map(|p| tons.get(*p) * prices.logging_cost_per_ton(*p))
        .sum();
    let trucking = tons.total() * prices.trucking_rate_per_ton;
    let consulting = prices.consulting_fee_pct / 100.0 * gross;
    gross - logging - trucking - consulting
}

pub fn cashflow_entry(event: &HarvestEvent, prices: &PriceSheet, current_year: i32) -> CashflowEntry {
    CashflowEntry {
        year: event.year,
        gross: gross_revenue(&event.tons, prices),
        net: net_revenue(&event.tons, prices),
        years_from_now: event.year.saturating_sub(current_year).max(0) as u32,
    }
}

pub fn net_present_value(entries: &[CashflowEntry], discount_rate: f64) -> f64 {
    entries
        .iter()
        .map(|c| c.net / (1.0 + discount_rate).powi(c.years_from_now as i32))
        .sum()
}

/// Flat annual net series indexed by years from now, 0..=max.
pub fn annual_net_series(entries: &[CashflowEntry]) -> Vec<f64> {
    let horizon = entries.iter().map(|c| c.years_from_now).max().unwrap_or(0) as usize;
    let mut series = vec![0.0; horizon + 1];
    for entry in entries {
        series[entry.years_from_now as usize] += entry.net;
    }
    series
}

fn present_value(series: &[f64], rate: f64) -> f64 {
    let base = 1.0 + rate;
    series
        .iter()
        .enumerate()
        .map(|(t, v)| v / base.powi(t as i32))
        .sum()
}

/// Internal rate of return of an annual series.
///
/// The domain `[IRR_LOWER_BOUND, IRR_UPPER_BOUND]` is scanned for the first
/// bracket where the present value changes sign, which is then refined by
/// bisection. A series without both positive and negative flows has no root.
pub fn internal_rate_of_return(series: &[f64]) -> IrrOutcome {
    let has_inflow = series.iter().any(|v| *v > 0.0);
    let has_outflow = series.iter().any(|v| *v < 0.0);
    if !(has_inflow && has_outflow) {
        return IrrOutcome::NoSolution;
    }

    let step = (IRR_UPPER_BOUND - IRR_LOWER_BOUND) / IRR_SCAN_STEPS as f64;
    let mut lo = IRR_LOWER_BOUND;
    let mut f_lo = present_value(series, lo);

    for i in 1..=IRR_SCAN_STEPS {
        let hi = IRR_LOWER_BOUND + step * i as f64;
        let f_hi = present_value(series, hi);

        if f_lo.is_finite() && f_hi.is_finite() {
            if f_lo == 0.0 {
                return IrrOutcome::Rate { rate: lo };
            }
            if f_lo.signum() != f_hi.signum() {
                return IrrOutcome::Rate {
                    rate: bisect(series, lo, hi, f_lo),
                };
            }
        }

        lo = hi;
        f_lo = f_hi;
    }

    if f_lo == 0.0 {
        return IrrOutcome::Rate { rate: lo };
    }
    IrrOutcome::NoSolution
}

fn bisect(series: &[f64], mut lo: f64, mut hi: f64, mut f_lo: f64) -> f64 {
    for _ in 0..IRR_MAX_ITERATIONS {
        let mid = 0.5 * (lo + hi);
        let f_mid = present_value(series, mid);
        if f_mid == 0.0 || (hi - lo) < IRR_TOLERANCE {
            return mid;
        }
        if f_mid.signum() == f_lo.signum() {
            lo = mid;
            f_lo = f_mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

/// Cashflow per event plus NPV and IRR.
pub fn analyze_cashflows(
    events: &[HarvestEvent],
    prices: &PriceSheet,
    discount_rate: f64,
    current_year: i32,
) -> CashflowAnalysis {
    let entries: Vec<CashflowEntry> = events
        .iter()
        .map(|e| cashflow_entry(e, prices, current_year))
        .collect();
    for entry in &entries {
        debug!(
            "Cashflow {} (+{}y): gross {:.2}, net {:.2}",
            entry.year, entry.years_from_now, entry.gross, entry.net
        );
    }

    let npv = net_present_value(&entries, discount_rate);
    let irr = internal_rate_of_return(&annual_net_series(&entries));
    info!(
        "NPV at {:.2}%: {:.2}; IRR: {}",
        discount_rate * 100.0,
        npv,
        irr
    );

    CashflowAnalysis {
        entries,
        summary: FinancialSummary {
            discount_rate,
            npv,
            irr,
        },
    }
}
