//! Cache-impact cost model: turns an analyzer report into
//! per-turn cost estimates under cache-read/cache-write pricing.
//!
//! Kept as a pure function over a context struct, the way the teacher's
//! `decision::decide_stop` separates "gather the inputs" from "compute the
//! answer" — there's nothing to gather here since the caller already holds
//! a `SessionAnalysis`, but the same pure-function shape applies.

use crate::analyze::SessionAnalysis;

pub const DEFAULT_CACHE_HIT_RATE: f64 = 0.90;
const SYSTEM_OVERHEAD: f64 = 20_000.0;

/// Pricing in dollars per million tokens.
#[derive(Debug, Clone, Copy)]
pub struct PricingRow {
    pub cache_write_per_mtok: f64,
    pub cache_read_per_mtok: f64,
}

/// Named rate tables so callers don't have to hand-roll the numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRate {
    Opus4_6,
    Sonnet4_6,
    Custom,
}

impl ModelRate {
    pub fn pricing(self) -> Option<PricingRow> {
        match self {
            ModelRate::Opus4_6 => Some(PricingRow {
                cache_write_per_mtok: 6.25,
                cache_read_per_mtok: 0.50,
            }),
            ModelRate::Sonnet4_6 => Some(PricingRow {
                cache_write_per_mtok: 3.75,
                cache_read_per_mtok: 0.30,
            }),
            ModelRate::Custom => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TurnProjection {
    pub turns: u32,
    pub without_trim: f64,
    pub with_trim: f64,
    pub saved_percent: f64,
}

/// Derived, never persisted.
#[derive(Debug, Clone)]
pub struct CacheImpactReport {
    pub pre_trim_tokens: u64,
    pub post_trim_tokens: u64,
    pub removal_ratio: f64,
    pub cold_cache_first_turn: f64,
    pub warm_cache_steady: f64,
    pub pre_trim_steady: f64,
    pub cache_miss_penalty: f64,
    pub savings_per_turn: f64,
    pub break_even_turns: Option<u32>,
    pub projections: Vec<TurnProjection>,
}

fn per_turn_cost(tokens: f64, cache_hit_rate: f64, rate: PricingRow) -> f64 {
    cache_hit_rate * tokens * rate.cache_read_per_mtok / 1_000_000.0
        + (1.0 - cache_hit_rate) * tokens * rate.cache_write_per_mtok / 1_000_000.0
}

fn cold_cache_cost(tokens: f64, rate: PricingRow) -> f64 {
    tokens * rate.cache_write_per_mtok / 1_000_000.0
}

/// Apply the closed-form model of spec.md §4.6 to an analyzer report.
pub fn analyze_cache_impact(
    report: &SessionAnalysis,
    rate: PricingRow,
    cache_hit_rate: f64,
) -> CacheImpactReport {
    let pre_trim_tokens = report.estimated_tokens;
    let b = &report.breakdown;

    let removed_bytes = b.file_history.bytes as f64
        + b.thinking_signatures.bytes as f64
        + 0.7 * b.tool_results.bytes as f64
        - 35.0 * b.tool_results.count as f64
        + 0.3 * b.tool_use_requests.bytes as f64;
    let removal_ratio = if report.total_bytes == 0 {
        0.0
    } else {
        (removed_bytes / report.total_bytes as f64).clamp(0.0, 0.95)
    };

    let post_trim_tokens_f =
        (pre_trim_tokens as f64 - SYSTEM_OVERHEAD) * (1.0 - removal_ratio) + SYSTEM_OVERHEAD;
    let post_trim_tokens = post_trim_tokens_f.max(0.0).round() as u64;

    let cold_cache_first_turn = cold_cache_cost(post_trim_tokens_f, rate);
    let warm_cache_steady = per_turn_cost(post_trim_tokens_f, cache_hit_rate, rate);
    let pre_trim_steady = per_turn_cost(pre_trim_tokens as f64, cache_hit_rate, rate);

    let cache_miss_penalty = cold_cache_first_turn - pre_trim_steady;
    let savings_per_turn = pre_trim_steady - warm_cache_steady;
    let break_even_turns = if savings_per_turn > 0.0 {
        Some((cache_miss_penalty / savings_per_turn).ceil() as u32 + 1)
    } else {
        None
    };

    let pre_per_turn = pre_trim_steady;
    let projections = [5u32, 10, 20, 50]
        .into_iter()
        .map(|n| {
            let without_trim = pre_per_turn * n as f64;
            let with_trim = cold_cache_first_turn + warm_cache_steady * (n as f64 - 1.0);
            let saved_percent = if without_trim > 0.0 {
                (without_trim - with_trim) / without_trim
            } else {
                0.0
            };
            TurnProjection {
                turns: n,
                without_trim,
                with_trim,
                saved_percent,
            }
        })
        .collect();

    CacheImpactReport {
        pre_trim_tokens,
        post_trim_tokens,
        removal_ratio,
        cold_cache_first_turn,
        warm_cache_steady,
        pre_trim_steady,
        cache_miss_penalty,
        savings_per_turn,
        break_even_turns,
        projections,
    }
}
