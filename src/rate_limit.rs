// =============================================================================
// Rate Limiter — priority-aware weight/request accounting + circuit breaker
// =============================================================================
//
// Binance enforces a per-IP budget of 2400 request weight and 1200 raw
// requests per rolling 60 s window. This tracker partitions that budget by
// caller priority so a background scanner (LOW) can never starve an order
// placement (CRITICAL), and opens a local circuit breaker the moment the
// exchange itself reports a rate-limit violation.
//
// All state lives behind one `parking_lot::Mutex`; every operation is a
// single critical section, matching the "one lock covers one logical unit"
// discipline used for the other shared components in this crate.
// =============================================================================

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const WINDOW: Duration = Duration::from_secs(60);
const MIN_WAIT: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(30 * 60);
const SCAN_RESERVE_FRACTION: f64 = 0.20;
const SCAN_NEAR_RESET: Duration = Duration::from_secs(10);

/// Caller priority. Determines the fraction of the window's budget a caller
/// may consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
}

impl Priority {
    fn budget_fraction(self) -> f64 {
        match self {
            Self::Critical => 0.95,
            Self::High => 0.80,
            Self::Normal => 0.60,
            Self::Low => 0.40,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Normal => "NORMAL",
            Self::Low => "LOW",
        }
    }
}

/// Outcome of `try_acquire`.
#[derive(Debug, Clone)]
pub struct AcquireResult {
    pub acquired: bool,
    pub wait_time: Duration,
    pub reason: Option<String>,
    pub weight_budget: u32,
    pub usage_pct: f64,
}

/// Outcome of `get_adaptive_scan_budget`.
#[derive(Debug, Clone, Copy)]
pub struct ScanBudget {
    pub item_budget: u32,
    pub should_throttle: bool,
    pub wait_time: Duration,
}

/// Serialisable snapshot of the limiter's internal counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub current_weight: u32,
    pub request_count: u32,
    pub max_weight: u32,
    pub max_requests: u32,
    pub circuit_open: bool,
    pub consecutive_errors: u32,
}

struct State {
    current_weight: u32,
    weight_reset_at: Instant,
    request_count: u32,
    request_reset_at: Instant,
    circuit_open: bool,
    ban_until: Option<Instant>,
    consecutive_errors: u32,
}

/// Weight/request accounting with priority budgets and a circuit breaker.
pub struct RateLimiter {
    max_weight: u32,
    max_requests: u32,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(max_weight: u32, max_requests: u32) -> Self {
        let now = Instant::now();
        Self {
            max_weight,
            max_requests,
            state: Mutex::new(State {
                current_weight: 0,
                weight_reset_at: now + WINDOW,
                request_count: 0,
                request_reset_at: now + WINDOW,
                circuit_open: false,
                ban_until: None,
                consecutive_errors: 0,
            }),
        }
    }

    /// Endpoint weight for a small closed set of well-known paths; unknown
    /// endpoints default to weight 1.
    pub fn endpoint_weight(endpoint: &str) -> u32 {
        match endpoint {
            "/fapi/v2/account" | "/fapi/v2/positionRisk" | "/fapi/v1/allOrders" | "/fapi/v1/klines" => 5,
            "/fapi/v1/allOpenOrders" => 40,
            "/fapi/v1/income" | "/fapi/v1/positionSide/dual" => 30,
            _ => 1,
        }
    }

    fn roll_windows(state: &mut State, now: Instant) {
        if now >= state.weight_reset_at {
            state.current_weight = 0;
            state.weight_reset_at = now + WINDOW;
        }
        if now >= state.request_reset_at {
            state.request_count = 0;
            state.request_reset_at = now + WINDOW;
        }
        if let Some(ban_until) = state.ban_until {
            if now >= ban_until {
                state.circuit_open = false;
                state.ban_until = None;
            }
        }
    }

    /// Attempt to reserve budget for one call to `endpoint` at `priority`.
    /// Single atomic check-and-record.
    pub fn try_acquire(&self, endpoint: &str, priority: Priority) -> AcquireResult {
        let weight = Self::endpoint_weight(endpoint);
        let now = Instant::now();
        let mut state = self.state.lock();
        Self::roll_windows(&mut state, now);

        if state.circuit_open {
            let wait_time = state
                .ban_until
                .map(|b| b.saturating_duration_since(now))
                .unwrap_or(MIN_WAIT)
                .max(MIN_WAIT);
            debug!(endpoint, priority = priority.label(), "acquire rejected: circuit open");
            return AcquireResult {
                acquired: false,
                wait_time,
                reason: Some("circuit_breaker_open".to_string()),
                weight_budget: self.max_weight,
                usage_pct: state.current_weight as f64 / self.max_weight as f64,
            };
        }

        let weight_cap = (self.max_weight as f64 * priority.budget_fraction()) as u32;
        let request_cap = (self.max_requests as f64 * priority.budget_fraction()) as u32;

        if state.current_weight + weight > weight_cap {
            let wait_time = state.weight_reset_at.saturating_duration_since(now).max(MIN_WAIT);
            warn!(
                endpoint,
                priority = priority.label(),
                current_weight = state.current_weight,
                weight_cap,
                "acquire rejected: weight budget exceeded"
            );
            return AcquireResult {
                acquired: false,
                wait_time,
                reason: Some(format!("weight_limit_exceeded_for_{}", priority.label())),
                weight_budget: weight_cap,
                usage_pct: state.current_weight as f64 / self.max_weight as f64,
            };
        }

        if state.request_count + 1 > request_cap {
            let wait_time = state.request_reset_at.saturating_duration_since(now).max(MIN_WAIT);
            warn!(
                endpoint,
                priority = priority.label(),
                request_count = state.request_count,
                request_cap,
                "acquire rejected: request-count budget exceeded"
            );
            return AcquireResult {
                acquired: false,
                wait_time,
                reason: Some(format!("request_limit_exceeded_for_{}", priority.label())),
                weight_budget: weight_cap,
                usage_pct: state.current_weight as f64 / self.max_weight as f64,
            };
        }

        state.current_weight += weight;
        state.request_count += 1;
        state.consecutive_errors = 0;
        debug!(
            endpoint,
            priority = priority.label(),
            weight,
            current_weight = state.current_weight,
            "acquire accepted"
        );

        AcquireResult {
            acquired: true,
            wait_time: Duration::ZERO,
            reason: None,
            weight_budget: weight_cap,
            usage_pct: state.current_weight as f64 / self.max_weight as f64,
        }
    }

    /// Blocking variant: retries `try_acquire` in slices up to 5 s until
    /// `timeout` elapses or a slot is acquired.
    pub async fn wait_for_slot(&self, endpoint: &str, priority: Priority, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let result = self.try_acquire(endpoint, priority);
            if result.acquired {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let remaining = deadline.saturating_duration_since(now);
            let sleep_for = result.wait_time.min(Duration::from_secs(5)).min(remaining);
            tokio::time::sleep(sleep_for).await;
        }
    }

    /// Open the circuit. If `ban_until_ms` is a plausible future timestamp
    /// (within 24h), it is used directly; otherwise an exponential backoff
    /// derived from `consecutive_errors` is applied.
    pub fn record_rate_limit_error(&self, ban_until_ms: Option<i64>) {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut state = self.state.lock();
        state.consecutive_errors += 1;

        let ban_duration = match ban_until_ms {
            Some(ms) if ms > now_ms && ms - now_ms < 24 * 3_600_000 => {
                Duration::from_millis((ms - now_ms) as u64)
            }
            _ => {
                let minutes = 1u64 << state.consecutive_errors.min(10);
                Duration::from_secs(minutes * 60).min(MAX_BACKOFF)
            }
        };

        state.circuit_open = true;
        state.ban_until = Some(Instant::now() + ban_duration);
        warn!(
            consecutive_errors = state.consecutive_errors,
            ban_seconds = ban_duration.as_secs(),
            "circuit breaker opened after rate-limit error"
        );
    }

    /// Reconcile local accounting upward to the exchange-reported value.
    /// Never moves the counter downward.
    pub fn update_from_headers(&self, used_weight_1m: u32) {
        let mut state = self.state.lock();
        if used_weight_1m > state.current_weight {
            state.current_weight = used_weight_1m;
        }
    }

    /// Compute how many `weight_per_item` scan calls still fit in the LOW
    /// priority budget this window, reserving `SCAN_RESERVE_FRACTION` of the
    /// total budget for higher-priority traffic.
    pub fn get_adaptive_scan_budget(&self, weight_per_item: u32) -> ScanBudget {
        let now = Instant::now();
        let mut state = self.state.lock();
        Self::roll_windows(&mut state, now);

        let remaining_time = state.weight_reset_at.saturating_duration_since(now);
        if remaining_time < SCAN_NEAR_RESET {
            return ScanBudget {
                item_budget: 0,
                should_throttle: true,
                wait_time: remaining_time,
            };
        }

        let low_cap = (self.max_weight as f64 * Priority::Low.budget_fraction()) as u32;
        let reserved = (self.max_weight as f64 * SCAN_RESERVE_FRACTION) as u32;
        let usable = low_cap.saturating_sub(reserved);
        let remaining_weight = usable.saturating_sub(state.current_weight.min(usable));
        let weight_per_item = weight_per_item.max(1);
        let item_budget = remaining_weight / weight_per_item;

        let usage_pct = state.current_weight as f64 / self.max_weight as f64;
        let should_throttle = usage_pct > 0.5;

        ScanBudget {
            item_budget,
            should_throttle,
            wait_time: Duration::ZERO,
        }
    }

    pub fn snapshot(&self) -> RateLimitSnapshot {
        let state = self.state.lock();
        RateLimitSnapshot {
            current_weight: state.current_weight,
            request_count: state.request_count,
            max_weight: self.max_weight,
            max_requests: self.max_requests,
            circuit_open: state.circuit_open,
            consecutive_errors: state.consecutive_errors,
        }
    }

    /// Parse the exchange's literal `"banned until <ms>"` error tail. Uses an
    /// anchored match rather than scanning the whole message for numbers, so
    /// an unrelated digit run elsewhere in the body cannot be misread as the
    /// ban timestamp.
    pub fn parse_ban_until(message: &str) -> Option<i64> {
        const MARKER: &str = "banned until ";
        let idx = message.find(MARKER)?;
        let rest = &message[idx + MARKER.len()..];
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            None
        } else {
            digits.parse().ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_caps_are_respected() {
        let limiter = RateLimiter::new(1000, 1000);
        // LOW cap is 40% = 400. Use the heaviest known endpoint so the loop
        // terminates in a handful of iterations rather than hundreds.
        let mut accepted_weight = 0u32;
        loop {
            let r = limiter.try_acquire("/fapi/v1/allOpenOrders", Priority::Low);
            if !r.acquired {
                break;
            }
            accepted_weight += 40;
        }
        assert!(accepted_weight <= 400);
    }

    #[test]
    fn klines_carries_weight_5() {
        assert_eq!(RateLimiter::endpoint_weight("/fapi/v1/klines"), 5);
    }

    #[test]
    fn circuit_breaker_blocks_until_ban_expires() {
        let limiter = RateLimiter::new(1000, 1000);
        limiter.record_rate_limit_error(None);
        let r = limiter.try_acquire("/fapi/v1/order", Priority::Critical);
        assert!(!r.acquired);
        assert_eq!(r.reason.as_deref(), Some("circuit_breaker_open"));
    }

    #[test]
    fn reason_codes_are_priority_scoped() {
        let limiter = RateLimiter::new(100, 1000);
        // LOW budget = 40% of 100 = 40. Weight 40 fits once.
        let first = limiter.try_acquire("/fapi/v1/allOpenOrders", Priority::Low);
        assert!(first.acquired);
        let second = limiter.try_acquire("/fapi/v1/allOpenOrders", Priority::Low);
        assert!(!second.acquired);
        assert_eq!(
            second.reason.as_deref(),
            Some("weight_limit_exceeded_for_LOW")
        );
    }

    #[test]
    fn update_from_headers_never_moves_down() {
        let limiter = RateLimiter::new(1000, 1000);
        limiter.update_from_headers(500);
        assert_eq!(limiter.snapshot().current_weight, 500);
        limiter.update_from_headers(100);
        assert_eq!(limiter.snapshot().current_weight, 500);
        limiter.update_from_headers(700);
        assert_eq!(limiter.snapshot().current_weight, 700);
    }

    #[test]
    fn adaptive_scan_budget_near_reset_returns_zero() {
        let limiter = RateLimiter::new(1000, 1000);
        {
            let mut state = limiter.state.lock();
            state.weight_reset_at = Instant::now() + Duration::from_secs(5);
        }
        let budget = limiter.get_adaptive_scan_budget(5);
        assert_eq!(budget.item_budget, 0);
        assert!(budget.should_throttle);
    }

    #[test]
    fn parse_ban_until_requires_anchored_marker() {
        let msg = "APIError(code=-1003): Way too many requests; banned until 1700000000000. Please use the websocket...";
        assert_eq!(RateLimiter::parse_ban_until(msg), Some(1_700_000_000_000));
        assert_eq!(RateLimiter::parse_ban_until("no marker here 123456"), None);
    }

    #[test]
    fn successful_acquire_resets_consecutive_errors() {
        let limiter = RateLimiter::new(1000, 1000);
        limiter.record_rate_limit_error(Some(0));
        {
            let mut state = limiter.state.lock();
            state.circuit_open = false;
            state.ban_until = None;
        }
        assert_eq!(limiter.snapshot().consecutive_errors, 1);
        limiter.try_acquire("/fapi/v1/order", Priority::Critical);
        assert_eq!(limiter.snapshot().consecutive_errors, 0);
    }
}
