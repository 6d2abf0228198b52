use rand::Rng;
use std::time::Duration;

use crate::core::config::RetrySettings;
use crate::core::error::ErrorKind;

use super::transport::{TransportError, TransportReply};

/// Classified outcome of one upstream attempt.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// 2xx with a usable body.
    Success(String),
    /// 404 or a 2xx with nothing in it: absence of data, not a failure.
    NotFound,
    Failure {
        kind: ErrorKind,
        status: Option<u16>,
        retry_after: Option<u64>,
        detail: String,
    },
}

/// Map a completed HTTP exchange onto the retry taxonomy.
pub fn classify_reply(reply: TransportReply) -> Outcome {
    match reply.status {
        200..=299 => {
            let trimmed = reply.body.trim();
            if trimmed.is_empty() || trimmed == "[]" || trimmed == "{}" {
                Outcome::NotFound
            } else {
                Outcome::Success(reply.body)
            }
        }
        401 | 403 => Outcome::Failure {
            kind: ErrorKind::Auth,
            status: Some(reply.status),
            retry_after: None,
            detail: "Invalid API key".to_string(),
        },
        404 => Outcome::NotFound,
        429 => Outcome::Failure {
            kind: ErrorKind::RateLimited,
            status: Some(reply.status),
            retry_after: reply.retry_after,
            detail: "Upstream rate limit".to_string(),
        },
        500..=599 => Outcome::Failure {
            kind: ErrorKind::Server,
            status: Some(reply.status),
            retry_after: None,
            detail: format!("Server error: {}", reply.status),
        },
        other => Outcome::Failure {
            kind: ErrorKind::Unclassified,
            status: Some(other),
            retry_after: None,
            detail: truncate(&reply.body, 120),
        },
    }
}

/// Map a failure that never produced a status code.
pub fn classify_transport_error(err: TransportError) -> Outcome {
    match err {
        TransportError::Timeout => Outcome::Failure {
            kind: ErrorKind::Timeout,
            status: None,
            retry_after: None,
            detail: "Request timeout".to_string(),
        },
        TransportError::Connection(msg) => Outcome::Failure {
            kind: ErrorKind::Connection,
            status: None,
            retry_after: None,
            detail: msg,
        },
    }
}

fn truncate(input: &str, max: usize) -> String {
    input.chars().take(max).collect()
}

/// Exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Connection failures back off from a larger base.
    pub connection_base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            connection_base_delay: Duration::from_millis(settings.connection_base_delay_ms),
        }
    }

    /// `min(max_delay, base * 2^attempt)` plus 10-30% jitter.
    ///
    /// A 429 carrying Retry-After bypasses this entirely and sleeps the
    /// advertised duration, even when it exceeds `max_delay`.
    pub fn backoff_delay(&self, attempt: u32, kind: ErrorKind) -> Duration {
        let base = if kind == ErrorKind::Connection {
            self.connection_base_delay
        } else {
            self.base_delay
        };

        let exp = base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let jitter = exp.mul_f64(rand::thread_rng().gen_range(0.1..0.3));
        exp + jitter
    }

    /// Delay before the next attempt for a retryable failure.
    pub fn delay_for(&self, attempt: u32, kind: ErrorKind, retry_after: Option<u64>) -> Duration {
        match (kind, retry_after) {
            (ErrorKind::RateLimited, Some(secs)) => Duration::from_secs(secs),
            _ => self.backoff_delay(attempt, kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(status: u16, body: &str) -> TransportReply {
        TransportReply {
            status,
            retry_after: None,
            body: body.to_string(),
        }
    }

    fn kind_of(outcome: Outcome) -> Option<ErrorKind> {
        match outcome {
            Outcome::Failure { kind, .. } => Some(kind),
            _ => None,
        }
    }

    #[test]
    fn classification_table() {
        assert!(matches!(
            classify_reply(reply(200, r#"{"price": 1}"#)),
            Outcome::Success(_)
        ));
        assert!(matches!(classify_reply(reply(200, "")), Outcome::NotFound));
        assert!(matches!(classify_reply(reply(200, "[]")), Outcome::NotFound));
        assert!(matches!(classify_reply(reply(404, "")), Outcome::NotFound));
        assert_eq!(kind_of(classify_reply(reply(401, ""))), Some(ErrorKind::Auth));
        assert_eq!(kind_of(classify_reply(reply(403, ""))), Some(ErrorKind::Auth));
        assert_eq!(
            kind_of(classify_reply(reply(429, ""))),
            Some(ErrorKind::RateLimited)
        );
        assert_eq!(
            kind_of(classify_reply(reply(503, ""))),
            Some(ErrorKind::Server)
        );
        assert_eq!(
            kind_of(classify_reply(reply(418, "teapot"))),
            Some(ErrorKind::Unclassified)
        );
    }

    #[test]
    fn retry_after_survives_classification() {
        let outcome = classify_reply(TransportReply {
            status: 429,
            retry_after: Some(2),
            body: String::new(),
        });
        match outcome {
            Outcome::Failure { retry_after, .. } => assert_eq!(retry_after, Some(2)),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn terminal_kinds_are_not_retryable() {
        assert!(!ErrorKind::Auth.is_retryable());
        assert!(!ErrorKind::NotFound.is_retryable());
        assert!(!ErrorKind::Unclassified.is_retryable());
        assert!(ErrorKind::Server.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(ErrorKind::Connection.is_retryable());
        assert!(ErrorKind::RateLimited.is_retryable());
    }

    #[test]
    fn backoff_grows_exponentially_within_bounds() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(10_000),
            connection_base_delay: Duration::from_millis(200),
        };

        for attempt in 0..4 {
            let expected = Duration::from_millis(100 * 2u64.pow(attempt));
            let delay = policy.backoff_delay(attempt, ErrorKind::Server);
            assert!(delay >= expected.mul_f64(1.1), "attempt {}", attempt);
            assert!(delay <= expected.mul_f64(1.3), "attempt {}", attempt);
        }
    }

    #[test]
    fn backoff_is_capped_at_max_delay() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            connection_base_delay: Duration::from_millis(200),
        };
        let delay = policy.backoff_delay(8, ErrorKind::Server);
        assert!(delay <= Duration::from_millis(300).mul_f64(1.3));
    }

    #[test]
    fn connection_failures_use_larger_base() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(10_000),
            connection_base_delay: Duration::from_millis(400),
        };
        let delay = policy.backoff_delay(0, ErrorKind::Connection);
        assert!(delay >= Duration::from_millis(400).mul_f64(1.1));
    }

    #[test]
    fn retry_after_overrides_backoff_even_past_max_delay() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            connection_base_delay: Duration::from_millis(200),
        };
        let delay = policy.delay_for(0, ErrorKind::RateLimited, Some(5));
        assert_eq!(delay, Duration::from_secs(5));
    }
}
