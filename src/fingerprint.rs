use crate::hashing::sha256_hex;
use crate::session::{SessionConfig, SessionResult};

/// The exact text a session fingerprint is hashed from.
pub fn fingerprint_canonical_string(
    config: &SessionConfig,
    seed_used: Option<u64>,
    order: &[String],
) -> String {
    [
        format!("pack:{}@{}", config.pack_id, config.pack_version),
        format!("order:{}", config.order_policy),
        format!(
            "seed:{}",
            seed_used.map_or_else(|| "null".to_string(), |s| s.to_string())
        ),
        format!(
            "timeout:{}",
            config
                .trial_timeout_ms
                .map_or_else(|| "none".to_string(), |t| t.to_string())
        ),
        format!(
            "break:{}",
            config
                .break_every
                .map_or_else(|| "none".to_string(), |b| b.to_string())
        ),
        format!("words:{}", order.join(",")),
    ]
    .join("\n")
}

pub fn compute_session_fingerprint(
    config: &SessionConfig,
    seed_used: Option<u64>,
    order: &[String],
) -> String {
    sha256_hex(&fingerprint_canonical_string(config, seed_used, order))
}

/// Recomputes a stored session's fingerprint from its own config and realized order.
pub fn recompute_fingerprint(session: &SessionResult) -> String {
    compute_session_fingerprint(&session.config, session.seed_used, &session.stimulus_order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::fixtures::{completed_session, config};
    use crate::session::OrderPolicy;

    fn order() -> Vec<String> {
        vec!["head".into(), "green".into(), "water".into()]
    }

    #[test]
    fn canonical_string_layout() {
        let mut cfg = config();
        cfg.trial_timeout_ms = None;
        assert_eq!(
            fingerprint_canonical_string(&cfg, None, &order()),
            "pack:demo-en@1.0.0\norder:seeded\nseed:null\ntimeout:none\nbreak:none\nwords:head,green,water"
        );
        cfg.break_every = Some(10);
        cfg.trial_timeout_ms = Some(8000);
        assert_eq!(
            fingerprint_canonical_string(&cfg, Some(7), &order()),
            "pack:demo-en@1.0.0\norder:seeded\nseed:7\ntimeout:8000\nbreak:10\nwords:head,green,water"
        );
    }

    #[test]
    fn every_reproducibility_input_changes_fingerprint() {
        let base = compute_session_fingerprint(&config(), Some(42), &order());

        let mut c = config();
        c.pack_id = "other".into();
        assert_ne!(base, compute_session_fingerprint(&c, Some(42), &order()));

        let mut c = config();
        c.pack_version = "1.0.1".into();
        assert_ne!(base, compute_session_fingerprint(&c, Some(42), &order()));

        let mut c = config();
        c.order_policy = OrderPolicy::Fixed;
        assert_ne!(base, compute_session_fingerprint(&c, Some(42), &order()));

        let mut c = config();
        c.trial_timeout_ms = Some(1);
        assert_ne!(base, compute_session_fingerprint(&c, Some(42), &order()));

        let mut c = config();
        c.break_every = Some(3);
        assert_ne!(base, compute_session_fingerprint(&c, Some(42), &order()));

        assert_ne!(base, compute_session_fingerprint(&config(), Some(43), &order()));

        let mut swapped = order();
        swapped.swap(0, 1);
        assert_ne!(base, compute_session_fingerprint(&config(), Some(42), &swapped));
    }

    #[test]
    fn timestamps_and_responses_do_not_affect_fingerprint() {
        let a = completed_session();
        let mut b = a.clone();
        b.completed_at = "2030-12-31T00:00:00.000Z".into();
        b.started_at = String::new();
        b.trials[1].response = "changed".into();
        assert_eq!(recompute_fingerprint(&a), recompute_fingerprint(&b));
        assert_eq!(a.session_fingerprint, recompute_fingerprint(&b));
    }
}
