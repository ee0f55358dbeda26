//! Property tests over the pure cores: cron evaluation, the freshness
//! algebra, and key construction.

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use flowgate_cache::{CacheDomain, CacheKey, CacheStore};
use flowgate_core::{now_ms, MemoryStore};
use flowgate_jobs::CronSpec;
use proptest::prelude::*;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// (fresh-read staleness, stale-read staleness) observed for an entry of the
/// given age; `None` = miss.
fn freshness_observation(age_s: u64, fresh_s: u64) -> (Option<bool>, Option<bool>) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime");
    rt.block_on(async {
        let cache = CacheStore::new(Arc::new(MemoryStore::new()));
        let key = CacheKey::new(CacheDomain::RiskScore).arg("0xabc");
        let fresh = Duration::from_secs(fresh_s);
        cache
            .write_entry(
                &key,
                &serde_json::json!({"v": 1}),
                fresh,
                fresh * 2,
                now_ms().saturating_sub(age_s * 1_000),
            )
            .await
            .expect("seed");
        let fresh_read = cache.get::<Value>(&key, false).await.expect("fresh read");
        let stale_read = cache.get::<Value>(&key, true).await.expect("stale read");
        (
            fresh_read.map(|hit| hit.stale),
            stale_read.map(|hit| hit.stale),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn cron_evaluation_is_deterministic_and_ordered(
        start_min in 0i64..1_000_000,
        window_min in 1i64..720,
    ) {
        let spec = CronSpec::parse("*/5 * * * *").unwrap();
        let after = Utc.timestamp_opt(start_min * 60, 0).unwrap();
        let upto = after + ChronoDuration::minutes(window_min);

        let first = spec.fires_between(after, upto);
        let second = spec.fires_between(after, upto);
        prop_assert_eq!(&first, &second);

        prop_assert!(first.windows(2).all(|pair| pair[0] < pair[1]));
        for fire in &first {
            prop_assert!(*fire > after && *fire <= upto);
            prop_assert_eq!(fire.timestamp() % 300, 0);
        }
    }

    #[test]
    fn freshness_follows_the_two_ttl_algebra(
        age_s in 0u64..2_000,
        fresh_s in 10u64..600,
    ) {
        // Stay away from the window edges; wall-clock rounding inside the
        // store would make exact-boundary cases flaky.
        prop_assume!(age_s + 2 < fresh_s || age_s > fresh_s + 2);
        prop_assume!(age_s + 2 < 2 * fresh_s || age_s > 2 * fresh_s + 2);

        let (fresh_read, stale_read) = freshness_observation(age_s, fresh_s);
        if age_s < fresh_s {
            prop_assert_eq!(fresh_read, Some(false));
            prop_assert_eq!(stale_read, Some(false));
        } else if age_s < 2 * fresh_s {
            prop_assert_eq!(fresh_read, None);
            prop_assert_eq!(stale_read, Some(true));
        } else {
            prop_assert_eq!(fresh_read, None);
            prop_assert_eq!(stale_read, None);
        }
    }

    #[test]
    fn distinct_arguments_never_collide(
        a in "[a-zA-Z0-9]{1,16}",
        b in "[a-zA-Z0-9]{1,16}",
        depth in 0u32..8,
    ) {
        prop_assume!(a != b);
        let key_a = CacheKey::new(CacheDomain::WalletNetwork).arg(&a).arg(depth);
        let key_b = CacheKey::new(CacheDomain::WalletNetwork).arg(&b).arg(depth);
        prop_assert_ne!(key_a.as_str(), key_b.as_str());

        // Case matters.
        let upper = CacheKey::new(CacheDomain::WalletNetwork).arg(a.to_uppercase()).arg(depth);
        let lower = CacheKey::new(CacheDomain::WalletNetwork).arg(a.to_lowercase()).arg(depth);
        if a.to_uppercase() != a.to_lowercase() {
            prop_assert_ne!(upper.as_str(), lower.as_str());
        }
    }
}
