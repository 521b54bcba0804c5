#[cfg(test)]
mod test {

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::cache::credential::{AccessToken, CredentialCache};
    use crate::helpers::time::ManualClock;
    use crate::tests::common::{at, counting_refresh};

    const T: i64 = 1_760_000_000;

    #[tokio::test]
    async fn window_shortens_lifetime_and_triggers_one_refresh() {
        let clock = ManualClock::new(at(T));
        let calls = Arc::new(AtomicUsize::new(0));
        let token: AccessToken<ManualClock> = CredentialCache::with_clock("window-example", 300, clock.clone());
        token.set_refresh_operation(counting_refresh(calls.clone(), "token", 7200, Duration::ZERO));

        assert_eq!(token.get_value(false).await.unwrap(), "token-1");
        assert_eq!(token.expires_at(), at(T + 6900));

        clock.set(at(T + 6900));
        assert_eq!(token.get_value(false).await.unwrap(), "token-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.set(at(T + 6901));
        assert!(token.is_expired());
        assert_eq!(token.get_value(false).await.unwrap(), "token-2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(token.expires_at(), at(T + 6901 + 6900));
    }

    #[tokio::test]
    async fn stays_valid_for_lifetime_minus_window() {
        for (window, expires_in) in [(0u64, 1i64), (0, 7200), (10, 11), (300, 7200), (3600, 86_400)] {
            let clock = ManualClock::new(at(T));
            let calls = Arc::new(AtomicUsize::new(0));
            let token: AccessToken<ManualClock> = CredentialCache::with_clock("lifetime", window, clock.clone());
            token.set_refresh_operation(counting_refresh(calls.clone(), "token", expires_in, Duration::ZERO));

            token.get_value(false).await.unwrap();
            assert!(!token.is_expired(), "window {window}, expires_in {expires_in}");

            let valid_for = expires_in - window as i64;
            clock.set(at(T + valid_for));
            assert!(!token.is_expired(), "window {window}, expires_in {expires_in}");
            clock.set(at(T + valid_for + 1));
            assert!(token.is_expired(), "window {window}, expires_in {expires_in}");
        }
    }

    #[tokio::test]
    async fn inspection_never_refreshes() {
        let clock = ManualClock::new(at(T));
        let calls = Arc::new(AtomicUsize::new(0));
        let token: AccessToken<ManualClock> = CredentialCache::with_clock("inspection", 300, clock.clone());
        token.set_refresh_operation(counting_refresh(calls.clone(), "token", 7200, Duration::ZERO));

        for _ in 0..5 {
            assert!(token.is_expired());
            assert_eq!(token.peek_value(), None);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        token.get_value(false).await.unwrap();
        let expires_at = token.expires_at();
        for _ in 0..5 {
            assert!(!token.is_expired());
            assert_eq!(token.peek_value().as_deref(), Some("token-1"));
        }
        assert_eq!(token.expires_at(), expires_at);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn direct_injection_feeds_the_cache() {
        let clock = ManualClock::new(at(T));
        let calls = Arc::new(AtomicUsize::new(0));
        let token: AccessToken<ManualClock> = CredentialCache::with_clock("direct", 300, clock.clone());
        token.set_refresh_operation(counting_refresh(calls.clone(), "token", 7200, Duration::ZERO));

        token.set_value("fetched-by-caller", 600);
        assert_eq!(token.get_value(false).await.unwrap(), "fetched-by-caller");
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        clock.advance_secs(301);
        assert_eq!(token.peek_value(), None);
        assert_eq!(token.get_value(false).await.unwrap(), "token-1");
    }
}
