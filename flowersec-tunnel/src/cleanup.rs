use std::sync::Arc;

use flowersec_common::Clock;
use flowersec_token::ReplayCache;

use crate::channel::{close_channel, ChannelRegistry};
use crate::config::TunnelConfig;
use crate::observer::TunnelObserver;
use crate::TunnelError;

/// Runs the periodic sweep: evicts spent replay-cache entries, expires
/// channels that never completed their handshake within the init
/// window, and idles out channels with no recent traffic. Exits as
/// soon as `cancelled` resolves, so [`crate::server::TunnelServer::close`]
/// can stop it deterministically.
pub async fn run(
    registry: Arc<ChannelRegistry>,
    replay_cache: Arc<ReplayCache>,
    config: Arc<TunnelConfig>,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn TunnelObserver>,
    mut cancelled: tokio::sync::watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(config.cleanup_interval);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = cancelled.changed() => {
                if *cancelled.borrow() {
                    return;
                }
                continue;
            }
        }

        let now = clock.now_unix();
        replay_cache.cleanup(now).await;

        for channel_id in registry.ids().await {
            let Some(state) = registry.get(&channel_id).await else {
                continue;
            };
            let (init_exp, idle_timeout_seconds, last_active, saw_record) = {
                let guard = state.lock().await;
                (guard.init_exp, guard.idle_timeout_seconds, guard.last_active, guard.saw_record)
            };

            let clock_skew_secs = config.clock_skew.as_secs() as i64;
            if !saw_record && now > init_exp + clock_skew_secs {
                let code = TunnelError::InitExpired.close_category().ws_close_code();
                close_channel(&registry, &channel_id, code, "init_expired").await;
                observer.close("init_expired");
                continue;
            }
            if idle_timeout_seconds > 0 && now - last_active > idle_timeout_seconds {
                let code = TunnelError::IdleTimeout.close_category().ws_close_code();
                close_channel(&registry, &channel_id, code, "idle_timeout").await;
                observer.close("idle_timeout");
            }
        }

        observer.channel_count(registry.channel_count().await);
        observer.conn_count(registry.conn_count());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelState;
    use flowersec_common::TestClock;

    #[tokio::test]
    async fn expires_unpaired_channel_past_init_window() {
        let registry = Arc::new(ChannelRegistry::new());
        registry.get_or_create("ch_1", 100, 60, 0).await;

        let clock = TestClock::new(140);
        replay_and_sweep_once(&registry, &clock).await;

        assert_eq!(registry.channel_count().await, 0);
    }

    #[tokio::test]
    async fn leaves_channel_within_init_window_alone() {
        let registry = Arc::new(ChannelRegistry::new());
        registry.get_or_create("ch_1", 100, 60, 0).await;

        let clock = TestClock::new(120);
        replay_and_sweep_once(&registry, &clock).await;

        assert_eq!(registry.channel_count().await, 1);
    }

    #[tokio::test]
    async fn idle_timeout_expires_paired_channel_with_no_traffic() {
        let registry = Arc::new(ChannelRegistry::new());
        let state = registry.get_or_create("ch_1", 100, 60, 0).await;
        {
            let mut guard = state.lock().await;
            guard.saw_record = true;
            guard.last_active = 0;
        }

        let clock = TestClock::new(200);
        replay_and_sweep_once(&registry, &clock).await;

        assert_eq!(registry.channel_count().await, 0);
    }

    async fn replay_and_sweep_once(registry: &Arc<ChannelRegistry>, clock: &TestClock) {
        let now = clock.now_unix();
        for channel_id in registry.ids().await {
            let Some(state) = registry.get(&channel_id).await else { continue };
            let (init_exp, idle_timeout_seconds, last_active, saw_record) = {
                let guard = state.lock().await;
                (guard.init_exp, guard.idle_timeout_seconds, guard.last_active, guard.saw_record)
            };
            if !saw_record && now > init_exp + 30 {
                close_channel(registry, &channel_id, 4403, "init_expired").await;
                continue;
            }
            if idle_timeout_seconds > 0 && now - last_active > idle_timeout_seconds {
                close_channel(registry, &channel_id, 4403, "idle_timeout").await;
            }
        }
    }
}
