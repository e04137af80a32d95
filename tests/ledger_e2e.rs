//! End-to-end ledger behavior against the in-memory store: concurrency,
//! idempotency, the daily reset cycle and the audit trail working together.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use arkade_ledger::amount::Amount;
use arkade_ledger::cache::{BalanceCache, FALLBACK_CHIPS};
use arkade_ledger::ledger::{BalanceOp, Ledger, LedgerError, STARTING_CHIPS};
use arkade_ledger::model::{AuditFilter, GameKind, WalletAddress};
use arkade_ledger::store::MemStore;

fn ledger() -> Arc<Ledger> {
    Arc::new(Ledger::new(Arc::new(MemStore::new())))
}

fn wallet() -> WalletAddress {
    WalletAddress::parse("0x6887246668a3b87f54deb3b94ba47a6f63f32985").unwrap()
}

fn admin() -> WalletAddress {
    WalletAddress::parse("0xffeeddccbbaa99887766554433221100ffeeddcc").unwrap()
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
}

fn over(s: &str) -> Amount {
    s.parse().unwrap()
}

/// Two sessions racing for the last chip: exactly one session wins, the
/// loser gets a clean error, and the balance never goes negative.
#[tokio::test(flavor = "multi_thread")]
async fn concurrent_double_spend_of_last_chip() {
    let ledger = ledger();
    ledger.get_balance(&wallet(), t0()).await.unwrap();

    // Burn down to a single chip.
    ledger
        .apply(
            &wallet(),
            BalanceOp::SpendChips {
                amount: STARTING_CHIPS - 1,
            },
            None,
            t0(),
        )
        .await
        .unwrap();

    let a = {
        let ledger = ledger.clone();
        tokio::spawn(async move { ledger.start_game(&wallet(), t0()).await })
    };
    let b = {
        let ledger = ledger.clone();
        tokio::spawn(async move { ledger.start_game(&wallet(), t0()).await })
    };

    let outcomes = [a.await.unwrap(), b.await.unwrap()];
    let wins = outcomes.iter().filter(|o| o.is_ok()).count();
    assert_eq!(wins, 1, "exactly one session may take the last chip");

    for outcome in &outcomes {
        if let Err(e) = outcome {
            assert!(
                matches!(
                    e,
                    LedgerError::ConcurrentConflict | LedgerError::InsufficientBalance { .. }
                ),
                "loser saw unexpected error: {e}"
            );
        }
    }

    let (account, _) = ledger.get_balance(&wallet(), t0()).await.unwrap();
    assert_eq!(account.game_chips, 0);
}

/// The full reset cycle: seed, consume, wait out the window, grant once,
/// consume again to re-arm.
#[tokio::test]
async fn daily_reset_cycle() {
    let ledger = ledger();

    let (account, countdown) = ledger.get_balance(&wallet(), t0()).await.unwrap();
    assert_eq!(account.game_chips, STARTING_CHIPS);
    assert_eq!(countdown, "not started");

    // Consume two chips; the window is anchored at the first one.
    ledger.start_game(&wallet(), t0()).await.unwrap();
    ledger
        .start_game(&wallet(), t0() + Duration::hours(3))
        .await
        .unwrap();

    // Nothing granted while the window is open, even across many reads.
    for h in [4, 12, 23] {
        let (account, _) = ledger
            .get_balance(&wallet(), t0() + Duration::hours(h))
            .await
            .unwrap();
        assert_eq!(account.game_chips, STARTING_CHIPS - 2);
    }

    // The grant fires once the 24h window from the first consumption ends.
    let (granted, countdown) = ledger
        .get_balance(&wallet(), t0() + Duration::hours(24))
        .await
        .unwrap();
    assert_eq!(granted.game_chips, STARTING_CHIPS - 2 + 5);
    assert_eq!(countdown, "not started");

    // And only once.
    let (again, _) = ledger
        .get_balance(&wallet(), t0() + Duration::hours(30))
        .await
        .unwrap();
    assert_eq!(again.game_chips, granted.game_chips);

    // The next consumption re-arms a fresh window.
    let rearm_at = t0() + Duration::hours(30);
    let (_, countdown) = ledger.start_game(&wallet(), rearm_at).await.unwrap();
    assert_eq!(countdown, "24:00:00");
}

/// Two sessions observing a due reset at the same instant: the grant commit
/// is a compare-and-set, so exactly 5 chips land no matter who wins.
#[tokio::test(flavor = "multi_thread")]
async fn concurrent_due_observations_grant_once() {
    let ledger = ledger();
    ledger.get_balance(&wallet(), t0()).await.unwrap();
    ledger.start_game(&wallet(), t0()).await.unwrap();

    let due = t0() + Duration::hours(24);
    let a = {
        let ledger = ledger.clone();
        tokio::spawn(async move { ledger.get_balance(&wallet(), due).await })
    };
    let b = {
        let ledger = ledger.clone();
        tokio::spawn(async move { ledger.get_balance(&wallet(), due).await })
    };

    // Both observations succeed; neither errors on losing the grant race.
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    let (account, countdown) = ledger.get_balance(&wallet(), due).await.unwrap();
    assert_eq!(account.game_chips, STARTING_CHIPS - 1 + 5);
    assert_eq!(countdown, "not started");
}

/// A retried purchase with the same client reference settles exactly once.
#[tokio::test]
async fn purchase_retry_settles_once() {
    let ledger = ledger();
    ledger
        .apply(
            &wallet(),
            BalanceOp::AddTokens { amount: over("10") },
            None,
            t0(),
        )
        .await
        .unwrap();

    let reference = Some("0xa1b2c3d4e5f60718".to_string());
    let mut results = Vec::new();
    for _ in 0..3 {
        results.push(
            ledger
                .purchase_chips(&wallet(), 25, over("2.5"), reference.clone(), t0())
                .await
                .unwrap(),
        );
    }

    assert!(!results[0].replayed);
    assert!(results[1].replayed && results[2].replayed);

    let (account, _) = ledger.get_balance(&wallet(), t0()).await.unwrap();
    assert_eq!(account.game_chips, STARTING_CHIPS + 25);
    assert_eq!(account.token_balance, over("7.5"));
}

/// A realistic session: play, score, buy, withdraw, with every balance
/// staying consistent throughout.
#[tokio::test]
async fn mixed_session_keeps_balances_consistent() {
    let ledger = ledger();
    let now = t0();

    // Play two games from the seed grant.
    ledger.start_game(&wallet(), now).await.unwrap();
    ledger.start_game(&wallet(), now).await.unwrap();

    // Earn from scores.
    let r1 = ledger
        .submit_score(&wallet(), GameKind::Tetris, 12_000, now)
        .await
        .unwrap();
    let r2 = ledger
        .submit_score(&wallet(), GameKind::Pacman, 4_500, now)
        .await
        .unwrap();
    assert_eq!(r1, over("0.012"));
    assert_eq!(r2, over("0.008"));

    // Claim a video chip.
    let video = ledger.claim_video_reward(&wallet(), now).await.unwrap();
    assert_eq!(video.new_balance, STARTING_CHIPS - 2 + 1);

    // Spend part of the earnings on chips, withdraw the rest.
    ledger
        .purchase_chips(&wallet(), 1, over("0.01"), None, now)
        .await
        .unwrap();
    ledger
        .withdraw_tokens(&wallet(), over("0.01"), now)
        .await
        .unwrap();

    let (account, _) = ledger.get_balance(&wallet(), now).await.unwrap();
    assert_eq!(account.game_chips, STARTING_CHIPS - 2 + 1 + 1);
    assert_eq!(account.token_balance, Amount::ZERO);
    // Earnings only ever accumulate; purchases and withdrawals do not touch them.
    assert_eq!(account.total_earnings, over("0.02"));
}

/// Admin activity leaves a queryable trail that survives further activity.
#[tokio::test]
async fn audit_trail_accumulates_and_filters() {
    let ledger = ledger();
    ledger.get_balance(&wallet(), t0()).await.unwrap();

    ledger
        .admin_adjust(&admin(), &wallet(), 50, Amount::ZERO, "promo grant", t0())
        .await
        .unwrap();
    let denied = ledger
        .admin_adjust(
            &admin(),
            &wallet(),
            -500,
            Amount::ZERO,
            "fat-fingered clawback",
            t0() + Duration::minutes(1),
        )
        .await;
    assert!(denied.is_err());

    let all = ledger
        .query_audit(&AuditFilter::default(), 10, 0)
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
    // Newest first.
    assert!(!all[0].success);
    assert!(all[1].success);

    let failures = ledger
        .query_audit(
            &AuditFilter {
                success: Some(false),
                action_type: None,
            },
            10,
            0,
        )
        .await
        .unwrap();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].error_message.is_some());

    // Paging walks the same ordering.
    let page = ledger
        .query_audit(&AuditFilter::default(), 1, 1)
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert!(page[0].success);
}

/// The display cache follows ledger mutations and degrades to the flagged
/// fallback for unknown wallets.
#[tokio::test(flavor = "multi_thread")]
async fn display_cache_follows_mutations() {
    let ledger = ledger();
    let cache = Arc::new(BalanceCache::default());

    let follower = cache.clone();
    let events = ledger.subscribe();
    let handle = tokio::spawn(async move { follower.follow(events).await });

    // Unknown wallet: conservative fallback, clearly non-authoritative.
    let view = cache.view_or_fallback(&wallet()).await;
    assert_eq!(view.game_chips, FALLBACK_CHIPS);
    assert!(!view.authoritative);

    ledger.get_balance(&wallet(), t0()).await.unwrap();
    ledger.start_game(&wallet(), t0()).await.unwrap();

    // Let the follower drain the event.
    tokio::task::yield_now().await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let view = cache.view_or_fallback(&wallet()).await;
    assert!(view.authoritative);
    assert_eq!(view.game_chips, STARTING_CHIPS - 1);

    drop(ledger);
    handle.await.unwrap();
}
