//! Lifecycle integration tests: guarded transitions, overrides, status views.

use chrono::{Duration, FixedOffset, TimeZone, Utc};
use spendguard_core::{
    lifecycle::DEFAULT_FLAG_NOTE, reason::ReasonKind, Clock, GuardConfig, GuardEngine, GuardError,
    ManualClock, NewTransaction, Severity, Transaction, TransactionStatus,
};
use std::sync::Arc;

fn build() -> (GuardEngine, Arc<ManualClock>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap(),
    ));
    let engine = GuardEngine::build_test(GuardConfig::default(), clock.clone()).unwrap();
    (engine, clock)
}

fn pending(engine: &GuardEngine, user: &str, amount: f64, description: &str) -> Transaction {
    engine
        .record_transaction(NewTransaction::expense(user, amount, description).pending())
        .unwrap()
        .transaction
}

fn confirmed(engine: &GuardEngine, user: &str, amount: f64, description: &str) -> Transaction {
    engine
        .record_transaction(NewTransaction::expense(user, amount, description))
        .unwrap()
        .transaction
}

fn assert_invalid(err: GuardError, from: TransactionStatus, attempted: TransactionStatus) {
    match err {
        GuardError::InvalidTransition { from: f, attempted: a } => {
            assert_eq!((f, a), (from, attempted));
        }
        other => panic!("expected InvalidTransition, got {other:?}"),
    }
}

#[test]
fn confirm_moves_pending_to_confirmed() {
    let (engine, clock) = build();
    let tx = pending(&engine, "u1", 250.0, "groceries");
    assert_eq!(tx.status, TransactionStatus::Pending);

    clock.advance(Duration::minutes(3));
    let transition = engine.confirm(&tx.id, "u1").unwrap();
    assert_eq!(transition.from, TransactionStatus::Pending);
    assert_eq!(transition.to, TransactionStatus::Confirmed);
    assert_eq!(transition.transaction.status, TransactionStatus::Confirmed);
    assert_eq!(transition.transaction.updated_at, Some(clock.now()));
    assert_eq!(transition.transaction.version, tx.version + 1);

    let stored = engine.lifecycle().get(&tx.id, "u1").unwrap();
    assert_eq!(stored, transition.transaction);
}

#[test]
fn confirm_twice_is_invalid() {
    let (engine, _clock) = build();
    let tx = pending(&engine, "u1", 250.0, "groceries");
    engine.confirm(&tx.id, "u1").unwrap();
    let err = engine.confirm(&tx.id, "u1").unwrap_err();
    assert_invalid(err, TransactionStatus::Confirmed, TransactionStatus::Confirmed);
}

#[test]
fn confirmed_cannot_be_rejected() {
    let (engine, _clock) = build();
    let tx = pending(&engine, "u1", 250.0, "groceries");
    engine.confirm(&tx.id, "u1").unwrap();
    let err = engine.reject(&tx.id, "u1", Some("changed my mind")).unwrap_err();
    assert_invalid(err, TransactionStatus::Confirmed, TransactionStatus::Rejected);

    // Guard violations leave the record untouched.
    let stored = engine.lifecycle().get(&tx.id, "u1").unwrap();
    assert_eq!(stored.description, "groceries");
}

#[test]
fn reject_appends_reason_to_description() {
    let (engine, _clock) = build();
    let tx = pending(&engine, "u1", 990.0, "streaming subscription");
    let transition = engine.reject(&tx.id, "u1", Some("duplicate charge")).unwrap();
    assert_eq!(transition.to, TransactionStatus::Rejected);
    assert_eq!(
        transition.transaction.description,
        "streaming subscription [REJECTED: duplicate charge]"
    );
    assert_eq!(transition.note.as_deref(), Some("duplicate charge"));

    let err = engine.reject(&tx.id, "u1", None).unwrap_err();
    assert_invalid(err, TransactionStatus::Rejected, TransactionStatus::Rejected);
}

#[test]
fn reject_without_reason_keeps_description() {
    let (engine, _clock) = build();
    let tx = pending(&engine, "u1", 990.0, "streaming subscription");
    let transition = engine.reject(&tx.id, "u1", Some("   ")).unwrap();
    assert_eq!(transition.transaction.description, "streaming subscription");
    assert_eq!(transition.note, None);
}

#[test]
fn rejected_cannot_be_confirmed() {
    let (engine, _clock) = build();
    let tx = pending(&engine, "u1", 990.0, "streaming subscription");
    engine.reject(&tx.id, "u1", None).unwrap();
    let err = engine.confirm(&tx.id, "u1").unwrap_err();
    assert_invalid(err, TransactionStatus::Rejected, TransactionStatus::Confirmed);
}

#[test]
fn mark_suspicious_from_every_state() {
    let (engine, _clock) = build();

    let was_pending = pending(&engine, "u1", 100.0, "coffee");
    let was_confirmed = confirmed(&engine, "u1", 110.0, "taxi");
    let was_rejected = pending(&engine, "u1", 120.0, "lunch");
    engine.reject(&was_rejected.id, "u1", None).unwrap();
    let was_suspicious = pending(&engine, "u1", 130.0, "bookstore");
    engine.mark_suspicious(&was_suspicious.id, "u1", None).unwrap();

    for (tx, from) in [
        (&was_pending, TransactionStatus::Pending),
        (&was_confirmed, TransactionStatus::Confirmed),
        (&was_rejected, TransactionStatus::Rejected),
        (&was_suspicious, TransactionStatus::Suspicious),
    ] {
        let transition = engine.mark_suspicious(&tx.id, "u1", Some("card skimmed")).unwrap();
        assert_eq!(transition.from, from);
        assert_eq!(transition.transaction.status, TransactionStatus::Suspicious);
        assert_eq!(transition.transaction.risk_score, 0.8);
        assert!(transition.transaction.is_suspicious());
        assert_eq!(transition.transaction.review_note.as_deref(), Some("card skimmed"));
    }
}

#[test]
fn manual_flag_overrides_low_score_and_keeps_reasons() {
    let (engine, _clock) = build();
    let tx = pending(&engine, "u1", 12_000.0, "sofa");
    assert_eq!(tx.risk_score, 0.3);
    assert_eq!(Severity::from_score(tx.risk_score), Severity::Low);

    let flagged = engine.mark_suspicious(&tx.id, "u1", None).unwrap().transaction;
    assert_eq!(flagged.risk_score, 0.8);
    assert_eq!(Severity::from_score(flagged.risk_score), Severity::High);
    assert_eq!(flagged.review_note.as_deref(), Some(DEFAULT_FLAG_NOTE));
    let kinds: Vec<_> = flagged.reasons.iter().map(|r| r.kind()).collect();
    assert_eq!(kinds, vec![ReasonKind::LargeAmount]);
}

#[test]
fn suspicious_may_still_be_confirmed_or_rejected() {
    let (engine, _clock) = build();
    let a = pending(&engine, "u1", 100.0, "coffee");
    let b = pending(&engine, "u1", 110.0, "taxi");
    engine.mark_suspicious(&a.id, "u1", None).unwrap();
    engine.mark_suspicious(&b.id, "u1", None).unwrap();

    let confirmed = engine.confirm(&a.id, "u1").unwrap();
    assert_eq!(confirmed.from, TransactionStatus::Suspicious);
    let rejected = engine.reject(&b.id, "u1", Some("not mine")).unwrap();
    assert_eq!(rejected.from, TransactionStatus::Suspicious);

    // Once rejected, the REJECTED guard wins even after a suspicious detour.
    let err = engine.confirm(&b.id, "u1").unwrap_err();
    assert_invalid(err, TransactionStatus::Rejected, TransactionStatus::Confirmed);
}

#[test]
fn pending_entry_that_scores_suspicious_becomes_suspicious() {
    let (engine, _clock) = build();
    let outcome = engine
        .record_transaction(NewTransaction::expense("u1", 60_000.0, "crypto wallet").pending())
        .unwrap();
    assert!(outcome.suspicious());
    assert_eq!(outcome.transaction.status, TransactionStatus::Suspicious);

    let immediate = engine
        .record_transaction(NewTransaction::expense("u2", 60_000.0, "crypto wallet"))
        .unwrap();
    assert!(immediate.suspicious());
    assert_eq!(immediate.transaction.status, TransactionStatus::Confirmed);
}

#[test]
fn unknown_target_is_not_found() {
    let (engine, _clock) = build();
    let tx = pending(&engine, "u1", 100.0, "coffee");

    for result in [
        engine.confirm("no-such-id", "u1"),
        engine.reject(&tx.id, "someone-else", None),
        engine.mark_suspicious(&tx.id, "someone-else", None),
    ] {
        match result {
            Err(GuardError::NotFound { entity, .. }) => assert_eq!(entity, "transaction"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }
}

#[test]
fn status_views_are_newest_first_and_limited() {
    let (engine, clock) = build();
    let mut ids = Vec::new();
    for description in ["coffee", "taxi", "lunch", "bookstore"] {
        ids.push(pending(&engine, "u1", 100.0, description).id);
        clock.advance(Duration::hours(2));
    }
    confirmed(&engine, "u1", 100.0, "bakery");

    let newest_two = engine.lifecycle().pending("u1", 2).unwrap();
    let got: Vec<_> = newest_two.iter().map(|t| t.id.clone()).collect();
    assert_eq!(got, vec![ids[3].clone(), ids[2].clone()]);

    let all_pending = engine.lifecycle().by_status("u1", TransactionStatus::Pending, 10).unwrap();
    assert_eq!(all_pending.len(), 4);
    let confirmed_view = engine
        .lifecycle()
        .by_status("u1", TransactionStatus::Confirmed, 10)
        .unwrap();
    assert_eq!(confirmed_view.len(), 1);
}

#[test]
fn suspicious_views_follow_the_score() {
    let (engine, clock) = build();
    let utc = FixedOffset::east_opt(0).unwrap();

    let old = engine
        .record_transaction(
            NewTransaction::expense("u1", 60_000.0, "bitcoin")
                .at(utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()),
        )
        .unwrap()
        .transaction;
    clock.advance(Duration::hours(2));
    let recent = engine
        .record_transaction(NewTransaction::expense("u1", 300.0, "casino"))
        .unwrap()
        .transaction;
    let flagged = confirmed(&engine, "u1", 200.0, "coffee");
    engine.mark_suspicious(&flagged.id, "u1", None).unwrap();
    confirmed(&engine, "u1", 100.0, "taxi");

    // 0.4 is below the threshold.
    assert!(!recent.is_suspicious());

    let suspicious: Vec<_> = engine
        .lifecycle()
        .suspicious("u1", 10)
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(suspicious, vec![flagged.id.clone(), old.id.clone()]);

    let since = Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap();
    let recent_flags: Vec<_> = engine
        .lifecycle()
        .recent_suspicious("u1", since)
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(recent_flags, vec![flagged.id]);
}

#[test]
fn status_summary_counts_every_bucket() {
    let (engine, _clock) = build();
    let a = pending(&engine, "u1", 100.0, "coffee");
    let b = pending(&engine, "u1", 110.0, "taxi");
    let c = pending(&engine, "u1", 120.0, "lunch");
    pending(&engine, "u1", 130.0, "bookstore");
    confirmed(&engine, "u1", 140.0, "bakery");
    confirmed(&engine, "u2", 150.0, "bakery");

    engine.confirm(&a.id, "u1").unwrap();
    engine.reject(&b.id, "u1", None).unwrap();
    engine.mark_suspicious(&c.id, "u1", None).unwrap();

    let summary = engine.status_summary("u1").unwrap();
    assert_eq!(summary.pending, 1);
    assert_eq!(summary.confirmed, 2);
    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.suspicious, 1);
    assert_eq!(summary.total, 5);
    assert_eq!(
        summary.pending + summary.confirmed + summary.rejected + summary.suspicious,
        summary.total
    );
}

#[test]
fn racing_confirm_and_reject_have_one_winner() {
    for _ in 0..20 {
        let (engine, _clock) = build();
        let tx = pending(&engine, "u1", 100.0, "coffee");

        let (confirm, reject) = std::thread::scope(|s| {
            let c = s.spawn(|| engine.confirm(&tx.id, "u1"));
            let r = s.spawn(|| engine.reject(&tx.id, "u1", Some("not mine")));
            (c.join().unwrap(), r.join().unwrap())
        });

        let stored = engine.lifecycle().get(&tx.id, "u1").unwrap();
        match (confirm, reject) {
            (Ok(won), Err(lost)) => {
                assert_eq!(stored.status, TransactionStatus::Confirmed);
                assert_eq!(won.transaction, stored);
                assert_invalid(lost, TransactionStatus::Confirmed, TransactionStatus::Rejected);
            }
            (Err(lost), Ok(won)) => {
                assert_eq!(stored.status, TransactionStatus::Rejected);
                assert_eq!(won.transaction, stored);
                assert_invalid(lost, TransactionStatus::Rejected, TransactionStatus::Confirmed);
            }
            other => panic!("expected exactly one winner, got {other:?}"),
        }
    }
}
