//! Concurrency Integration Tests
//!
//! Many writers racing on the same and on different loans.

mod common;

use futures::future::join_all;

use common::{borrower, TestHarness};
use peerlend_common::{Amount, LedgerError, LoanStatus, PartyId};

/// Test: only one of many racing lenders funds a loan
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_funding_is_exactly_once() {
    let h = TestHarness::new();
    let lenders: Vec<PartyId> = (0..16).map(|i| PartyId::new(format!("0x1e4de4{i:02}"))).collect();
    for lender in &lenders {
        h.fund_wallet(lender, 1_000);
    }
    let id = h
        .ledger
        .request_loan(borrower(), Amount::new(1_000), 8, 24)
        .unwrap();

    let tasks = lenders.iter().cloned().map(|lender| {
        let ledger = h.ledger.clone();
        tokio::spawn(async move { ledger.fund_loan(&lender, id, Amount::new(1_000)).await })
    });
    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    for result in &results {
        if let Err(err) = result {
            assert!(matches!(err, LedgerError::InvalidState { .. }), "{err}");
        }
    }

    let loan = h.ledger.get_loan(id).unwrap();
    let winner = loan.lender.clone().unwrap();
    assert_eq!(loan.status, LoanStatus::Funded);
    assert_eq!(loan.version, 1);
    assert_eq!(winners[0].loan, loan);

    // Value moved once, from the winner only
    assert_eq!(h.escrow.balance(&borrower()), Amount::new(1_000));
    assert_eq!(h.escrow.transfer_count(), 1);
    for lender in &lenders {
        let expected = if lender == &winner { 0 } else { 1_000 };
        assert_eq!(h.escrow.balance(lender), Amount::new(expected));
    }
}

/// Test: racing payments on one loan each land exactly once
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_payments_serialize() {
    let h = TestHarness::new();
    let lender = PartyId::from("0x1e4de4");
    let id = h.funded_loan(&borrower(), &lender, 1200, 12, 12).await;

    let tasks = (0..6).map(|_| {
        let ledger = h.ledger.clone();
        tokio::spawn(async move { ledger.pay_installment(&borrower(), id, Amount::new(112)).await })
    });
    let results = join_all(tasks).await;
    assert!(results.into_iter().all(|r| r.expect("task panicked").is_ok()));

    let loan = h.ledger.get_loan(id).unwrap();
    assert_eq!(loan.installments_paid, 6);
    assert_eq!(loan.repaid_amount, Amount::new(672));
    assert_eq!(loan.version, 7);
    assert_eq!(h.escrow.balance(&lender), Amount::new(672));
}

/// Test: independent loans progress in parallel and the index stays consistent
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_loans_keep_index_consistent() {
    let h = TestHarness::new();
    let lender = PartyId::from("0x1e4de4");
    h.fund_wallet(&lender, 64 * 500);

    let ids: Vec<_> = (0..64)
        .map(|i| {
            let who = PartyId::new(format!("0xb0770we4{i:02}"));
            h.ledger
                .request_loan(who, Amount::new(500), 6, 12)
                .unwrap()
        })
        .collect();

    let tasks = ids.iter().copied().enumerate().map(|(i, id)| {
        let ledger = h.ledger.clone();
        let lender = lender.clone();
        tokio::spawn(async move {
            if i % 4 == 0 {
                let who = ledger.get_loan(id).unwrap().borrower;
                ledger.remove_loan(&who, id).await.map(|_| ())
            } else {
                ledger
                    .fund_loan(&lender, id, Amount::new(500))
                    .await
                    .map(|_| ())
            }
        })
    });
    for joined in join_all(tasks).await {
        joined.expect("task panicked").unwrap();
    }

    assert_eq!(h.ledger.get_loans_by_lender(&lender).len(), 48);
    assert!(h.ledger.get_available_loans().is_empty());
    assert!(!h.ledger.rebuild_index());
}
