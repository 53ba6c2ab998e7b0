//! Ledger Scenario Tests
//!
//! Fill validation against hand-computed balances, plus randomized sequences
//! checking that the valuation, no-short and no-mutation-on-reject invariants
//! hold for every reachable state.

use crate::backtest::events::FillReceipt;
use crate::backtest::execution::FeeSchedule;
use crate::backtest::portfolio::{Portfolio, TradeRejection};
use crate::backtest::rng::SimRng;
use rand::Rng;

const EPS: f64 = 1e-4;

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Cash plus 3 TICK shares last seen at 12.3.
fn seeded_portfolio(cash: f64) -> Portfolio {
    let mut p = Portfolio::new(cash);
    p.update_price("TICK", 12.3);
    p.set_shares("TICK", 3.0);
    p
}

fn fees() -> FeeSchedule {
    FeeSchedule::default()
}

fn assert_valuation_identity(p: &Portfolio) {
    let manual: f64 = p.cash() + p.entries().map(|(_, e)| e.shares * e.price).sum::<f64>();
    assert!(
        (p.total_value() - manual).abs() < 1e-7,
        "total {} != cash + positions {}",
        p.total_value(),
        manual
    );
}

// =============================================================================
// FILL SCENARIOS
// =============================================================================

#[test]
fn test_buy_accepted() {
    let mut p = seeded_portfolio(33.0);
    let fill = p
        .apply_fill(&FillReceipt::new("TICK", 11.0, 2.0, 10.0), &fees())
        .expect("buy should be affordable");

    assert!(!fill.clipped);
    assert!((p.cash() - 1.0).abs() < EPS, "cash {}", p.cash());
    assert!((p.shares("TICK") - 5.0).abs() < EPS);
    assert!((fill.cash_after - 1.0).abs() < EPS);
    assert_valuation_identity(&p);
}

#[test]
fn test_buy_rejected_when_cash_short() {
    let mut p = seeded_portfolio(13.0);
    let before = p.clone();

    let err = p
        .apply_fill(&FillReceipt::new("TICK", 11.0, 2.0, 10.0), &fees())
        .unwrap_err();

    match err {
        TradeRejection::InsufficientFunds { required, available } => {
            assert!((required - 32.0).abs() < EPS);
            assert!((available - 13.0).abs() < EPS);
        }
        other => panic!("unexpected rejection {:?}", other),
    }
    assert_eq!(p, before);
    assert_eq!(p.cash().to_bits(), before.cash().to_bits());
    assert_eq!(p.shares("TICK").to_bits(), before.shares("TICK").to_bits());
}

#[test]
fn test_sell_accepted() {
    let mut p = seeded_portfolio(13.0);
    p.apply_fill(&FillReceipt::new("TICK", 11.0, -2.0, 10.0), &fees())
        .expect("sell within holding should succeed");

    assert!((p.cash() - 25.0).abs() < EPS);
    assert!((p.shares("TICK") - 1.0).abs() < EPS);
    assert_valuation_identity(&p);
}

#[test]
fn test_oversized_sell_clipped_to_liquidation() {
    let mut p = seeded_portfolio(13.0);
    let fill = p
        .apply_fill(&FillReceipt::new("TICK", 11.0, -5.0, 10.0), &fees())
        .expect("clipped liquidation should succeed");

    let updated_fee = fees().fee(11.0 * 3.0);
    assert!(fill.clipped);
    assert!((fill.share_delta + 3.0).abs() < EPS);
    assert!((fill.fee - updated_fee).abs() < EPS);
    assert!((p.cash() - (13.0 + 33.0 - updated_fee)).abs() < EPS);
    assert!(p.shares("TICK").abs() < EPS);
    // Tracked price is not moved by the fill price
    assert!((p.price("TICK").unwrap() - 12.3).abs() < EPS);
}

#[test]
fn test_clipped_sell_rejected_when_fee_exceeds_proceeds() {
    let mut p = Portfolio::new(100.0);
    p.update_price("TICK", 2.0);
    p.set_shares("TICK", 1.0);
    let before = p.clone();

    // Clipped notional 2.0, fee 10.04
    let err = p
        .apply_fill(&FillReceipt::new("TICK", 2.0, -4.0, 10.0), &fees())
        .unwrap_err();
    assert!(matches!(err, TradeRejection::FeeExceedsNotional { .. }));
    assert_eq!(p, before);
}

#[test]
fn test_sell_with_no_holding_rejected() {
    let mut p = Portfolio::new(100.0);
    p.update_price("TICK", 20.0);
    let before = p.clone();

    assert!(p
        .apply_fill(&FillReceipt::new("TICK", 20.0, -1.0, 10.0), &fees())
        .is_err());
    assert_eq!(p, before);
    assert_eq!(p.shares("TICK"), 0.0);
}

#[test]
fn test_spending_to_exactly_zero_is_allowed() {
    let mut p = Portfolio::new(30.0);
    p.update_price("TICK", 10.0);
    p.apply_fill(&FillReceipt::new("TICK", 10.0, 2.0, 10.0), &fees())
        .expect("exactly affordable");
    assert_eq!(p.cash(), 0.0);
    assert_eq!(p.shares("TICK"), 2.0);
}

#[test]
fn test_fill_never_changes_tracked_price_or_update_count() {
    let mut p = seeded_portfolio(1_000.0);
    let updates = p.update_count("TICK");
    p.apply_fill(&FillReceipt::new("TICK", 9.99, 10.0, 12.0), &fees())
        .unwrap();
    assert_eq!(p.price("TICK"), Some(12.3));
    assert_eq!(p.update_count("TICK"), updates);
}

// =============================================================================
// RANDOMIZED INVARIANTS
// =============================================================================

#[test]
fn test_random_fill_sequences_preserve_invariants() {
    let instruments = ["A", "B", "C"];
    let fees = fees();
    let mut rng = SimRng::new(2024);

    for _run in 0..20 {
        let mut p = Portfolio::new(5_000.0);
        for step in 0..300 {
            let instrument = instruments[rng.rng().gen_range(0..instruments.len())];
            let price = rng.rng().gen_range(1.0..200.0);
            p.update_price(instrument, price);

            let delta: f64 = rng.rng().gen_range(-40.0..40.0_f64).round();
            let fill_price = price * (1.0 + rng.rng().gen_range(-0.02..0.02));
            let receipt = FillReceipt::new(instrument, fill_price, delta, fees.fee(fill_price * delta));

            let before = p.clone();
            match p.apply_fill(&receipt, &fees) {
                Ok(fill) => {
                    assert!(fill.cash_after >= 0.0, "step {} went insolvent", step);
                }
                Err(_) => {
                    assert_eq!(p.cash().to_bits(), before.cash().to_bits());
                    for (id, entry) in before.entries() {
                        assert_eq!(p.shares(id).to_bits(), entry.shares.to_bits());
                    }
                }
            }

            assert!(p.cash() >= 0.0);
            for (id, entry) in p.entries() {
                assert!(entry.shares >= 0.0, "{} went short: {}", id, entry.shares);
            }
            assert_valuation_identity(&p);
        }
    }
}
