use std::sync::Arc;
use std::time::Duration;

use desk_core::strategy::{StrategyProgress, TwapProgress};
use desk_core::{
    ApiError, AuditLog, DeskError, EngineLimits, EventType, ExecutionEngine, GatewayAdapter,
    GatewaySettings, ManualClock, MemorySink, MockExchange, MockOp, OrderIntent, RetryPolicy,
    Side, StrategySettings, StrategyStatus, SymbolRegistry, SymbolRules, TradingDesk, TwapPlan,
    ValidationError,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn btc_rules() -> SymbolRules {
    SymbolRules {
        symbol: "BTCUSDT".to_string(),
        tick_size: dec!(0.1),
        step_size: dec!(0.001),
        min_qty: dec!(0.001),
        min_notional: dec!(5),
    }
}

fn desk() -> (Arc<MockExchange>, MemorySink, TradingDesk) {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let mock = Arc::new(MockExchange::new(clock.clone()));
    mock.set_ticker("BTCUSDT", dec!(60000));
    let sink = MemorySink::new();
    let audit = Arc::new(AuditLog::new(clock.clone()).with_sink(Arc::new(sink.clone())));
    let settings = GatewaySettings {
        retry: RetryPolicy::new(4, Duration::from_millis(100)),
        ..GatewaySettings::default()
    };
    let gateway = Arc::new(GatewayAdapter::new(mock.clone(), clock.clone(), settings));
    let registry = Arc::new(SymbolRegistry::with_rules([btc_rules()]).unwrap());
    let engine = Arc::new(ExecutionEngine::new(
        gateway,
        registry,
        audit,
        clock,
        EngineLimits {
            max_order_notional: dec!(100000),
            ..EngineLimits::default()
        },
    ));
    (mock, sink, TradingDesk::new(engine, StrategySettings::default()))
}

fn market_buy(quantity: Decimal) -> OrderIntent {
    OrderIntent::market("BTCUSDT", Side::Buy, quantity).unwrap()
}

fn twap_progress(progress: &StrategyProgress) -> &TwapProgress {
    match progress {
        StrategyProgress::Twap(progress) => progress,
        other => panic!("expected twap progress, got {other:?}"),
    }
}

#[test]
fn test_one_btc_over_ten_minutes_in_four_slices() {
    // GIVEN: 1.0 BTC over 600s in 4 slices
    let plan = TwapPlan::new(market_buy(dec!(1.0)), Duration::from_secs(600), 4, &btc_rules())
        .expect("valid plan");

    // THEN: four 0.25 slices, 150s apart
    assert_eq!(plan.slice_quantities(), &[dec!(0.25); 4]);
    assert_eq!(plan.interval(), Duration::from_secs(150));
    assert_eq!(
        plan.slice_offsets(),
        vec![
            Duration::ZERO,
            Duration::from_secs(150),
            Duration::from_secs(300),
            Duration::from_secs(450),
        ]
    );
}

#[test]
fn test_slices_always_sum_to_parent_quantity() {
    let rules = btc_rules();
    for quantity in [dec!(1.0), dec!(1.234), dec!(0.5), dec!(7.001)] {
        for slices in 1..=60u32 {
            let plan = match TwapPlan::new(
                market_buy(quantity),
                Duration::from_secs(60),
                slices,
                &rules,
            ) {
                Ok(plan) => plan,
                Err(ValidationError::SliceRoundsToZero { .. }) => continue,
                Err(err) => panic!("unexpected error for {quantity}/{slices}: {err}"),
            };
            let total: Decimal = plan.slice_quantities().iter().copied().sum();
            assert_eq!(total, quantity, "{quantity} in {slices} slices");
            assert_eq!(plan.slice_quantities().len(), slices as usize);
            for slice in plan.slice_quantities() {
                assert!(*slice > Decimal::ZERO);
                assert!((*slice % rules.step_size).is_zero(), "{slice} off step");
            }
        }
    }
}

#[test]
fn test_last_slice_absorbs_remainder() {
    let plan = TwapPlan::new(market_buy(dec!(1.0)), Duration::from_secs(90), 3, &btc_rules()).unwrap();
    assert_eq!(
        plan.slice_quantities(),
        &[dec!(0.333), dec!(0.333), dec!(0.334)]
    );
}

#[test]
fn test_invalid_plans_rejected_without_network() {
    // GIVEN: a desk with a scripted venue
    let (mock, _sink, desk) = desk();

    // WHEN: plans with zero slices, zero duration or too little quantity are built
    let zero_slices = desk.plan_twap(market_buy(dec!(1)), Duration::from_secs(60), 0);
    let zero_duration = desk.plan_twap(market_buy(dec!(1)), Duration::ZERO, 4);
    let too_small = desk.plan_twap(market_buy(dec!(0.002)), Duration::from_secs(60), 5);

    // THEN: each fails validation and the venue was never contacted
    assert!(matches!(
        zero_slices,
        Err(DeskError::Validation(ValidationError::ZeroSliceCount))
    ));
    assert!(matches!(
        zero_duration,
        Err(DeskError::Validation(ValidationError::ZeroDuration))
    ));
    assert!(matches!(
        too_small,
        Err(DeskError::Validation(ValidationError::SliceRoundsToZero { .. }))
    ));
    assert!(mock.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_twap_runs_slices_on_schedule_and_completes() {
    // GIVEN: a 4-slice plan over 600s
    let (mock, sink, desk) = desk();
    let plan = desk
        .plan_twap(market_buy(dec!(1.0)), Duration::from_secs(600), 4)
        .unwrap();

    // WHEN: it runs to the end
    let handle = desk.start_twap(plan).unwrap();
    let snapshot = handle.join().await;

    // THEN: four submits, 150s apart, and an exact summary
    assert_eq!(snapshot.status, StrategyStatus::Completed);
    let submits = mock.calls_of(MockOp::Submit);
    assert_eq!(submits.len(), 4);
    for pair in submits.windows(2) {
        assert_eq!(pair[1].at - pair[0].at, Duration::from_secs(150));
    }
    let quantities: Vec<Decimal> = mock
        .submitted()
        .iter()
        .map(|(_, intent)| intent.quantity())
        .collect();
    assert_eq!(quantities, vec![dec!(0.25); 4]);

    let progress = twap_progress(&snapshot.progress);
    assert_eq!(progress.executed_slices.len(), 4);
    let summary = progress.summary.as_ref().expect("summary");
    assert_eq!(summary.executed_quantity, dec!(1));
    assert_eq!(summary.average_fill_price, Some(dec!(60000)));
    assert_eq!(summary.slices_filled, 4);
    assert_eq!(summary.fill_rate, dec!(1));
    assert_eq!(sink.of_type(EventType::TwapSliceSubmitted).len(), 4);
    assert_eq!(sink.of_type(EventType::TwapCompleted).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_after_two_slices_submits_no_more() {
    // GIVEN: a running 4-slice plan
    let (mock, sink, desk) = desk();
    let plan = desk
        .plan_twap(market_buy(dec!(1.0)), Duration::from_secs(600), 4)
        .unwrap();
    let handle = desk.start_twap(plan).unwrap();

    // WHEN: the user stops it after the second slice went out
    tokio::time::sleep(Duration::from_secs(160)).await;
    let snapshot = desk.stop(handle.id()).await.unwrap();

    // THEN: exactly two slices exist and the plan is CANCELED
    assert_eq!(snapshot.status, StrategyStatus::Canceled);
    assert_eq!(twap_progress(&snapshot.progress).executed_slices.len(), 2);
    tokio::time::sleep(Duration::from_secs(1_000)).await;
    assert_eq!(mock.call_count(MockOp::Submit), 2);
    assert_eq!(sink.of_type(EventType::TwapCanceled).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_slice_aborts_plan_and_reports_open_orders() {
    // GIVEN: limit slices that rest on the book, and a venue that starts failing on slice 3
    let (mock, sink, desk) = desk();
    let parent = OrderIntent::limit("BTCUSDT", Side::Buy, dec!(0.4), dec!(59000)).unwrap();
    let plan = desk.plan_twap(parent, Duration::from_secs(400), 4).unwrap();
    mock.pass_next(MockOp::Submit);
    mock.pass_next(MockOp::Submit);
    mock.fail_times(MockOp::Submit, 10, ApiError::from_status(503, "unavailable"));

    // WHEN: the plan runs
    let handle = desk.start_twap(plan).unwrap();
    let snapshot = handle.join().await;

    // THEN: FAILED, the two resting slices are reported and left alone, nothing after slice 3
    assert_eq!(snapshot.status, StrategyStatus::Failed);
    assert_eq!(snapshot.open_orders.len(), 2);
    assert_eq!(mock.open_order_ids(), snapshot.open_orders);
    assert_eq!(mock.call_count(MockOp::Cancel), 0);
    assert_eq!(mock.call_count(MockOp::Submit), 2 + 4);
    let failed = sink.of_type(EventType::TwapFailed);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].details["attempts"], 4);
}

#[tokio::test(start_paused = true)]
async fn test_only_one_strategy_at_a_time() {
    let (_mock, _sink, desk) = desk();
    let first = desk
        .start_twap(desk.plan_twap(market_buy(dec!(0.1)), Duration::from_secs(60), 2).unwrap())
        .unwrap();

    let second = desk.start_twap(
        desk.plan_twap(market_buy(dec!(0.1)), Duration::from_secs(60), 2)
            .unwrap(),
    );
    assert!(matches!(
        second,
        Err(DeskError::Validation(ValidationError::StrategyAlreadyRunning { handle })) if handle == first.id()
    ));

    first.join().await;
    let third = desk.start_twap(
        desk.plan_twap(market_buy(dec!(0.1)), Duration::from_secs(60), 2)
            .unwrap(),
    );
    assert!(third.is_ok());
    assert_eq!(desk.status(first.id()).unwrap().status, StrategyStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_finished_handles_are_pruned_past_the_history_limit() {
    // GIVEN: twenty single-slice plans run one after another
    let (_mock, _sink, desk) = desk();
    let mut ids = Vec::new();
    for _ in 0..20 {
        let plan = desk
            .plan_twap(market_buy(dec!(0.01)), Duration::from_secs(1), 1)
            .unwrap();
        let handle = desk.start_twap(plan).unwrap();
        handle.join().await;
        ids.push(handle.id());
    }

    // THEN: the oldest finished handles are gone, the recent ones still answer
    for id in &ids[..3] {
        assert!(matches!(
            desk.status(*id),
            Err(DeskError::Validation(ValidationError::UnknownStrategy { .. }))
        ));
    }
    for id in &ids[3..] {
        assert_eq!(desk.status(*id).unwrap().status, StrategyStatus::Completed);
    }
}
