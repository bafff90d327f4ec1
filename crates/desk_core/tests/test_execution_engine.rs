use std::sync::Arc;
use std::time::Duration;

use desk_core::{
    ApiError, AuditLog, DeskError, EngineLimits, EventType, ExecutionEngine, GatewayAdapter,
    GatewaySettings, ManualClock, MemorySink, MockExchange, MockOp, OrderIntent, OrderRecord,
    OrderSnapshot, OrderStatus, RetryPolicy, Side, SymbolRegistry, SymbolRules, ValidationError,
};
use rust_decimal_macros::dec;

struct Harness {
    mock: Arc<MockExchange>,
    sink: MemorySink,
    engine: ExecutionEngine,
}

fn btc_rules() -> SymbolRules {
    SymbolRules {
        symbol: "BTCUSDT".to_string(),
        tick_size: dec!(0.1),
        step_size: dec!(0.001),
        min_qty: dec!(0.001),
        min_notional: dec!(5),
    }
}

fn harness() -> Harness {
    harness_with(EngineLimits {
        max_order_notional: dec!(10000),
        ..EngineLimits::default()
    })
}

fn harness_with(limits: EngineLimits) -> Harness {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let mock = Arc::new(MockExchange::new(clock.clone()));
    mock.set_ticker("BTCUSDT", dec!(60000));
    let sink = MemorySink::new();
    let audit = Arc::new(AuditLog::new(clock.clone()).with_sink(Arc::new(sink.clone())));
    let settings = GatewaySettings {
        rate_limit_per_minute: 6_000,
        retry: RetryPolicy::new(4, Duration::from_millis(100)),
        ..GatewaySettings::default()
    };
    let gateway = Arc::new(
        GatewayAdapter::new(mock.clone(), clock.clone(), settings).with_audit(audit.clone()),
    );
    let registry = Arc::new(SymbolRegistry::with_rules([btc_rules()]).unwrap());
    let engine = ExecutionEngine::new(gateway, registry, audit, clock, limits);
    Harness { mock, sink, engine }
}

#[tokio::test(start_paused = true)]
async fn test_place_limit_order_tracks_record_and_audits() {
    // GIVEN: a valid limit buy
    let h = harness();
    let intent = OrderIntent::limit("BTCUSDT", Side::Buy, dec!(0.01), dec!(59000)).unwrap();

    // WHEN: it is placed
    let record = h.engine.place_order(intent.clone()).await.expect("placed");

    // THEN: the engine tracks it and the submission is audited
    assert_eq!(record.status, OrderStatus::Open);
    assert_eq!(record.intent, intent);
    assert_eq!(h.engine.order(&record.exchange_order_id), Some(record.clone()));
    let submitted = h.sink.of_type(EventType::OrderSubmitted);
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].order_id.as_deref(), Some(record.exchange_order_id.as_str()));
    assert_eq!(submitted[0].details["intent"]["price"], "59000");
}

#[tokio::test(start_paused = true)]
async fn test_precision_violation_rejected_before_network() {
    // GIVEN: a price between ticks
    let h = harness();
    let intent = OrderIntent::limit("BTCUSDT", Side::Buy, dec!(0.01), dec!(59000.05)).unwrap();

    // WHEN: it is placed
    let err = h.engine.place_order(intent).await.unwrap_err();

    // THEN: validation error, and the venue saw nothing at all
    assert!(matches!(
        err,
        DeskError::Validation(ValidationError::PriceOffTick { .. })
    ));
    assert!(h.mock.calls().is_empty());
    assert_eq!(h.sink.of_type(EventType::OrderRejected).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_notional_cap_enforced() {
    let h = harness();
    let intent = OrderIntent::limit("BTCUSDT", Side::Buy, dec!(0.2), dec!(60000)).unwrap();

    let err = h.engine.place_order(intent).await.unwrap_err();

    assert!(matches!(
        err,
        DeskError::Validation(ValidationError::NotionalAboveCap { .. })
    ));
    assert!(h.mock.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_symbol_rejected() {
    let h = harness();
    let intent = OrderIntent::market("DOGEUSDT", Side::Buy, dec!(100)).unwrap();

    let err = h.engine.place_order(intent).await.unwrap_err();

    assert!(matches!(
        err,
        DeskError::Validation(ValidationError::UnknownSymbol { .. })
    ));
    assert!(h.mock.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_market_order_checked_against_ticker_and_filled() {
    // GIVEN: BTC at 60000 and a 0.1 market buy (6000 notional)
    let h = harness();
    let intent = OrderIntent::market("BTCUSDT", Side::Buy, dec!(0.1)).unwrap();

    // WHEN: it is placed
    let record = h.engine.place_order(intent).await.expect("placed");

    // THEN: the ticker was read first and the fill is audited
    assert_eq!(h.mock.call_count(MockOp::Ticker), 1);
    assert_eq!(record.status, OrderStatus::Filled);
    assert_eq!(record.avg_fill_price, Some(dec!(60000)));
    assert_eq!(h.sink.of_type(EventType::OrderFilled).len(), 1);

    // AND: a market order above the cap is refused
    let too_big = OrderIntent::market("BTCUSDT", Side::Buy, dec!(0.5)).unwrap();
    assert!(matches!(
        h.engine.place_order(too_big).await,
        Err(DeskError::Validation(ValidationError::NotionalAboveCap { .. }))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_order_and_unknown_id() {
    let h = harness();
    let record = h
        .engine
        .place_order(OrderIntent::limit("BTCUSDT", Side::Sell, dec!(0.01), dec!(65000)).unwrap())
        .await
        .unwrap();

    let canceled = h.engine.cancel_order(&record.exchange_order_id).await.unwrap();
    assert_eq!(canceled.status, OrderStatus::Canceled);
    assert_eq!(h.sink.of_type(EventType::OrderCanceled).len(), 1);

    let cancels_before = h.mock.call_count(MockOp::Cancel);
    let err = h.engine.cancel_order("does-not-exist").await.unwrap_err();
    assert!(matches!(err, DeskError::NotFound(_)));
    assert_eq!(h.mock.call_count(MockOp::Cancel), cancels_before);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_reports_fill_once() {
    // GIVEN: a resting order that fills on the venue
    let h = harness();
    let record = h
        .engine
        .place_order(OrderIntent::limit("BTCUSDT", Side::Buy, dec!(0.01), dec!(59000)).unwrap())
        .await
        .unwrap();
    h.mock.fill_order(&record.exchange_order_id);

    // WHEN: it is refreshed twice
    let first = h.engine.refresh_order(&record.exchange_order_id).await.unwrap();
    let second = h.engine.refresh_order(&record.exchange_order_id).await.unwrap();

    // THEN: one fill event, same final record
    assert_eq!(first.status, OrderStatus::Filled);
    assert_eq!(first.filled_quantity, dec!(0.01));
    assert_eq!(first, second);
    assert_eq!(h.sink.of_type(EventType::OrderFilled).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_submit_logged_with_attempts() {
    let h = harness();
    h.mock
        .fail_times(MockOp::Submit, 10, ApiError::from_status(500, "internal error"));

    let err = h
        .engine
        .place_order(OrderIntent::limit("BTCUSDT", Side::Buy, dec!(0.01), dec!(59000)).unwrap())
        .await
        .unwrap_err();

    assert!(err.is_transient());
    let failed = h.sink.of_type(EventType::OrderFailed);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].details["attempts"], 4);
    assert_eq!(failed[0].details["intent"]["symbol"], "BTCUSDT");
}

#[tokio::test(start_paused = true)]
async fn test_audit_sequence_increases_by_one() {
    let h = harness();
    for price in [dec!(58000), dec!(58100), dec!(58200)] {
        h.engine
            .place_order(OrderIntent::limit("BTCUSDT", Side::Buy, dec!(0.01), price).unwrap())
            .await
            .unwrap();
    }

    let seqs: Vec<u64> = h.sink.events().iter().map(|event| event.seq).collect();
    assert!(!seqs.is_empty());
    assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1), "seqs {seqs:?}");
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_open_orders_picks_up_remote_fills() {
    // GIVEN: two resting orders, one of which fills remotely
    let h = harness();
    let a = h
        .engine
        .place_order(OrderIntent::limit("BTCUSDT", Side::Buy, dec!(0.01), dec!(58000)).unwrap())
        .await
        .unwrap();
    let b = h
        .engine
        .place_order(OrderIntent::limit("BTCUSDT", Side::Buy, dec!(0.01), dec!(57000)).unwrap())
        .await
        .unwrap();
    h.mock.fill_order(&a.exchange_order_id);
    assert_eq!(h.engine.open_orders("BTCUSDT").len(), 2);

    // WHEN: the open-order list is reconciled
    let open = h.engine.reconcile_open_orders("BTCUSDT").await.unwrap();

    // THEN: only the untouched order is still open
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].exchange_order_id, b.exchange_order_id);
    assert_eq!(
        h.engine.order(&a.exchange_order_id).unwrap().status,
        OrderStatus::Filled
    );
}

async fn resting_buy(h: &Harness, price: rust_decimal::Decimal) -> OrderRecord {
    h.engine
        .place_order(OrderIntent::limit("BTCUSDT", Side::Buy, dec!(0.01), price).unwrap())
        .await
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_pushed_updates_move_the_record_without_polling() {
    // GIVEN: a resting order
    let h = harness();
    let record = resting_buy(&h, dec!(58000)).await;
    let status_calls = h.mock.call_count(MockOp::Status);

    // WHEN: a partial fill and then the full fill are pushed
    let partial = h
        .engine
        .apply_update(&OrderSnapshot {
            order_id: record.exchange_order_id.clone(),
            status: OrderStatus::PartiallyFilled,
            filled_quantity: dec!(0.004),
            avg_fill_price: Some(dec!(58000)),
            update_ts_ms: 1_700_000_000_500,
        })
        .unwrap();
    let filled = h
        .engine
        .apply_update(&OrderSnapshot {
            order_id: record.exchange_order_id.clone(),
            status: OrderStatus::Filled,
            filled_quantity: dec!(0.01),
            avg_fill_price: Some(dec!(58000)),
            update_ts_ms: 1_700_000_000_900,
        })
        .unwrap();

    // THEN: both transitions are recorded and audited, with no venue round trip
    assert_eq!(partial.status, OrderStatus::PartiallyFilled);
    assert_eq!(filled.status, OrderStatus::Filled);
    assert_eq!(filled.filled_quantity, dec!(0.01));
    assert_eq!(h.sink.of_type(EventType::OrderFilled).len(), 1);
    assert_eq!(h.mock.call_count(MockOp::Status), status_calls);

    // AND: an update for an order this engine never placed is ignored
    let stranger = OrderSnapshot {
        order_id: "elsewhere-1".to_string(),
        ..filled_snapshot(&record)
    };
    assert!(h.engine.apply_update(&stranger).is_none());
}

fn filled_snapshot(record: &OrderRecord) -> OrderSnapshot {
    OrderSnapshot {
        order_id: record.exchange_order_id.clone(),
        status: OrderStatus::Filled,
        filled_quantity: record.intent.quantity(),
        avg_fill_price: record.intent.price(),
        update_ts_ms: 1_700_000_001_000,
    }
}

#[tokio::test(start_paused = true)]
async fn test_closed_orders_beyond_retention_are_evicted() {
    // GIVEN: an engine that keeps two closed orders
    let h = harness_with(EngineLimits {
        max_order_notional: dec!(10000),
        retained_closed_orders: 2,
    });
    let resting = resting_buy(&h, dec!(50000)).await;

    // WHEN: ten orders are placed and filled one after another
    let mut filled = Vec::new();
    for step in 0..10u32 {
        let record = resting_buy(&h, dec!(57000) + rust_decimal::Decimal::from(step)).await;
        h.engine.apply_update(&filled_snapshot(&record));
        filled.push(record.exchange_order_id);
    }

    // THEN: only the open order and the two newest closed ones are held
    assert_eq!(h.engine.tracked_order_count(), 3);
    assert!(h.engine.order(&resting.exchange_order_id).is_some());
    assert!(h.engine.order(&filled[9]).is_some());
    assert!(h.engine.order(&filled[8]).is_some());
    assert!(h.engine.order(&filled[0]).is_none());
    assert_eq!(h.sink.of_type(EventType::OrderFilled).len(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_all_covers_untracked_orders_and_collects_failures() {
    // GIVEN: two tracked orders and one placed around the engine
    let h = harness();
    let a = resting_buy(&h, dec!(58000)).await;
    let b = resting_buy(&h, dec!(57000)).await;
    let outside = OrderIntent::limit("BTCUSDT", Side::Sell, dec!(0.01), dec!(66000)).unwrap();
    let c = h.engine.gateway().submit_order(&outside).await.unwrap();
    assert!(h.engine.order(&c.exchange_order_id).is_none());

    // WHEN: the first cancel is refused and everything is canceled
    h.mock
        .fail_next(MockOp::Cancel, ApiError::from_status(400, "cancel rejected"));
    let report = h.engine.cancel_all("BTCUSDT").await.unwrap();

    // THEN: the refusal is reported and the rest still go
    assert_eq!(
        report.canceled,
        vec![b.exchange_order_id.clone(), c.exchange_order_id.clone()]
    );
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, a.exchange_order_id);
    assert_eq!(h.mock.open_order_ids(), vec![a.exchange_order_id.clone()]);
    assert_eq!(
        h.engine.order(&b.exchange_order_id).unwrap().status,
        OrderStatus::Canceled
    );
    assert_eq!(h.sink.of_type(EventType::OrdersCanceledAll).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_all_stops_on_auth_failure() {
    let h = harness();
    resting_buy(&h, dec!(58000)).await;
    resting_buy(&h, dec!(57000)).await;
    h.mock
        .fail_next(MockOp::Cancel, ApiError::from_status(401, "invalid api key"));

    let err = h.engine.cancel_all("BTCUSDT").await.unwrap_err();

    assert!(err.is_fatal_for_strategy());
    assert_eq!(h.mock.call_count(MockOp::Cancel), 1);
    assert_eq!(h.mock.open_order_ids().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_order_history_and_balances() {
    // GIVEN: three orders on the venue and a funded account
    let h = harness();
    for price in [dec!(58000), dec!(58100), dec!(58200)] {
        resting_buy(&h, price).await;
    }
    h.mock.set_balance("USDT", dec!(1000), dec!(940.5));

    // WHEN: the last two orders and the balances are requested
    let history = h.engine.order_history("BTCUSDT", 2).await.unwrap();
    let balances = h.engine.account_balances().await.unwrap();

    // THEN: newest two, oldest first, with side and size
    let prices: Vec<_> = history.iter().map(|entry| entry.price).collect();
    assert_eq!(prices, vec![Some(dec!(58100)), Some(dec!(58200))]);
    assert!(history.iter().all(|entry| entry.side == Side::Buy && entry.quantity == dec!(0.01)));
    assert_eq!(balances.len(), 1);
    assert_eq!(balances[0].available_balance, dec!(940.5));

    // AND: an unknown symbol is refused before any request
    let before = h.mock.call_count(MockOp::History);
    assert!(matches!(
        h.engine.order_history("NOPEUSDT", 10).await,
        Err(DeskError::Validation(ValidationError::UnknownSymbol { .. }))
    ));
    assert_eq!(h.mock.call_count(MockOp::History), before);
}
