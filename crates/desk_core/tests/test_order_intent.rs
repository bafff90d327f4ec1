use desk_core::{OrderIntent, OrderType, Side, TimeInForce, ValidationError};
use rust_decimal_macros::dec;

#[test]
fn test_intent_rejects_non_positive_quantity() {
    // GIVEN: a market buy for zero BTC
    let result = OrderIntent::market("BTCUSDT", Side::Buy, dec!(0));

    // THEN: construction fails before anything else can use it
    assert_eq!(
        result,
        Err(ValidationError::NonPositiveQuantity { quantity: dec!(0) })
    );
    assert!(matches!(
        OrderIntent::market("BTCUSDT", Side::Sell, dec!(-1)),
        Err(ValidationError::NonPositiveQuantity { .. })
    ));
}

#[test]
fn test_limit_and_stop_limit_require_prices() {
    // GIVEN: a limit order without a price
    let limit = OrderIntent::new(
        "BTCUSDT",
        Side::Buy,
        OrderType::Limit,
        dec!(0.01),
        None,
        None,
        TimeInForce::Gtc,
    );
    assert_eq!(
        limit,
        Err(ValidationError::MissingPrice {
            order_type: OrderType::Limit
        })
    );

    // GIVEN: a stop-limit with a limit price but no trigger
    let stop = OrderIntent::new(
        "BTCUSDT",
        Side::Sell,
        OrderType::StopLimit,
        dec!(0.01),
        Some(dec!(59000)),
        None,
        TimeInForce::Gtc,
    );
    assert_eq!(stop, Err(ValidationError::MissingStopPrice));
}

#[test]
fn test_prices_must_be_positive() {
    let result = OrderIntent::stop_limit("BTCUSDT", Side::Sell, dec!(0.01), dec!(0), dec!(59000));
    assert!(matches!(
        result,
        Err(ValidationError::NonPositivePrice {
            field: "stop_price",
            ..
        })
    ));
}

#[test]
fn test_valid_intent_exposes_fields() {
    // GIVEN: an IOC limit sell
    let intent = OrderIntent::limit("BTCUSDT", Side::Sell, dec!(0.5), dec!(61000.5))
        .expect("valid intent")
        .with_time_in_force(TimeInForce::Ioc);

    // THEN: the fields read back unchanged
    assert_eq!(intent.symbol(), "BTCUSDT");
    assert_eq!(intent.side(), Side::Sell);
    assert_eq!(intent.order_type(), OrderType::Limit);
    assert_eq!(intent.quantity(), dec!(0.5));
    assert_eq!(intent.price(), Some(dec!(61000.5)));
    assert_eq!(intent.stop_price(), None);
    assert_eq!(intent.time_in_force(), TimeInForce::Ioc);
}
