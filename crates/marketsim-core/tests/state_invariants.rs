//! SymbolState 불변식 속성 테스트.

use chrono::Utc;
use marketsim_core::{Candle, SymbolState};
use proptest::prelude::*;

proptest! {
    #[test]
    fn prop_window_brackets_price(
        initial in 0.01f64..1_000_000.0,
        moves in prop::collection::vec(prop_oneof![
            -1e6f64..1e6,
            Just(f64::NAN),
            Just(f64::INFINITY),
            Just(0.0),
        ], 1..200),
    ) {
        let now = Utc::now();
        let mut state = SymbolState::new("TEST", initial, now);
        for (i, candidate) in moves.into_iter().enumerate() {
            state.apply(candidate, 1.0, now);
            if i % 17 == 0 {
                state.reset_window();
            }
            prop_assert!(state.price > 0.0);
            prop_assert!(state.high >= state.price);
            prop_assert!(state.price >= state.low);
        }
    }

    #[test]
    fn prop_candle_stays_consistent(
        open in 0.01f64..10_000.0,
        prices in prop::collection::vec(0.01f64..10_000.0, 1..100),
    ) {
        let mut candle = Candle::open_at(Utc::now(), open);
        for p in &prices {
            candle.apply(*p, 0.5);
        }
        prop_assert!(candle.is_consistent());
        prop_assert_eq!(candle.trade_count as usize, prices.len());
    }
}
