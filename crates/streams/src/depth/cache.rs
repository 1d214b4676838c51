use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use interface::PriceLevel;

/// 호가 값을 꺼낼 때 쓰는 숫자 타입
pub trait LevelValue: Sized {
    fn from_decimal(value: Decimal) -> Self;
}

impl LevelValue for Decimal {
    fn from_decimal(value: Decimal) -> Self {
        value
    }
}

impl LevelValue for f64 {
    fn from_decimal(value: Decimal) -> Self {
        value.to_f64().unwrap_or_default()
    }
}

impl LevelValue for String {
    fn from_decimal(value: Decimal) -> Self {
        value.normalize().to_string()
    }
}

/// 심볼 하나의 호가창
///
/// 가격은 side마다 한 번만 나타나고 수량 0인 단계는 보관하지 않는다.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthCache {
    symbol: String,
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    pub update_time: Option<DateTime<Utc>>,
}

impl DepthCache {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            update_time: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// 수량 0이면 해당 가격을 지운다
    pub fn add_bid(&mut self, level: PriceLevel) {
        upsert(&mut self.bids, level);
    }

    pub fn add_ask(&mut self, level: PriceLevel) {
        upsert(&mut self.asks, level);
    }

    /// 가격 내림차순 `[price, quantity]`
    pub fn get_bids<T: LevelValue>(&self) -> Vec<[T; 2]> {
        self.bids
            .iter()
            .rev()
            .map(|(price, qty)| [T::from_decimal(*price), T::from_decimal(*qty)])
            .collect()
    }

    /// 가격 오름차순 `[price, quantity]`
    pub fn get_asks<T: LevelValue>(&self) -> Vec<[T; 2]> {
        self.asks
            .iter()
            .map(|(price, qty)| [T::from_decimal(*price), T::from_decimal(*qty)])
            .collect()
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids
            .iter()
            .next_back()
            .map(|(price, qty)| PriceLevel::new(*price, *qty))
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks
            .iter()
            .next()
            .map(|(price, qty)| PriceLevel::new(*price, *qty))
    }

    /// partial book 메시지로 양쪽을 통째로 바꾼다
    pub fn replace_levels(&mut self, bids: &[PriceLevel], asks: &[PriceLevel]) {
        self.bids.clear();
        self.asks.clear();
        for bid in bids {
            self.add_bid(*bid);
        }
        for ask in asks {
            self.add_ask(*ask);
        }
    }

    pub fn bid_depth(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_depth(&self) -> usize {
        self.asks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// 이벤트 시각(ms)으로 update_time 설정
    pub fn set_update_time_millis(&mut self, millis: u64) {
        if let Some(time) = i64::try_from(millis)
            .ok()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
        {
            self.update_time = Some(time);
        }
    }
}

fn upsert(side: &mut BTreeMap<Decimal, Decimal>, level: PriceLevel) {
    if level.quantity.is_zero() {
        side.remove(&level.price);
    } else {
        side.insert(level.price, level.quantity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn level(price: Decimal, quantity: Decimal) -> PriceLevel {
        PriceLevel::new(price, quantity)
    }

    #[test]
    fn test_sorted_sides_and_zero_removal() {
        let mut cache = DepthCache::new("BNBBTC");
        cache.add_bid(level(dec!(0.0024), dec!(10)));
        cache.add_bid(level(dec!(0.0026), dec!(5)));
        cache.add_bid(level(dec!(0.0025), dec!(1)));
        cache.add_ask(level(dec!(0.0028), dec!(3)));
        cache.add_ask(level(dec!(0.0027), dec!(7)));

        assert_eq!(
            cache.get_bids::<Decimal>(),
            vec![
                [dec!(0.0026), dec!(5)],
                [dec!(0.0025), dec!(1)],
                [dec!(0.0024), dec!(10)]
            ]
        );
        assert_eq!(
            cache.get_asks::<Decimal>(),
            vec![[dec!(0.0027), dec!(7)], [dec!(0.0028), dec!(3)]]
        );

        // 같은 가격은 덮어쓰고, 수량 0은 제거
        cache.add_bid(level(dec!(0.0025), dec!(4)));
        cache.add_ask(level(dec!(0.0027), dec!(0)));
        cache.add_ask(level(dec!(0.0030), dec!(0)));
        assert_eq!(cache.best_bid(), Some(level(dec!(0.0026), dec!(5))));
        assert_eq!(cache.get_bids::<Decimal>()[1], [dec!(0.0025), dec!(4)]);
        assert_eq!(cache.best_ask(), Some(level(dec!(0.0028), dec!(3))));
        assert_eq!(cache.ask_depth(), 1);
    }

    #[test]
    fn test_float_and_string_views() {
        let mut cache = DepthCache::new("BNBBTC");
        cache.add_bid(level(dec!(100.50), dec!(2.000)));

        assert_eq!(cache.get_bids::<f64>(), vec![[100.5, 2.0]]);
        assert_eq!(
            cache.get_bids::<String>(),
            vec![["100.5".to_string(), "2".to_string()]]
        );
    }

    #[test]
    fn test_replace_levels() {
        let mut cache = DepthCache::new("BTCUSDT");
        cache.add_bid(level(dec!(1), dec!(1)));
        cache.add_ask(level(dec!(9), dec!(1)));

        cache.replace_levels(
            &[level(dec!(2), dec!(3)), level(dec!(3), dec!(0))],
            &[level(dec!(4), dec!(5))],
        );
        assert_eq!(cache.get_bids::<Decimal>(), vec![[dec!(2), dec!(3)]]);
        assert_eq!(cache.get_asks::<Decimal>(), vec![[dec!(4), dec!(5)]]);
    }

    #[test]
    fn test_update_time() {
        let mut cache = DepthCache::new("BNBBTC");
        assert!(cache.update_time.is_none());
        cache.set_update_time_millis(1_589_436_922_972);
        assert_eq!(
            cache.update_time.map(|t| t.timestamp_millis()),
            Some(1_589_436_922_972)
        );
    }

    #[derive(Debug, Clone)]
    struct Op {
        bid: bool,
        price: u32,
        quantity: u32,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        // 좁은 가격대에서 같은 가격 갱신/삭제가 자주 일어나도록
        (any::<bool>(), 1u32..40, 0u32..4).prop_map(|(bid, price, quantity)| Op {
            bid,
            price,
            quantity,
        })
    }

    proptest! {
        #[test]
        fn prop_cache_matches_last_write_per_price(ops in prop::collection::vec(op_strategy(), 0..200)) {
            let mut cache = DepthCache::new("TEST");
            let mut bids: HashMap<u32, u32> = HashMap::new();
            let mut asks: HashMap<u32, u32> = HashMap::new();

            for op in &ops {
                let lvl = level(Decimal::from(op.price), Decimal::from(op.quantity));
                let model = if op.bid { &mut bids } else { &mut asks };
                if op.quantity == 0 {
                    model.remove(&op.price);
                } else {
                    model.insert(op.price, op.quantity);
                }
                if op.bid {
                    cache.add_bid(lvl);
                } else {
                    cache.add_ask(lvl);
                }
            }

            let got_bids = cache.get_bids::<Decimal>();
            let got_asks = cache.get_asks::<Decimal>();

            // 정렬: bids 내림차순, asks 오름차순 (가격 중복 없음)
            prop_assert!(got_bids.windows(2).all(|w| w[0][0] > w[1][0]));
            prop_assert!(got_asks.windows(2).all(|w| w[0][0] < w[1][0]));

            // 수량 0 단계 없음
            prop_assert!(got_bids.iter().chain(got_asks.iter()).all(|l| !l[1].is_zero()));

            // 가격별 마지막 기록과 일치
            prop_assert_eq!(got_bids.len(), bids.len());
            prop_assert_eq!(got_asks.len(), asks.len());
            for [price, qty] in &got_bids {
                let key = price.to_u32().unwrap();
                prop_assert_eq!(Decimal::from(bids[&key]), *qty);
            }
            for [price, qty] in &got_asks {
                let key = price.to_u32().unwrap();
                prop_assert_eq!(Decimal::from(asks[&key]), *qty);
            }
        }
    }
}
