use chrono::{Days, NaiveDate};
use data_ingestion::{PriceRecord, PriceSeries, merge};
use proptest::prelude::*;

fn base() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()
}

fn arb_records() -> impl Strategy<Value = Vec<PriceRecord>> {
    prop::collection::vec((0u64..120, 0.0f64..500.0), 0..60).prop_map(|rows| {
        rows.into_iter()
            .map(|(offset, price)| PriceRecord {
                date: base() + Days::new(offset),
                price,
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn merge_is_idempotent(a in arb_records(), b in arb_records()) {
        let a = PriceSeries::from_records(a);
        let b = PriceSeries::from_records(b);

        let once = merge(&a, &b);
        let twice = merge(&once, &b);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn merge_keeps_one_record_per_date_from_latest_source(
        a in arb_records(),
        b in arb_records(),
    ) {
        let a = PriceSeries::from_records(a);
        let b = PriceSeries::from_records(b);
        let merged = merge(&a, &b);

        let dates = merged.dates();
        prop_assert!(dates.windows(2).all(|w| w[0] < w[1]));

        for record in merged.iter() {
            let expected = b
                .iter()
                .find(|r| r.date == record.date)
                .or_else(|| a.iter().find(|r| r.date == record.date));
            prop_assert_eq!(Some(record), expected);
        }
        for record in a.iter().chain(b.iter()) {
            prop_assert!(dates.contains(&record.date));
        }
    }

    #[test]
    fn raw_duplicates_resolve_to_last_seen(records in arb_records()) {
        let series = PriceSeries::from_records(records.clone());

        for record in series.iter() {
            let last = records.iter().rev().find(|r| r.date == record.date);
            prop_assert_eq!(Some(record), last);
        }
    }
}
