//! Pending offer list unit tests
//! Tests ordering, amount edits, reconciliation and valuation

use repo_ledger::external::OfferOutcome;
use repo_ledger::{
    InstrumentList, LedgerError, OfferError, OfferState, PendingOfferList, ReconcileOutcome,
};
use rstest::*;
use services_common::{AssetId, AuctionId, OfferId, SECS_PER_DAY, Timestamp};
use std::sync::Arc;
use test_utils::*;

fn offer_ids(raw: &[u64]) -> Vec<OfferId> {
    raw.iter().copied().map(OfferId::new).collect()
}

fn filled(instrument: &Arc<MockInstrument>, repo_amount: u128) -> OfferOutcome {
    OfferOutcome::Filled {
        instrument: Arc::clone(instrument) as _,
        repo_amount,
    }
}

mod insertion_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[rstest]
    fn test_update_amount_keeps_single_entry(
        instruments: InstrumentFactory,
        offers: OfferFactory,
        mut offer_list: PendingOfferList,
    ) {
        let instrument = instruments.build(1);
        let auction = auction(10);
        let id = OfferId::new(1);

        offer_list
            .insert_pending(id, offers.build(id, &instrument, &auction, 1_000_000))
            .unwrap();
        offer_list
            .insert_pending(id, offers.build(id, &instrument, &auction, 4_000_000))
            .unwrap();

        assert_eq!(offer_list.count_offers(), 1);
        assert_eq!(offer_list.get_offer(id).unwrap().amount, 4_000_000);
        assert_offer_list_invariants(&offer_list);
    }

    #[rstest]
    fn test_offers_sorted_by_auction(
        instruments: InstrumentFactory,
        offers: OfferFactory,
        mut offer_list: PendingOfferList,
    ) {
        let instrument = instruments.build(1);
        let (first, second) = (auction(1), auction(2));

        offer_list
            .insert_pending(
                OfferId::new(1),
                offers.build(OfferId::new(1), &instrument, &second, 500),
            )
            .unwrap();
        offer_list
            .insert_pending(
                OfferId::new(2),
                offers.build(OfferId::new(2), &instrument, &first, 500),
            )
            .unwrap();

        assert_eq!(offer_list.pending_offers(), offer_ids(&[2, 1]));
    }

    #[rstest]
    fn test_same_auction_keeps_submission_order(
        instruments: InstrumentFactory,
        offers: OfferFactory,
        mut offer_list: PendingOfferList,
    ) {
        let instrument = instruments.build(1);
        let (low, high) = (auction(1), auction(5));

        for (id, auction) in [(1, &high), (2, &low), (3, &high), (4, &low), (5, &high)] {
            let offer_id = OfferId::new(id);
            offer_list
                .insert_pending(offer_id, offers.build(offer_id, &instrument, auction, 100))
                .unwrap();
        }

        assert_eq!(offer_list.pending_offers(), offer_ids(&[2, 4, 1, 3, 5]));
        assert_offer_list_invariants(&offer_list);
    }

    #[rstest]
    fn test_update_keeps_position(
        instruments: InstrumentFactory,
        offers: OfferFactory,
        mut offer_list: PendingOfferList,
    ) {
        let instrument = instruments.build(1);
        let shared = auction(3);
        for id in 1..=3 {
            let offer_id = OfferId::new(id);
            offer_list
                .insert_pending(offer_id, offers.build(offer_id, &instrument, &shared, 100))
                .unwrap();
        }

        let first = OfferId::new(1);
        offer_list
            .insert_pending(first, offers.build(first, &instrument, &shared, 900))
            .unwrap();
        assert_eq!(offer_list.pending_offers(), offer_ids(&[1, 2, 3]));
    }

    #[rstest]
    fn test_zero_amount_rejected(
        instruments: InstrumentFactory,
        offers: OfferFactory,
        mut offer_list: PendingOfferList,
    ) {
        let id = OfferId::new(1);
        let result =
            offer_list.insert_pending(id, offers.build(id, &instruments.build(1), &auction(1), 0));
        assert_eq!(result, Err(OfferError::ZeroAmount(id).into()));
        assert!(offer_list.is_empty());
    }

    #[rstest]
    fn test_amount_must_match_locker(
        instruments: InstrumentFactory,
        offers: OfferFactory,
        mut offer_list: PendingOfferList,
    ) {
        let id = OfferId::new(1);
        offers.locker().lock(id, 700);
        let result = offer_list.insert_pending(
            id,
            offers.build_unlocked(&instruments.build(1), &auction(1), 500),
        );
        assert_eq!(
            result,
            Err(OfferError::AmountMismatch {
                offer: id,
                stored: 500,
                locked: 700,
            }
            .into())
        );
        assert!(!offer_list.offer_in_list(id));
    }

    #[rstest]
    fn test_auction_cannot_change(
        instruments: InstrumentFactory,
        offers: OfferFactory,
        mut offer_list: PendingOfferList,
    ) {
        let instrument = instruments.build(1);
        let id = OfferId::new(1);
        offer_list
            .insert_pending(id, offers.build(id, &instrument, &auction(1), 100))
            .unwrap();

        let result = offer_list.insert_pending(id, offers.build(id, &instrument, &auction(2), 200));
        assert_eq!(
            result,
            Err(OfferError::AuctionChanged {
                offer: id,
                existing: AuctionId::new(1),
                requested: AuctionId::new(2),
            }
            .into())
        );
    }

    #[rstest]
    fn test_completed_auction_rejects_new_offers(
        instruments: InstrumentFactory,
        offers: OfferFactory,
        mut offer_list: PendingOfferList,
    ) {
        let closed = auction(1);
        closed.complete();
        let id = OfferId::new(1);

        let result = offer_list.insert_pending(id, offers.build(id, &instruments.build(1), &closed, 100));
        assert_eq!(
            result,
            Err(OfferError::AuctionCompleted {
                offer: id,
                auction: AuctionId::new(1),
            }
            .into())
        );
        assert!(offer_list.is_empty());
    }

    #[rstest]
    fn test_repeat_insert_is_idempotent(
        instruments: InstrumentFactory,
        offers: OfferFactory,
        mut offer_list: PendingOfferList,
    ) {
        let instrument = instruments.build(1);
        let shared = auction(1);
        let id = OfferId::new(1);
        for _ in 0..3 {
            offer_list
                .insert_pending(id, offers.build(id, &instrument, &shared, 250))
                .unwrap();
        }
        assert_eq!(offer_list.pending_offers(), offer_ids(&[1]));
        assert_eq!(offer_list.get_offer(id).unwrap().amount, 250);
    }
}

mod reconcile_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[rstest]
    fn test_remove_completed(
        now: Timestamp,
        instruments: InstrumentFactory,
        offers: OfferFactory,
        mut offer_list: PendingOfferList,
        mut instrument_list: InstrumentList,
    ) {
        let credited = instruments.clone().maturing_in_days(7).build(1);
        let unlisted = instruments.clone().with_purchase_asset(AssetId::new(9)).build(2);
        let open_instrument = instruments.build(3);

        let done = auction(1);
        let open = auction(2);
        let specs = [
            (1, &credited, &done),
            (2, &credited, &done),
            (3, &unlisted, &done),
            (4, &open_instrument, &open),
        ];
        for (id, instrument, auction) in specs {
            let offer_id = OfferId::new(id);
            offer_list
                .insert_pending(offer_id, offers.build(offer_id, instrument, auction, 1_000))
                .unwrap();
        }

        done.set_outcome(OfferId::new(1), filled(&credited, 1_000_000));
        done.set_outcome(OfferId::new(3), filled(&unlisted, 1_000_000));
        done.complete();

        let rates = FixedRates::new(rate_bps(500));
        let report = offer_list
            .remove_completed(&mut instrument_list, &rates, TEST_BASE_ASSET, now)
            .unwrap();

        assert_eq!(report.removed(), 3);
        assert_eq!(report.skipped(), offer_ids(&[3]));
        assert!(matches!(
            report.outcomes[0],
            ReconcileOutcome::Credited {
                state: OfferState::Filled,
                rate,
                ..
            } if rate == rate_bps(500)
        ));
        assert!(matches!(
            report.outcomes[1],
            ReconcileOutcome::Closed { .. }
        ));
        assert!(matches!(
            &report.outcomes[2],
            ReconcileOutcome::CreditSkipped {
                error: LedgerError::Validation(_),
                ..
            }
        ));

        assert_eq!(offer_list.pending_offers(), offer_ids(&[4]));
        assert_eq!(instrument_list.holdings(), vec![credited.id]);
        assert_offer_list_invariants(&offer_list);
        assert_instrument_list_invariants(&instrument_list);
    }

    #[rstest]
    fn test_nothing_completed_is_noop(
        now: Timestamp,
        instruments: InstrumentFactory,
        offers: OfferFactory,
        mut offer_list: PendingOfferList,
        mut instrument_list: InstrumentList,
    ) {
        let id = OfferId::new(1);
        offer_list
            .insert_pending(id, offers.build(id, &instruments.build(1), &auction(1), 10))
            .unwrap();

        let report = offer_list
            .remove_completed(
                &mut instrument_list,
                &FixedRates::new(rate_bps(500)),
                TEST_BASE_ASSET,
                now,
            )
            .unwrap();
        assert_eq!(report.removed(), 0);
        assert_eq!(offer_list.count_offers(), 1);
    }

    #[rstest]
    fn test_status_failure_leaves_lists_untouched(
        now: Timestamp,
        instruments: InstrumentFactory,
        offers: OfferFactory,
        mut offer_list: PendingOfferList,
        mut instrument_list: InstrumentList,
    ) {
        let instrument = instruments.build(1);
        let (done, broken) = (auction(1), auction(2));
        for (id, auction) in [(1, &done), (2, &broken)] {
            let offer_id = OfferId::new(id);
            offer_list
                .insert_pending(offer_id, offers.build(offer_id, &instrument, auction, 10))
                .unwrap();
        }
        done.set_outcome(OfferId::new(1), filled(&instrument, 1_000_000));
        done.complete();
        broken.fail_status(true);

        let err = offer_list
            .remove_completed(
                &mut instrument_list,
                &FixedRates::new(rate_bps(500)),
                TEST_BASE_ASSET,
                now,
            )
            .unwrap_err();
        assert!(err.is_external());
        assert_eq!(offer_list.pending_offers(), offer_ids(&[1, 2]));
        assert!(instrument_list.is_empty());
    }

    #[rstest]
    fn test_credit_refreshes_held_instrument_rate(
        now: Timestamp,
        instruments: InstrumentFactory,
        offers: OfferFactory,
        mut offer_list: PendingOfferList,
        mut instrument_list: InstrumentList,
    ) {
        let instrument = instruments.build(1);
        instrument_list
            .validate_and_insert(
                instrument.clone(),
                &FixedRates::new(rate_bps(400)),
                TEST_BASE_ASSET,
                now,
            )
            .unwrap();

        let done = auction(1);
        let id = OfferId::new(1);
        offer_list
            .insert_pending(id, offers.build(id, &instrument, &done, 10))
            .unwrap();
        done.set_outcome(
            id,
            OfferOutcome::PartiallyFilled {
                instrument: Arc::clone(&instrument) as _,
                repo_amount: 6,
                refunded: 4,
            },
        );
        done.complete();

        let report = offer_list
            .remove_completed(
                &mut instrument_list,
                &FixedRates::new(rate_bps(450)),
                TEST_BASE_ASSET,
                now,
            )
            .unwrap();
        assert!(matches!(
            report.outcomes[0],
            ReconcileOutcome::Credited {
                state: OfferState::PartiallyFilled,
                ..
            }
        ));
        assert_eq!(instrument_list.len(), 1);
        assert_eq!(instrument_list.discount_rate(instrument.id), rate_bps(450));
    }
}

mod valuation_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[rstest]
    fn test_open_offers_count_at_amount(
        now: Timestamp,
        instruments: InstrumentFactory,
        offers: OfferFactory,
        mut offer_list: PendingOfferList,
        instrument_list: InstrumentList,
    ) {
        let (first, second) = (instruments.clone().build(1), instruments.build(2));
        let open = auction(1);
        for (id, instrument, amount) in [(1, &first, 300), (2, &second, 700), (3, &first, 50)] {
            let offer_id = OfferId::new(id);
            offer_list
                .insert_pending(offer_id, offers.build(offer_id, instrument, &open, amount))
                .unwrap();
        }

        let rates = FixedRates::new(rate_bps(500));
        let total = offer_list
            .get_present_value(&instrument_list, &rates, TEST_PRECISION, None, now)
            .unwrap();
        assert_eq!(total, 1_050);

        let filtered = offer_list
            .get_present_value(&instrument_list, &rates, TEST_PRECISION, Some(first.id), now)
            .unwrap();
        assert_eq!(filtered, 350);
    }

    #[rstest]
    fn test_completed_offer_counts_discounted_credit(
        now: Timestamp,
        instruments: InstrumentFactory,
        offers: OfferFactory,
        mut offer_list: PendingOfferList,
        mut instrument_list: InstrumentList,
    ) {
        let instrument = instruments.maturing_in_days(7).build(1);
        let done = auction(1);
        let id = OfferId::new(1);
        offer_list
            .insert_pending(id, offers.build(id, &instrument, &done, 990_000))
            .unwrap();
        done.set_outcome(id, filled(&instrument, 1_000_000));
        done.complete();

        let rates = FixedRates::new(rate_bps(500));
        let value = offer_list
            .get_present_value(&instrument_list, &rates, TEST_PRECISION, None, now)
            .unwrap();
        assert_eq!(value, 999_028);

        // Once held the credit is valued by the instrument list instead
        instrument_list
            .validate_and_insert(instrument.clone(), &rates, TEST_BASE_ASSET, now)
            .unwrap();
        let value = offer_list
            .get_present_value(&instrument_list, &rates, TEST_PRECISION, None, now)
            .unwrap();
        assert_eq!(value, 0);
    }

    #[rstest]
    fn test_canceled_offer_counts_nothing(
        now: Timestamp,
        instruments: InstrumentFactory,
        offers: OfferFactory,
        mut offer_list: PendingOfferList,
        instrument_list: InstrumentList,
    ) {
        let done = auction(1);
        let id = OfferId::new(1);
        offer_list
            .insert_pending(id, offers.build(id, &instruments.build(1), &done, 500))
            .unwrap();
        done.complete();

        let value = offer_list
            .get_present_value(
                &instrument_list,
                &FixedRates::new(rate_bps(500)),
                TEST_PRECISION,
                None,
                now,
            )
            .unwrap();
        assert_eq!(value, 0);
    }

    #[rstest]
    fn test_cumulative_offer_data(
        now: Timestamp,
        instruments: InstrumentFactory,
        offers: OfferFactory,
        mut offer_list: PendingOfferList,
        instrument_list: InstrumentList,
    ) {
        let short = instruments.clone().maturing_in_days(10).build(1);
        let long = instruments.maturing_in_days(20).build(2);
        let open = auction(1);
        for (id, instrument, amount) in [(1, &short, 100), (2, &long, 300)] {
            let offer_id = OfferId::new(id);
            offer_list
                .insert_pending(offer_id, offers.build(offer_id, instrument, &open, amount))
                .unwrap();
        }

        let ten_days = u128::from(10 * SECS_PER_DAY);
        let data = offer_list
            .get_cumulative_offer_data(&instrument_list, None, TEST_PRECISION, now)
            .unwrap();
        assert_eq!(data.cumulative_amount, 400);
        assert_eq!(data.weighted_time_to_maturity, ten_days * 100 + 2 * ten_days * 300);
        assert!(!data.found);

        let what_if = offer_list
            .get_cumulative_offer_data(&instrument_list, Some((short.id, 200)), TEST_PRECISION, now)
            .unwrap();
        assert!(what_if.found);
        assert_eq!(what_if.cumulative_amount, 600);
        assert_eq!(
            what_if.weighted_time_to_maturity,
            ten_days * 300 + 2 * ten_days * 300
        );

        assert_eq!(
            PendingOfferList::new()
                .get_cumulative_offer_data(&instrument_list, None, TEST_PRECISION, now)
                .unwrap()
                .average_time_to_maturity(),
            0
        );
    }

    #[rstest]
    fn test_cumulative_offer_data_matches_valuation(
        now: Timestamp,
        instruments: InstrumentFactory,
        offers: OfferFactory,
        mut offer_list: PendingOfferList,
        mut instrument_list: InstrumentList,
    ) {
        let rates = FixedRates::new(rate_bps(500));
        let held = instruments.clone().maturing_in_days(10).build(1);
        let unheld = instruments.clone().maturing_in_days(20).build(2);
        let canceled = instruments.maturing_in_days(30).build(3);
        instrument_list
            .validate_and_insert(held.clone(), &rates, TEST_BASE_ASSET, now)
            .unwrap();

        let done = auction(1);
        for (id, instrument) in [(1, &held), (2, &unheld), (3, &canceled)] {
            let offer_id = OfferId::new(id);
            offer_list
                .insert_pending(offer_id, offers.build(offer_id, instrument, &done, 1_000_000))
                .unwrap();
        }
        done.set_outcome(OfferId::new(1), filled(&held, 1_000_000));
        done.set_outcome(OfferId::new(2), filled(&unheld, 2_000_000));
        done.complete();

        let ten_days = u128::from(10 * SECS_PER_DAY);
        let offer_data = offer_list
            .get_cumulative_offer_data(&instrument_list, None, TEST_PRECISION, now)
            .unwrap();
        // Held credit is counted by the holdings; canceled offers count nothing
        assert_eq!(offer_data.cumulative_amount, 2 * TEST_PRECISION);
        assert_eq!(
            offer_data.weighted_time_to_maturity,
            2 * ten_days * 2 * TEST_PRECISION
        );

        let holding_data = instrument_list
            .get_cumulative_data(None, TEST_PRECISION, now)
            .unwrap();
        assert_eq!(holding_data.cumulative_amount, TEST_PRECISION);
        assert_eq!(holding_data.weighted_time_to_maturity, ten_days * TEST_PRECISION);

        let held_value = offer_list
            .get_present_value(&instrument_list, &rates, TEST_PRECISION, Some(held.id), now)
            .unwrap();
        assert_eq!(held_value, 0);
        let held_what_if = offer_list
            .get_cumulative_offer_data(&instrument_list, Some((held.id, 1)), TEST_PRECISION, now)
            .unwrap();
        assert!(!held_what_if.found);
    }
}
