use std::path::PathBuf;

use chrono::{TimeZone, Utc};
use rentwatch_adapters::{parse_listing_detail, parse_search_results, ScrapeContext};
use rentwatch_core::{FieldValue, ListingId};
use uuid::Uuid;

fn fixture(name: &str) -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures/openrent")
        .join(name);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("reading {}: {e}", path.display()))
}

#[test]
fn search_results_fixture_parses() {
    let ctx = ScrapeContext {
        run_id: Uuid::new_v4(),
        observed_at: Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap(),
    };
    let listings = parse_search_results(&fixture("search_results.html"), &ctx).unwrap();

    let ids: Vec<_> = listings.iter().map(|l| l.id).collect();
    assert_eq!(
        ids,
        vec![
            ListingId(2104417),
            ListingId(2099130),
            ListingId(2101985),
            ListingId(2087754)
        ]
    );
    let recent: Vec<_> = listings.iter().map(|l| l.recently_updated).collect();
    assert_eq!(recent, vec![true, false, true, false]);
    let let_agreed: Vec<_> = listings.iter().map(|l| l.let_agreed).collect();
    assert_eq!(let_agreed, vec![false, true, false, false]);
    assert_eq!(listings[1].let_agreed_at, Some(ctx.observed_at));
}

#[test]
fn room_only_detail_fixture_charges_full_rent_per_person() {
    let record = parse_listing_detail(ListingId(2101985), &fixture("room_detail.html")).unwrap();

    assert_eq!(record.get("room_only"), Some(&FieldValue::Bool(true)));
    assert_eq!(record.get("bedrooms"), Some(&FieldValue::Int(4)));
    assert_eq!(record.get("rent_total"), Some(&FieldValue::Float(750.0)));
    assert_eq!(record.get("rent_per_person"), Some(&FieldValue::Float(750.0)));
    assert_eq!(record.get("bills_included"), Some(&FieldValue::Bool(true)));
    assert_eq!(record.get("dss_lha_covers_rent"), Some(&FieldValue::Bool(true)));
    assert_eq!(record.get("lat"), Some(&FieldValue::Float(51.5532)));
    assert_eq!(
        record.get("available_from"),
        Some(&FieldValue::Text("01 April, 2026".into()))
    );
    assert!(!record.contains_key("closest_station"));
    assert!(!record.contains_key("has_garden"));
}

#[test]
fn detail_page_without_title_is_a_parse_error() {
    let err = parse_listing_detail(ListingId(1), "<html><body><p>Gone</p></body></html>").unwrap_err();
    assert_eq!(err.id(), ListingId(1));
    assert!(err.to_string().contains("could not be parsed"));
}
