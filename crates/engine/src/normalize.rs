//! Normalization of the GetTicks payload into a candle series
//!
//! The payload looks like:
//! `{"success": true, "result": [{"O": 4108.35, "H": 4127.35, "L": 4107.48,
//! "C": 4119.94, "V": 11.89, "T": "2019-02-23T20:00:00", "BV": 48970.62}]}`
//!
//! Anything that does not carry exactly the seven expected keys across the
//! `result` elements is reported as [`TickFetch::NoData`].

use chrono::{DateTime, NaiveDateTime};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::debug;

use crate::error::{ExchangeError, ExchangeResult};
use crate::types::{Candle, CandleColumn, CandleSeries, TickFetch, TickInterval};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Parse a raw GetTicks body and build the series for `columns`
pub fn normalize_ticks(
    body: &str,
    market: &str,
    interval: TickInterval,
    columns: &[CandleColumn],
) -> ExchangeResult<TickFetch> {
    let payload: Value = serde_json::from_str(body).map_err(|source| ExchangeError::Decode {
        body: body.to_string(),
        source,
    })?;

    let rows = match payload.get("result") {
        Some(Value::Array(rows)) => rows,
        _ => {
            debug!(market, "GetTicks payload has no result array");
            return Ok(TickFetch::NoData);
        }
    };

    let Some(objects) = expected_layout(rows) else {
        debug!(market, rows = rows.len(), "GetTicks payload has unexpected layout");
        return Ok(TickFetch::NoData);
    };

    let mut candles = Vec::with_capacity(objects.len());
    for object in objects {
        if let Some(candle) = parse_row(object)? {
            candles.push(candle);
        }
    }

    debug!(
        market,
        interval = %interval,
        raw = rows.len(),
        kept = candles.len(),
        "Normalized candles"
    );

    Ok(TickFetch::Candles(CandleSeries::new(
        market, interval, columns, candles,
    )))
}

/// Every element must be an object and the union of their keys must be
/// exactly the seven raw keys
fn expected_layout(rows: &[Value]) -> Option<Vec<&Map<String, Value>>> {
    let objects: Vec<&Map<String, Value>> = rows
        .iter()
        .map(Value::as_object)
        .collect::<Option<Vec<_>>>()?;

    let keys: BTreeSet<&str> = objects
        .iter()
        .flat_map(|object| object.keys().map(String::as_str))
        .collect();

    let expected: BTreeSet<&str> = CandleColumn::DEFAULT
        .iter()
        .map(CandleColumn::raw_key)
        .collect();

    (keys == expected).then_some(objects)
}

/// Returns `Ok(None)` when any field is missing, null or NaN. Completeness is
/// checked over all seven keys before any value is parsed.
fn parse_row(object: &Map<String, Value>) -> ExchangeResult<Option<Candle>> {
    let complete = CandleColumn::DEFAULT
        .iter()
        .all(|column| present(object, column.raw_key()).is_some());
    if !complete {
        return Ok(None);
    }

    let mut values = [0.0_f64; 6];
    let numeric = [
        CandleColumn::Open,
        CandleColumn::High,
        CandleColumn::Low,
        CandleColumn::Close,
        CandleColumn::Volume,
        CandleColumn::BaseVolume,
    ];

    for (slot, column) in values.iter_mut().zip(numeric) {
        match number(object, column.raw_key())? {
            Some(value) => *slot = value,
            None => return Ok(None),
        }
    }

    let timestamp = match present(object, CandleColumn::Timestamp.raw_key()) {
        Some(Value::String(raw)) => parse_timestamp(raw)?,
        Some(other) => {
            return Err(ExchangeError::InvalidField {
                key: CandleColumn::Timestamp.raw_key().to_string(),
                value: other.to_string(),
            })
        }
        None => return Ok(None),
    };

    let [open, high, low, close, volume, base_volume] = values;
    Ok(Some(Candle {
        timestamp,
        open,
        high,
        low,
        close,
        volume,
        base_volume,
    }))
}

fn present<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    object.get(key).filter(|value| !value.is_null())
}

fn number(object: &Map<String, Value>, key: &str) -> ExchangeResult<Option<f64>> {
    let invalid = |value: &Value| ExchangeError::InvalidField {
        key: key.to_string(),
        value: value.to_string(),
    };

    let Some(value) = present(object, key) else {
        return Ok(None);
    };

    let parsed = match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| invalid(value))?,
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| invalid(value))?,
        _ => return Err(invalid(value)),
    };

    if parsed.is_nan() {
        return Ok(None);
    }
    if parsed.is_infinite() {
        return Err(invalid(value));
    }
    Ok(Some(parsed))
}

/// Parse an exchange timestamp such as `2015-08-14T00:00:00`
pub fn parse_timestamp(raw: &str) -> ExchangeResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(raw).map(|dt| dt.naive_utc()))
        .map_err(|source| ExchangeError::Timestamp {
            value: raw.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CellValue;
    use chrono::NaiveDate;

    const FIXTURE: &str = r#"{
        "success": true,
        "message": "",
        "result": [
            {"O": 0.0069, "H": 0.08, "L": 0.006667, "C": 0.007, "V": 3123.42, "T": "2015-08-14T00:00:00", "BV": 29.55},
            {"O": 0.00676, "H": 0.00676, "L": 0.0035, "C": 0.004, "V": 1875.98, "T": "2015-08-15T00:00:00", "BV": 8.19},
            {"O": 0.004, "H": 0.0045, "L": 0.0025, "C": 0.0031, "V": 2031.17, "T": "2015-08-16T00:00:00", "BV": 6.37}
        ]
    }"#;

    fn series(body: &str, columns: &[CandleColumn]) -> CandleSeries {
        match normalize_ticks(body, "BTC-ETH", TickInterval::Day, columns).unwrap() {
            TickFetch::Candles(series) => series,
            TickFetch::NoData => panic!("expected candles"),
        }
    }

    #[test]
    fn test_fixture_normalizes_all_rows() {
        let series = series(FIXTURE, &CandleColumn::DEFAULT);

        assert_eq!(series.len(), 3);
        assert_eq!(series.columns(), &CandleColumn::DEFAULT);
        assert_eq!(series.value(0, CandleColumn::Open), Some(CellValue::Number(0.0069)));
        assert_eq!(series.value(0, CandleColumn::High), Some(CellValue::Number(0.08)));
        assert_eq!(series.value(0, CandleColumn::Low), Some(CellValue::Number(0.006667)));
        assert_eq!(series.value(0, CandleColumn::Close), Some(CellValue::Number(0.007)));
        assert_eq!(series.value(0, CandleColumn::Volume), Some(CellValue::Number(3123.42)));
        assert_eq!(
            series.value(0, CandleColumn::BaseVolume),
            Some(CellValue::Number(29.55))
        );

        let expected = NaiveDate::from_ymd_opt(2015, 8, 14)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(
            series.value(0, CandleColumn::Timestamp),
            Some(CellValue::Timestamp(expected))
        );

        let closes: Vec<f64> = series
            .column(CandleColumn::Close)
            .unwrap()
            .iter()
            .filter_map(CellValue::as_f64)
            .collect();
        assert_eq!(closes, vec![0.007, 0.004, 0.0031]);
    }

    #[test]
    fn test_custom_column_selection() {
        let series = series(FIXTURE, &[CandleColumn::Timestamp, CandleColumn::Close]);
        assert_eq!(series.columns(), &[CandleColumn::Timestamp, CandleColumn::Close]);
        assert!(series.column(CandleColumn::Volume).is_none());

        let json = serde_json::to_value(&series).unwrap();
        let keys: Vec<&String> = json["rows"][2].as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_missing_key_everywhere_is_no_data() {
        let body = r#"{"result": [
            {"O": 1.0, "H": 1.0, "L": 1.0, "C": 1.0, "V": 1.0, "T": "2019-01-01T00:00:00"}
        ]}"#;
        let fetch = normalize_ticks(body, "BTC-ETH", TickInterval::Day, &CandleColumn::DEFAULT);
        assert!(fetch.unwrap().is_no_data());
    }

    #[test]
    fn test_extra_key_is_no_data() {
        let body = r#"{"result": [
            {"O": 1.0, "H": 1.0, "L": 1.0, "C": 1.0, "V": 1.0, "T": "2019-01-01T00:00:00", "BV": 1.0, "X": 2}
        ]}"#;
        let fetch = normalize_ticks(body, "BTC-ETH", TickInterval::Day, &CandleColumn::DEFAULT);
        assert!(fetch.unwrap().is_no_data());
    }

    #[test]
    fn test_empty_or_null_result_is_no_data() {
        for body in [
            r#"{"success": true, "result": []}"#,
            r#"{"success": false, "message": "INVALID_MARKET", "result": null}"#,
            r#"{"success": true}"#,
            r#"{"result": [[1, 2, 3, 4, 5, 6, 7]]}"#,
        ] {
            let fetch = normalize_ticks(body, "BTC-XYZ", TickInterval::Hour, &CandleColumn::DEFAULT);
            assert!(fetch.unwrap().is_no_data(), "body {body} should be no data");
        }
    }

    #[test]
    fn test_rows_with_missing_values_are_dropped() {
        let body = r#"{"result": [
            {"O": 1.0, "H": 2.0, "L": 0.5, "C": 1.5, "V": 10.0, "T": "2019-01-01T00:00:00", "BV": 15.0},
            {"O": 1.5, "H": 2.0, "L": 0.5, "C": null, "V": 10.0, "T": "2019-01-02T00:00:00", "BV": 15.0},
            {"O": 1.5, "H": 2.0, "L": 0.5, "C": 1.7, "V": 10.0, "T": "2019-01-03T00:00:00"},
            {"O": 1.7, "H": 2.0, "L": 0.5, "C": 1.9, "V": 10.0, "T": "2019-01-04T00:00:00", "BV": 19.0}
        ]}"#;
        let series = series(body, &CandleColumn::DEFAULT);

        assert_eq!(series.len(), 2);
        let days: Vec<u32> = series
            .column(CandleColumn::Timestamp)
            .unwrap()
            .iter()
            .filter_map(CellValue::as_timestamp)
            .map(|t| chrono::Datelike::day(&t.date()))
            .collect();
        assert_eq!(days, vec![1, 4]);
    }

    #[test]
    fn test_null_field_drops_row_regardless_of_key_order() {
        // the malformed "O" comes before the null "C"; the row is still dropped
        let body = r#"{"result": [
            {"O": true, "H": 2.0, "L": 0.5, "C": null, "V": 10.0, "T": "2019-01-01T00:00:00", "BV": 15.0},
            {"O": null, "H": true, "L": 0.5, "C": 1.5, "V": 10.0, "T": "2019-01-02T00:00:00", "BV": 15.0},
            {"O": 1.0, "H": 2.0, "L": 0.5, "C": 1.5, "V": 10.0, "T": "yesterday", "BV": null},
            {"O": 1.7, "H": 2.0, "L": 0.5, "C": 1.9, "V": 10.0, "T": "2019-01-04T00:00:00", "BV": 19.0}
        ]}"#;
        let series = series(body, &CandleColumn::DEFAULT);

        assert_eq!(series.len(), 1);
        assert_eq!(series.value(0, CandleColumn::Close), Some(CellValue::Number(1.9)));
    }

    #[test]
    fn test_all_rows_dropped_still_yields_series() {
        let body = r#"{"result": [
            {"O": null, "H": 2.0, "L": 0.5, "C": 1.5, "V": 10.0, "T": "2019-01-01T00:00:00", "BV": 15.0}
        ]}"#;
        let series = series(body, &CandleColumn::DEFAULT);
        assert!(series.is_empty());
    }

    #[test]
    fn test_numeric_strings_are_accepted() {
        let body = r#"{"result": [
            {"O": "1.25", "H": "2", "L": "0.5", "C": "1.5", "V": "10", "T": "2019-01-01T00:00:00", "BV": "15"}
        ]}"#;
        let series = series(body, &CandleColumn::DEFAULT);
        assert_eq!(series.value(0, CandleColumn::Open), Some(CellValue::Number(1.25)));
    }

    #[test]
    fn test_bad_timestamp_is_fatal() {
        let body = r#"{"result": [
            {"O": 1.0, "H": 2.0, "L": 0.5, "C": 1.5, "V": 10.0, "T": "yesterday", "BV": 15.0}
        ]}"#;
        match normalize_ticks(body, "BTC-ETH", TickInterval::Day, &CandleColumn::DEFAULT) {
            Err(ExchangeError::Timestamp { value, .. }) => assert_eq!(value, "yesterday"),
            other => panic!("expected timestamp error, got {other:?}"),
        }
    }

    #[test]
    fn test_non_numeric_field_is_rejected() {
        let body = r#"{"result": [
            {"O": true, "H": 2.0, "L": 0.5, "C": 1.5, "V": 10.0, "T": "2019-01-01T00:00:00", "BV": 15.0}
        ]}"#;
        let result = normalize_ticks(body, "BTC-ETH", TickInterval::Day, &CandleColumn::DEFAULT);
        assert!(matches!(result, Err(ExchangeError::InvalidField { key, .. }) if key == "O"));
    }

    #[test]
    fn test_invalid_json_is_decode_error() {
        let result = normalize_ticks("<html>", "BTC-ETH", TickInterval::Day, &CandleColumn::DEFAULT);
        assert!(matches!(result, Err(ExchangeError::Decode { .. })));
    }

    #[test]
    fn test_parse_timestamp_variants() {
        let plain = parse_timestamp("2015-08-14T00:00:00").unwrap();
        let fractional = parse_timestamp("2015-08-14T00:00:00.000").unwrap();
        let zulu = parse_timestamp("2015-08-14T00:00:00Z").unwrap();
        assert_eq!(plain, fractional);
        assert_eq!(plain, zulu);
    }
}
