// projeto: lstmstocktrain
// file: src/neural/data.rs
// Market data acquisition and preprocessing: Yahoo chart API, business-day
// reindexing with forward-fill, min-max scaling and sequence windowing

use candle_core::{Device, Tensor};
use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::neural::utils::{validate_series, TrainingError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockRecord {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Deserialize)]
struct YahooResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<YahooError>,
}

#[derive(Debug, Deserialize)]
struct YahooError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<i64>>,
}

/// Client for the Yahoo Finance chart API. No authentication is involved;
/// provider failures surface as errors and abort the run.
pub struct YahooClient {
    base_url: String,
    client: reqwest::Client,
}

impl YahooClient {
    pub fn new() -> Result<Self, TrainingError> {
        Ok(Self {
            base_url: "https://query1.finance.yahoo.com".to_string(),
            client: reqwest::Client::builder()
                .user_agent("Mozilla/5.0")
                .build()?,
        })
    }

    /// Fetch daily OHLCV bars for `symbol` between `start` and `end` inclusive.
    pub async fn fetch_daily(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<StockRecord>, TrainingError> {
        let period1 = start.and_time(NaiveTime::MIN).and_utc().timestamp();
        let period2 = end
            .succ_opt()
            .ok_or_else(|| TrainingError::DataAcquisition("end date out of range".to_string()))?
            .and_time(NaiveTime::MIN)
            .and_utc()
            .timestamp();

        let url = format!(
            "{}/v8/finance/chart/{}?interval=1d&period1={}&period2={}",
            self.base_url, symbol, period1, period2
        );
        debug!("Fetching chart data: {}", url);

        let response: YahooResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let records = parse_chart(response)?;
        info!("📥 Read in {} stock values for {}", records.len(), symbol);
        Ok(records)
    }
}

/// Flattens the chart payload into daily records. Rows where the provider
/// reports null prices (holidays, suspended sessions) are dropped here and
/// reconstructed later by the business-day forward-fill.
fn parse_chart(response: YahooResponse) -> Result<Vec<StockRecord>, TrainingError> {
    if let Some(error) = response.chart.error {
        return Err(TrainingError::DataAcquisition(format!(
            "provider error {}: {}",
            error.code, error.description
        )));
    }

    let result = response
        .chart
        .result
        .and_then(|mut r| if r.is_empty() { None } else { Some(r.remove(0)) })
        .ok_or_else(|| TrainingError::DataAcquisition("empty chart result".to_string()))?;

    let quote = result
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| TrainingError::DataAcquisition("no quote data".to_string()))?;

    let mut records = Vec::new();
    for (i, &ts) in result.timestamp.iter().enumerate() {
        let open = quote.open.get(i).and_then(|v| *v);
        let high = quote.high.get(i).and_then(|v| *v);
        let low = quote.low.get(i).and_then(|v| *v);
        let close = quote.close.get(i).and_then(|v| *v);
        let volume = quote.volume.get(i).and_then(|v| *v);

        if let (Some(o), Some(h), Some(l), Some(c), Some(v)) = (open, high, low, close, volume) {
            let date = chrono::DateTime::from_timestamp(ts, 0)
                .ok_or_else(|| {
                    TrainingError::DataAcquisition(format!("invalid timestamp {}", ts))
                })?
                .date_naive();
            records.push(StockRecord {
                date,
                open: o,
                high: h,
                low: l,
                close: c,
                volume: v as f64,
            });
        }
    }

    if records.is_empty() {
        return Err(TrainingError::DataAcquisition(
            "provider returned no usable rows".to_string(),
        ));
    }

    Ok(records)
}

fn next_day(day: NaiveDate) -> Result<NaiveDate, TrainingError> {
    day.succ_opt()
        .ok_or_else(|| TrainingError::DataProcessing("date overflow while reindexing".to_string()))
}

/// Reindexes closing prices onto the complete Monday-to-Friday calendar from
/// the first observed date through `end`, forward-filling every gap from the
/// most recent prior close. The returned series contains no missing values.
pub fn business_day_closes(
    records: &[StockRecord],
    end: NaiveDate,
) -> Result<Vec<f64>, TrainingError> {
    let first = records.first().ok_or_else(|| {
        TrainingError::DataProcessing("no records to reindex".to_string())
    })?;

    let by_date: BTreeMap<NaiveDate, f64> = records.iter().map(|r| (r.date, r.close)).collect();

    let mut closes = Vec::new();
    let mut last_close = first.close;
    let mut day = first.date;
    while day <= end {
        if matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            day = next_day(day)?;
            continue;
        }
        if let Some(&close) = by_date.get(&day) {
            last_close = close;
        }
        closes.push(last_close);
        day = next_day(day)?;
    }

    debug!(
        "Reindexed {} records onto {} business days",
        records.len(),
        closes.len()
    );
    Ok(closes)
}

/// Linear rescaling into [0,1] fitted on a reference series. The fitted
/// minimum and maximum are reused as-is when transforming held-out data;
/// refitting on evaluation data invalidates the results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinMaxScaler {
    pub data_min: f64,
    pub data_max: f64,
}

impl MinMaxScaler {
    pub fn fit(series: &[f64]) -> Result<Self, TrainingError> {
        validate_series(series, "scaler reference series")?;
        let data_min = series.iter().fold(f64::INFINITY, |a, &b| a.min(b));
        let data_max = series.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        Ok(Self { data_min, data_max })
    }

    pub fn transform(&self, series: &[f64]) -> Vec<f64> {
        let range = self.data_max - self.data_min;
        if range <= f64::EPSILON {
            return vec![0.0; series.len()];
        }
        series.iter().map(|x| (x - self.data_min) / range).collect()
    }

    pub fn inverse_transform(&self, series: &[f64]) -> Vec<f64> {
        let range = self.data_max - self.data_min;
        series.iter().map(|x| x * range + self.data_min).collect()
    }
}

/// Overlapping fixed-length windows over a scaled series, each paired with
/// the value immediately following the window.
#[derive(Debug, Clone)]
pub struct WindowedDataset {
    pub window: usize,
    pub features: Vec<f32>,
    pub labels: Vec<f32>,
    pub len: usize,
}

impl WindowedDataset {
    /// Produces exactly `max(N - W, 0)` (feature, label) pairs: pair `i` holds
    /// elements `[i, i + W)` and its label is element `i + W`.
    pub fn from_series(series: &[f64], window: usize) -> Self {
        let len = series.len().saturating_sub(window);
        let mut features = Vec::with_capacity(len * window);
        let mut labels = Vec::with_capacity(len);

        for i in 0..len {
            for t in 0..window {
                features.push(series[i + t] as f32);
            }
            labels.push(series[i + window] as f32);
        }

        Self {
            window,
            features,
            labels,
            len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Shapes the pairs into the 3D feature tensor `(n, window, 1)` and label
    /// tensor `(n, 1)` the LSTM stack expects.
    pub fn to_tensors(&self, device: &Device) -> Result<(Tensor, Tensor), TrainingError> {
        if self.is_empty() {
            return Err(TrainingError::DataProcessing(format!(
                "no training examples: series shorter than window {}",
                self.window
            )));
        }
        let x = Tensor::from_vec(self.features.clone(), (self.len, self.window, 1), device)?;
        let y = Tensor::from_vec(self.labels.clone(), (self.len, 1), device)?;
        Ok((x, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn record(y: i32, m: u32, d: u32, close: f64) -> StockRecord {
        StockRecord {
            date: date(y, m, d),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1000.0,
        }
    }

    #[test]
    fn test_windowing_pair_count_and_labels() {
        let series: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let ds = WindowedDataset::from_series(&series, 60);
        assert_eq!(ds.len, 40);
        assert_eq!(ds.labels.len(), 40);
        assert_eq!(ds.features.len(), 40 * 60);
        for i in 0..ds.len {
            assert_eq!(ds.labels[i], series[i + 60] as f32);
            assert_eq!(ds.features[i * 60], series[i] as f32);
            assert_eq!(ds.features[i * 60 + 59], series[i + 59] as f32);
        }
    }

    #[test]
    fn test_windowing_short_series_is_empty() {
        let series: Vec<f64> = (0..60).map(|i| i as f64).collect();
        let ds = WindowedDataset::from_series(&series, 60);
        assert!(ds.is_empty());
        assert!(ds.to_tensors(&Device::Cpu).is_err());

        let shorter = WindowedDataset::from_series(&series[..10], 60);
        assert_eq!(shorter.len, 0);
    }

    #[test]
    fn test_windowing_tensor_shapes() {
        let series: Vec<f64> = (0..70).map(|i| i as f64 / 70.0).collect();
        let ds = WindowedDataset::from_series(&series, 60);
        let (x, y) = ds.to_tensors(&Device::Cpu).unwrap();
        assert_eq!(x.dims(), &[10, 60, 1]);
        assert_eq!(y.dims(), &[10, 1]);
    }

    #[test]
    fn test_scaler_round_trip() {
        let series = vec![10.0, 20.0, 15.0, 40.0, 30.0];
        let scaler = MinMaxScaler::fit(&series).unwrap();
        let scaled = scaler.transform(&series);
        assert!(scaled.iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert!((scaled[0] - 0.0).abs() < 1e-12);
        assert!((scaled[3] - 1.0).abs() < 1e-12);

        let restored = scaler.inverse_transform(&scaled);
        for (orig, back) in series.iter().zip(restored.iter()) {
            assert!((orig - back).abs() < 1e-9);
        }
    }

    #[test]
    fn test_scaler_params_reused_on_held_out_series() {
        let train = vec![0.0, 50.0, 100.0];
        let scaler = MinMaxScaler::fit(&train).unwrap();
        // Values outside the training range map outside [0,1] instead of
        // being refit, which is the required behavior.
        let eval = vec![150.0, -50.0, 25.0];
        let scaled = scaler.transform(&eval);
        assert!((scaled[0] - 1.5).abs() < 1e-12);
        assert!((scaled[1] + 0.5).abs() < 1e-12);
        assert!((scaled[2] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_scaler_degenerate_range() {
        let flat = vec![7.0, 7.0, 7.0];
        let scaler = MinMaxScaler::fit(&flat).unwrap();
        assert_eq!(scaler.transform(&flat), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_forward_fill_leaves_no_gap() {
        // 2019-01-02 is a Wednesday; Thursday and Friday are missing and the
        // following Monday trades again.
        let records = vec![
            record(2019, 1, 2, 100.0),
            record(2019, 1, 7, 110.0),
            record(2019, 1, 8, 112.0),
        ];
        let closes = business_day_closes(&records, date(2019, 1, 8)).unwrap();
        // Wed, Thu, Fri, Mon, Tue
        assert_eq!(closes, vec![100.0, 100.0, 100.0, 110.0, 112.0]);
    }

    #[test]
    fn test_forward_fill_skips_weekends() {
        let records = vec![record(2019, 1, 4, 50.0), record(2019, 1, 7, 55.0)];
        // Friday then Monday: Saturday and Sunday are not part of the calendar.
        let closes = business_day_closes(&records, date(2019, 1, 7)).unwrap();
        assert_eq!(closes, vec![50.0, 55.0]);
    }

    #[test]
    fn test_parse_chart_drops_null_rows() {
        let payload = r#"{
            "chart": {
                "result": [{
                    "timestamp": [1546473600, 1546560000, 1546819200],
                    "indicators": {
                        "quote": [{
                            "open": [10.0, null, 12.0],
                            "high": [11.0, null, 13.0],
                            "low": [9.0, null, 11.0],
                            "close": [10.5, null, 12.5],
                            "volume": [1000, null, 1200]
                        }]
                    }
                }],
                "error": null
            }
        }"#;
        let response: YahooResponse = serde_json::from_str(payload).unwrap();
        let records = parse_chart(response).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].close, 10.5);
        assert_eq!(records[1].close, 12.5);
    }

    #[test]
    fn test_parse_chart_provider_error() {
        let payload = r#"{
            "chart": {
                "result": null,
                "error": {"code": "Not Found", "description": "No data found"}
            }
        }"#;
        let response: YahooResponse = serde_json::from_str(payload).unwrap();
        assert!(parse_chart(response).is_err());
    }

    #[tokio::test]
    #[ignore]
    async fn test_fetch_daily_live() {
        let client = YahooClient::new().unwrap();
        let records = client
            .fetch_daily("IBM", date(2019, 1, 1), date(2019, 1, 31))
            .await
            .unwrap();
        assert!(!records.is_empty());
    }
}
