use crate::domain::market::types::Bar;
use crate::domain::trading::opportunity::SymbolAnalysis;
use ta::indicators::{
    AverageTrueRange, MovingAverageConvergenceDivergence, RelativeStrengthIndex,
};
use ta::{DataItem, Next};

const RSI_PERIOD: usize = 14;
const MACD_FAST: usize = 12;
const MACD_SLOW: usize = 26;
const MACD_SIGNAL: usize = 9;
const ATR_PERIOD: usize = 14;
const LOOKBACK: usize = 20;

/// Compute the deep-dive indicator set from daily bars.
///
/// Indicators stream through the full history and report their final value;
/// any series shorter than its warm-up window stays `None`.
pub fn analyze_daily_bars(bars: &[Bar]) -> SymbolAnalysis {
    let mut analysis = SymbolAnalysis::default();
    if bars.is_empty() {
        return analysis;
    }

    let mut rsi = RelativeStrengthIndex::new(RSI_PERIOD).unwrap();
    let mut macd =
        MovingAverageConvergenceDivergence::new(MACD_FAST, MACD_SLOW, MACD_SIGNAL).unwrap();
    let mut atr = AverageTrueRange::new(ATR_PERIOD).unwrap();

    let mut last_rsi = None;
    let mut last_macd = None;
    let mut last_atr = None;

    for bar in bars {
        last_rsi = Some(rsi.next(bar.close));
        last_macd = Some(macd.next(bar.close));

        // Defective bars (high < low etc.) are skipped rather than fed to
        // the true-range calculation.
        if let Ok(item) = DataItem::builder()
            .open(bar.open)
            .high(bar.high)
            .low(bar.low)
            .close(bar.close)
            .volume(bar.volume)
            .build()
        {
            last_atr = Some(atr.next(&item));
        }
    }

    if bars.len() > RSI_PERIOD {
        analysis.rsi = last_rsi;
    }
    if bars.len() > MACD_SLOW {
        if let Some(out) = last_macd {
            analysis.macd_line = Some(out.macd);
            analysis.macd_signal = Some(out.signal);
            analysis.macd_hist = Some(out.histogram);
        }
    }
    if bars.len() > ATR_PERIOD {
        analysis.atr = last_atr;
    }

    let tail = &bars[bars.len().saturating_sub(LOOKBACK)..];
    analysis.recent_high = tail
        .iter()
        .map(|b| b.high)
        .fold(None, |acc: Option<f64>, h| Some(acc.map_or(h, |a| a.max(h))));
    analysis.recent_low = tail
        .iter()
        .map(|b| b.low)
        .fold(None, |acc: Option<f64>, l| Some(acc.map_or(l, |a| a.min(l))));
    analysis.daily_sigma = daily_return_sigma(tail);

    analysis
}

/// Standard deviation of daily close-to-close returns over the window.
pub fn daily_return_sigma(bars: &[Bar]) -> Option<f64> {
    if bars.len() < 3 {
        return None;
    }
    let returns: Vec<f64> = bars
        .windows(2)
        .filter(|w| w[0].close > 0.0)
        .map(|w| (w[1].close - w[0].close) / w[0].close)
        .collect();
    if returns.len() < 2 {
        return None;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    Some(variance.sqrt())
}

/// Twenty-session average volume, used to derive the volume ratio.
pub fn average_volume(bars: &[Bar]) -> Option<f64> {
    if bars.is_empty() {
        return None;
    }
    let tail = &bars[bars.len().saturating_sub(LOOKBACK)..];
    let sum: f64 = tail.iter().map(|b| b.volume).sum();
    Some(sum / tail.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bar(close: f64, volume: f64) -> Bar {
        Bar {
            timestamp: Some(Utc::now()),
            open: close * 0.998,
            high: close * 1.01,
            low: close * 0.99,
            close,
            volume,
        }
    }

    fn trending_bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| bar(100.0 + i as f64 * 0.8, 1_000_000.0))
            .collect()
    }

    #[test]
    fn test_full_history_yields_all_indicators() {
        let analysis = analyze_daily_bars(&trending_bars(40));
        assert!(analysis.rsi.is_some());
        assert!(analysis.macd_line.is_some());
        assert!(analysis.macd_signal.is_some());
        assert!(analysis.atr.is_some());
        assert!(analysis.recent_high.is_some());
        assert!(analysis.daily_sigma.is_some());

        // A steady uptrend pins RSI high and a positive MACD line.
        assert!(analysis.rsi.unwrap() > 60.0);
        assert!(analysis.macd_line.unwrap() > 0.0);
    }

    #[test]
    fn test_short_history_leaves_warmup_indicators_unset() {
        let analysis = analyze_daily_bars(&trending_bars(10));
        assert!(analysis.rsi.is_none());
        assert!(analysis.macd_line.is_none());
        assert!(analysis.atr.is_none());
        // Range extremes need no warm-up.
        assert!(analysis.recent_high.is_some());
    }

    #[test]
    fn test_empty_bars() {
        let analysis = analyze_daily_bars(&[]);
        assert!(analysis.rsi.is_none());
        assert!(analysis.recent_high.is_none());
    }

    #[test]
    fn test_recent_high_low_window() {
        let mut bars = trending_bars(40);
        // A spike outside the 20-bar window must not count.
        bars[5].high = 10_000.0;
        let analysis = analyze_daily_bars(&bars);
        assert!(analysis.recent_high.unwrap() < 1_000.0);
    }

    #[test]
    fn test_daily_sigma_flat_series_is_zero() {
        let bars: Vec<Bar> = (0..20).map(|_| bar(100.0, 1_000_000.0)).collect();
        let sigma = daily_return_sigma(&bars).unwrap();
        assert!(sigma.abs() < 1e-12);
    }

    #[test]
    fn test_average_volume() {
        let bars: Vec<Bar> = (0..30).map(|_| bar(50.0, 2_000_000.0)).collect();
        let avg = average_volume(&bars).unwrap();
        assert!((avg - 2_000_000.0).abs() < 1.0);
    }
}
