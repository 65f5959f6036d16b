pub mod outlier;
pub mod time_series;

pub use outlier::OutlierScorer;
pub use time_series::TimeSeries;
