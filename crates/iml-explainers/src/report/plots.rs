//! Shared plotly helpers for the bar-chart style results.
use plotly::common::Orientation;
use plotly::layout::{Axis, Layout};
use plotly::{Bar, Plot};

/// One named series of horizontal bars.
pub struct BarSeries {
    pub name: String,
    pub values: Vec<f64>,
    pub labels: Vec<String>,
}

/// Horizontal bar chart with one trace per series, labels on the y axis.
pub fn horizontal_bars(series: Vec<BarSeries>, title: &str, x_title: &str, y_title: &str) -> Plot {
    let mut plot = Plot::new();
    for s in series {
        plot.add_trace(
            Bar::new(s.values, s.labels)
                .orientation(Orientation::Horizontal)
                .name(s.name.as_str()),
        );
    }
    plot.set_layout(
        Layout::new()
            .title(title)
            .x_axis(Axis::new().title(x_title))
            .y_axis(Axis::new().title(y_title)),
    );
    plot
}
