pub mod charts;
pub mod colors;
pub mod svg;

pub use charts::{Series, bar_chart, line_chart, stacked_bar_chart};
pub use svg::render_png;
